//! Chip protocol adapters.
//!
//! Each supported VR family implements [`VrChip`], translating logical
//! quantities into paged register accesses and decoding raw register bits
//! with the family's own scale tables. The coordinator stores one adapter per
//! physical device and never switches on the family tag itself.

pub mod mp2891;
pub mod mp29816a;
pub mod mps;
pub mod raa228249;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VrError;
use crate::protocol::constants::{mps as mps_regs, pmbus};
use crate::protocol::register::{self, PagedRegister};
use crate::protocol::StatusRegister;
use crate::transport::PagedTransport;
use crate::units::{Amperes, Celsius, Quantity, Reading, Volts, Watts};

pub use mp2891::Mp2891;
pub use mp29816a::Mp29816a;
pub use raa228249::Raa228249;

/// Supported VR controller families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipFamily {
    Mp2891,
    Mp29816a,
    Raa228249,
}

impl ChipFamily {
    pub const ALL: [ChipFamily; 3] = [
        ChipFamily::Mp2891,
        ChipFamily::Mp29816a,
        ChipFamily::Raa228249,
    ];

    /// Number of PMBus pages the controller exposes.
    pub fn page_count(self) -> u8 {
        match self {
            ChipFamily::Mp2891 | ChipFamily::Mp29816a => 3,
            ChipFamily::Raa228249 => 2,
        }
    }

    /// Largest firmware image, in records, the family accepts. `None` when
    /// field flashing is not supported.
    pub fn max_image_records(self) -> Option<usize> {
        match self {
            ChipFamily::Mp2891 => Some(mps_regs::MP2891_MAX_RECORDS),
            ChipFamily::Mp29816a => Some(mps_regs::MP29816A_MAX_RECORDS),
            ChipFamily::Raa228249 => None,
        }
    }

    /// Build the adapter for this family.
    ///
    /// `device_id` overrides the expected identity for families whose id
    /// differs between silicon revisions.
    pub fn adapter(self, device_id: Option<u32>) -> Box<dyn VrChip> {
        match self {
            ChipFamily::Mp2891 => Box::new(Mp2891::new()),
            ChipFamily::Mp29816a => Box::new(Mp29816a::new()),
            ChipFamily::Raa228249 => Box::new(match device_id {
                Some(id) => Raa228249::with_device_id(id),
                None => Raa228249::new(),
            }),
        }
    }
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipFamily::Mp2891 => write!(f, "MP2891"),
            ChipFamily::Mp29816a => write!(f, "MP29816A"),
            ChipFamily::Raa228249 => write!(f, "RAA228249"),
        }
    }
}

impl FromStr for ChipFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChipFamily::ALL
            .into_iter()
            .find(|f| f.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown chip family '{s}'"))
    }
}

/// Voltage settings stored in VID-style registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoutSetting {
    Command,
    Max,
    Min,
}

impl VoutSetting {
    pub fn register(self) -> PagedRegister {
        match self {
            VoutSetting::Command => register::VOUT_COMMAND,
            VoutSetting::Max => register::VOUT_MAX,
            VoutSetting::Min => register::VOUT_MIN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VoutSetting::Command => "VOUT_COMMAND",
            VoutSetting::Max => "VOUT_MAX",
            VoutSetting::Min => "VOUT_MIN",
        }
    }
}

/// Capability set of a VR controller.
///
/// Every method operates on the page the caller already selected for the
/// rail, except identity, version and store operations, which move the page
/// pointer to the fixed page their registers live on.
pub trait VrChip: Send {
    fn family(&self) -> ChipFamily;

    fn read_vout(&mut self, t: &mut PagedTransport) -> Result<Volts, VrError>;

    fn read_iout(&mut self, t: &mut PagedTransport) -> Result<Amperes, VrError>;

    fn read_pout(&mut self, t: &mut PagedTransport) -> Result<Watts, VrError> {
        let raw = t.read_register(&register::READ_POUT)?;
        Ok(Watts(register::READ_POUT.decode(raw, 1.0)))
    }

    fn read_temperature(&mut self, t: &mut PagedTransport) -> Result<Celsius, VrError> {
        let raw = t.read_register(&register::READ_TEMPERATURE)?;
        Ok(Celsius(register::READ_TEMPERATURE.decode(raw, 1.0)))
    }

    fn read(&mut self, t: &mut PagedTransport, quantity: Quantity) -> Result<Reading, VrError> {
        Ok(match quantity {
            Quantity::Vout => Reading::Voltage(self.read_vout(t)?),
            Quantity::Iout => Reading::Current(self.read_iout(t)?),
            Quantity::Pout => Reading::Power(self.read_pout(t)?),
            Quantity::Temperature => Reading::Temperature(self.read_temperature(t)?),
        })
    }

    /// Configuration revision (user CRC) of the programmed image.
    fn fw_version(&mut self, t: &mut PagedTransport) -> Result<u32, VrError>;

    /// Read a voltage setting in millivolts.
    fn vout_setting(&mut self, t: &mut PagedTransport, which: VoutSetting) -> Result<u16, VrError>;

    /// Write a voltage setting, rounding to the nearest representable step.
    fn set_vout_setting(
        &mut self,
        t: &mut PagedTransport,
        which: VoutSetting,
        millivolts: u16,
    ) -> Result<(), VrError>;

    fn vout_command(&mut self, t: &mut PagedTransport) -> Result<u16, VrError> {
        self.vout_setting(t, VoutSetting::Command)
    }

    fn set_vout_command(&mut self, t: &mut PagedTransport, millivolts: u16) -> Result<(), VrError> {
        self.set_vout_setting(t, VoutSetting::Command, millivolts)
    }

    fn vout_max(&mut self, t: &mut PagedTransport) -> Result<u16, VrError> {
        self.vout_setting(t, VoutSetting::Max)
    }

    fn set_vout_max(&mut self, t: &mut PagedTransport, millivolts: u16) -> Result<(), VrError> {
        self.set_vout_setting(t, VoutSetting::Max, millivolts)
    }

    fn vout_min(&mut self, t: &mut PagedTransport) -> Result<u16, VrError> {
        self.vout_setting(t, VoutSetting::Min)
    }

    fn set_vout_min(&mut self, t: &mut PagedTransport, millivolts: u16) -> Result<(), VrError> {
        self.set_vout_setting(t, VoutSetting::Min, millivolts)
    }

    fn vr_status(&mut self, t: &mut PagedTransport, which: StatusRegister) -> Result<u16, VrError> {
        Ok(t.read_register(&which.register())? as u16)
    }

    fn clear_vr_status(&mut self, t: &mut PagedTransport) -> Result<(), VrError> {
        t.send_byte(pmbus::CLEAR_FAULTS)?;
        Ok(())
    }

    /// Compare vendor and device id against the family's constants.
    fn verify_identity(&mut self, t: &mut PagedTransport) -> Result<(), VrError>;

    fn supports_store(&self) -> bool {
        true
    }

    /// Commit user registers to non-volatile memory. Does not wait for the
    /// commit to settle.
    fn store(&mut self, t: &mut PagedTransport) -> Result<(), VrError>;

    /// Remaining non-volatile programming cycles.
    fn remaining_writes(&mut self, _t: &mut PagedTransport) -> Result<u8, VrError> {
        Err(VrError::Unsupported {
            family: self.family(),
            operation: "remaining_writes",
        })
    }

    fn max_image_records(&self) -> Option<usize> {
        self.family().max_image_records()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;
    use std::time::Duration;

    use super::ChipFamily;
    use crate::rail::DeviceHandle;
    use crate::transport::{MockBus, PagedTransport, TransportPolicy};

    pub const BUS: u8 = 3;
    pub const ADDR: u8 = 0x5C;

    pub fn transport(mock: &Arc<MockBus>, family: ChipFamily) -> PagedTransport {
        let device = DeviceHandle::new("vr-test", BUS, ADDR, family);
        let policy = TransportPolicy {
            retries: 3,
            page_settle: Duration::ZERO,
            commit_settle: Duration::ZERO,
        };
        PagedTransport::new(mock.clone(), device, policy)
    }
}
