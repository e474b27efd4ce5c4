//! Shared MPS controller helpers.
//!
//! MP2891 and MP29816A share the identity layout (vendor id on page 0,
//! device id on page 2), the user CRC on page 1, the STORE command and the
//! VID encoding of the voltage settings. They differ in where the VOUT step
//! comes from.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, error};

use super::ChipFamily;
use crate::error::VrError;
use crate::protocol::PagedRegister;
use crate::protocol::constants::{mps, pmbus};
use crate::transport::PagedTransport;

/// VOUT resolution of an MPS controller, in microvolts per LSB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoutStep(pub u32);

impl VoutStep {
    pub fn volts(self) -> f32 {
        self.0 as f32 / 1_000_000.0
    }

    pub fn to_millivolts(self, code: u16) -> Result<u16, VrError> {
        let mv = (code as u64 * self.0 as u64 + 500) / 1000;
        u16::try_from(mv).map_err(|_| VrError::OutOfRange {
            what: "millivolts",
            value: mv as u32,
        })
    }

    /// Nearest VID code for `millivolts`.
    pub fn to_code(self, millivolts: u16) -> Result<u16, VrError> {
        let step = self.0 as u64;
        let code = (millivolts as u64 * 1000 + step / 2) / step;
        u16::try_from(code).map_err(|_| VrError::OutOfRange {
            what: "VID code",
            value: code.min(u32::MAX as u64) as u32,
        })
    }
}

pub fn read_vendor_id(t: &mut PagedTransport) -> Result<u32, VrError> {
    t.set_page(mps::PAGE_0)?;
    let bytes = t.read_reg(pmbus::MFR_ID, 4)?;
    Ok(LittleEndian::read_u24(&bytes[1..4]))
}

pub fn read_device_id(t: &mut PagedTransport, reg: u8) -> Result<u16, VrError> {
    t.set_page(mps::PAGE_2)?;
    Ok(t.read_word(reg)?)
}

/// Vendor then device id; the first mismatch is fatal.
pub fn verify_identity(
    t: &mut PagedTransport,
    family: ChipFamily,
    device_reg: u8,
    expected: u16,
) -> Result<(), VrError> {
    let vendor = read_vendor_id(t)?;
    if vendor != mps::VENDOR_ID {
        error!(family = %family, vendor = %format!("0x{:06X}", vendor), "Invalid vendor id");
        return Err(VrError::IdentityMismatch {
            field: "vendor id",
            expected: mps::VENDOR_ID,
            actual: vendor,
        });
    }

    let device = read_device_id(t, device_reg)?;
    if device != expected {
        error!(family = %family, device = %format!("0x{:04X}", device), "Invalid device id");
        return Err(VrError::IdentityMismatch {
            field: "device id",
            expected: expected.into(),
            actual: device.into(),
        });
    }

    debug!(family = %family, "Identity verified");
    Ok(())
}

pub fn read_user_crc(t: &mut PagedTransport) -> Result<u32, VrError> {
    t.set_page(mps::PAGE_1)?;
    Ok(t.read_word(mps::USER_CRC)?.into())
}

pub fn store(t: &mut PagedTransport) -> Result<(), VrError> {
    t.set_page(mps::PAGE_0)?;
    t.send_byte(mps::STORE)?;
    Ok(())
}

pub fn read_vid_setting(
    t: &mut PagedTransport,
    reg: &PagedRegister,
    step: VoutStep,
) -> Result<u16, VrError> {
    let code = t.read_register(reg)? as u16;
    step.to_millivolts(code)
}

pub fn write_vid_setting(
    t: &mut PagedTransport,
    reg: &PagedRegister,
    step: VoutStep,
    millivolts: u16,
) -> Result<(), VrError> {
    let code = step.to_code(millivolts)?;
    t.write_register(reg, code.into())?;
    Ok(())
}
