//! Renesas RAA228249 digital multiphase controller.
//!
//! Voltages follow VOUT_MODE (ULINEAR16 or 1 mV direct), cached per page.
//! The configuration CRC and remaining NVM slots are read through the DMA
//! window. Field flashing is not supported.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, error};

use super::{ChipFamily, VoutSetting, VrChip};
use crate::error::VrError;
use crate::protocol::constants::{pmbus, renesas};
use crate::protocol::register::READ_IOUT_L11;
use crate::protocol::{ULinear16, VOutMode};
use crate::transport::PagedTransport;
use crate::units::{Amperes, Volts};

const PAGES: usize = 2;

#[derive(Debug)]
pub struct Raa228249 {
    modes: [Option<u8>; PAGES],
    device_id: u32,
}

impl Default for Raa228249 {
    fn default() -> Self {
        Self::new()
    }
}

impl Raa228249 {
    pub fn new() -> Self {
        Self::with_device_id(renesas::RAA228249_DEVICE_ID)
    }

    pub fn with_device_id(device_id: u32) -> Self {
        Self {
            modes: [None; PAGES],
            device_id,
        }
    }

    fn vout_mode(&mut self, t: &mut PagedTransport) -> Result<u8, VrError> {
        let slot = t.page().map(usize::from).filter(|p| *p < PAGES);
        if let Some(mode) = slot.and_then(|p| self.modes[p]) {
            return Ok(mode);
        }
        let mode = t.read_byte(pmbus::VOUT_MODE)?;
        if let Some(p) = slot {
            self.modes[p] = Some(mode);
        }
        Ok(mode)
    }

    /// Convert a VOUT-format register value to millivolts.
    pub fn decode_millivolts(mode: u8, raw: u16) -> Result<u16, VrError> {
        match VOutMode::from(mode) {
            VOutMode::ULinear16(exp) => {
                let mv = (ULinear16(raw, exp).to_real() * 1000.0).round();
                if !(0.0..=u16::MAX as f32).contains(&mv) {
                    return Err(VrError::OutOfRange {
                        what: "millivolts",
                        value: mv as u32,
                    });
                }
                Ok(mv as u16)
            }
            VOutMode::Direct => Ok(raw),
            VOutMode::Vid(_) | VOutMode::HalfPrecision => Err(VrError::UnsupportedEncoding {
                register: pmbus::VOUT_MODE,
                value: mode.into(),
            }),
        }
    }

    pub fn encode_millivolts(mode: u8, millivolts: u16) -> Result<u16, VrError> {
        match VOutMode::from(mode) {
            VOutMode::ULinear16(exp) => ULinear16::from_real(millivolts as f32 / 1000.0, exp)
                .map(|v| v.0)
                .ok_or(VrError::OutOfRange {
                    what: "millivolts",
                    value: millivolts.into(),
                }),
            VOutMode::Direct => Ok(millivolts),
            VOutMode::Vid(_) | VOutMode::HalfPrecision => Err(VrError::UnsupportedEncoding {
                register: pmbus::VOUT_MODE,
                value: mode.into(),
            }),
        }
    }

    fn dma_read(&self, t: &mut PagedTransport, addr: u16) -> Result<u32, VrError> {
        t.write_word(renesas::DMA_ADDRESS, addr)?;
        let bytes = t.read_reg(renesas::DMA_DATA, 4)?;
        Ok(LittleEndian::read_u32(&bytes))
    }
}

impl VrChip for Raa228249 {
    fn family(&self) -> ChipFamily {
        ChipFamily::Raa228249
    }

    fn read_vout(&mut self, t: &mut PagedTransport) -> Result<Volts, VrError> {
        let mode = self.vout_mode(t)?;
        let raw = t.read_word(pmbus::READ_VOUT)?;
        Ok(Volts(Self::decode_millivolts(mode, raw)? as f32 / 1000.0))
    }

    fn read_iout(&mut self, t: &mut PagedTransport) -> Result<Amperes, VrError> {
        let raw = t.read_register(&READ_IOUT_L11)?;
        Ok(Amperes(READ_IOUT_L11.decode(raw, 1.0)))
    }

    fn fw_version(&mut self, t: &mut PagedTransport) -> Result<u32, VrError> {
        self.dma_read(t, renesas::DMA_CRC)
    }

    fn vout_setting(&mut self, t: &mut PagedTransport, which: VoutSetting) -> Result<u16, VrError> {
        let mode = self.vout_mode(t)?;
        let raw = t.read_word(which.register().addr)?;
        Self::decode_millivolts(mode, raw)
    }

    fn set_vout_setting(
        &mut self,
        t: &mut PagedTransport,
        which: VoutSetting,
        millivolts: u16,
    ) -> Result<(), VrError> {
        let mode = self.vout_mode(t)?;
        let raw = Self::encode_millivolts(mode, millivolts)?;
        debug!(register = which.name(), millivolts, raw, "Writing voltage setting");
        t.write_word(which.register().addr, raw)?;
        Ok(())
    }

    fn verify_identity(&mut self, t: &mut PagedTransport) -> Result<(), VrError> {
        // Block read: byte count, then the id little-endian.
        let bytes = t.read_reg(pmbus::IC_DEVICE_ID, 5)?;
        let id = LittleEndian::read_u32(&bytes[1..5]);
        if id != self.device_id {
            error!(device = %format!("0x{:08X}", id), "Invalid device id");
            return Err(VrError::IdentityMismatch {
                field: "device id",
                expected: self.device_id,
                actual: id,
            });
        }
        Ok(())
    }

    fn supports_store(&self) -> bool {
        false
    }

    fn store(&mut self, _t: &mut PagedTransport) -> Result<(), VrError> {
        Err(VrError::Unsupported {
            family: self.family(),
            operation: "store",
        })
    }

    fn remaining_writes(&mut self, t: &mut PagedTransport) -> Result<u8, VrError> {
        Ok((self.dma_read(t, renesas::DMA_NVM_SLOTS)? & 0xFF) as u8)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chip::testutil::{ADDR, BUS, transport};
    use crate::transport::MockBus;
    use crate::transport::mock::BusOpKind;

    // ULINEAR16 with a 2^-9 exponent
    const MODE_ULINEAR16: u8 = 0x17;
    const MODE_DIRECT: u8 = 0x40;

    #[test]
    fn test_decode_by_mode() {
        assert_eq!(Raa228249::decode_millivolts(MODE_ULINEAR16, 512).unwrap(), 1000);
        assert_eq!(Raa228249::decode_millivolts(MODE_DIRECT, 825).unwrap(), 825);
        assert!(matches!(
            Raa228249::decode_millivolts(0x21, 100),
            Err(VrError::UnsupportedEncoding { register: 0x20, .. })
        ));
    }

    #[test]
    fn test_vout_command_round_trip_per_page() {
        let mock = Arc::new(MockBus::new());
        mock.set_register(BUS, ADDR, 0, pmbus::VOUT_MODE, &[MODE_ULINEAR16]);
        mock.set_register(BUS, ADDR, 1, pmbus::VOUT_MODE, &[MODE_DIRECT]);

        let mut t = transport(&mock, ChipFamily::Raa228249);
        let mut chip = Raa228249::new();

        t.set_page(0).unwrap();
        chip.set_vout_command(&mut t, 750).unwrap();
        assert_eq!(mock.word(BUS, ADDR, 0, pmbus::VOUT_COMMAND), Some(384));
        assert_eq!(chip.vout_command(&mut t).unwrap(), 750);

        t.set_page(1).unwrap();
        chip.set_vout_command(&mut t, 1200).unwrap();
        assert_eq!(mock.word(BUS, ADDR, 1, pmbus::VOUT_COMMAND), Some(1200));
        assert_eq!(chip.vout_command(&mut t).unwrap(), 1200);
    }

    #[test]
    fn test_vout_mode_cached() {
        let mock = Arc::new(MockBus::new());
        mock.set_register(BUS, ADDR, 0, pmbus::VOUT_MODE, &[MODE_DIRECT]);
        mock.set_word(BUS, ADDR, 0, pmbus::READ_VOUT, 900);

        let mut t = transport(&mock, ChipFamily::Raa228249);
        let mut chip = Raa228249::new();
        t.set_page(0).unwrap();
        chip.read_vout(&mut t).unwrap();
        chip.read_vout(&mut t).unwrap();

        let mode_reads = mock
            .ops()
            .iter()
            .filter(|op| matches!(op.kind, BusOpKind::Read { reg: 0x20, .. }))
            .count();
        assert_eq!(mode_reads, 1);
    }

    #[test]
    fn test_dma_crc_and_remaining_writes() {
        let mock = Arc::new(MockBus::new());
        mock.set_register(BUS, ADDR, 0, renesas::DMA_DATA, &[0x78, 0x56, 0x34, 0x12]);

        let mut t = transport(&mock, ChipFamily::Raa228249);
        let mut chip = Raa228249::new();
        assert_eq!(chip.fw_version(&mut t).unwrap(), 0x1234_5678);
        assert_eq!(mock.word(BUS, ADDR, 0, renesas::DMA_ADDRESS), Some(0x003F));

        mock.set_register(BUS, ADDR, 0, renesas::DMA_DATA, &[0x1C, 0x00, 0x00, 0x00]);
        assert_eq!(chip.remaining_writes(&mut t).unwrap(), 28);
        assert_eq!(mock.word(BUS, ADDR, 0, renesas::DMA_ADDRESS), Some(0x00C2));
    }

    #[test]
    fn test_identity_and_store() {
        let mock = Arc::new(MockBus::new());
        let mut id = vec![0x04];
        id.extend_from_slice(&0xCAFE_0001u32.to_le_bytes());
        mock.set_register(BUS, ADDR, 0, pmbus::IC_DEVICE_ID, &id);

        let mut t = transport(&mock, ChipFamily::Raa228249);
        assert!(Raa228249::with_device_id(0xCAFE_0001).verify_identity(&mut t).is_ok());
        assert!(matches!(
            Raa228249::new().verify_identity(&mut t),
            Err(VrError::IdentityMismatch { .. })
        ));

        let mut chip = Raa228249::new();
        assert!(!chip.supports_store());
        assert!(matches!(chip.store(&mut t), Err(VrError::Unsupported { .. })));
    }
}
