//! MPS MP29816A multi-phase controller.
//!
//! READ_VOUT is a plain count of VOUT steps; the step comes from bits 12:10
//! of VOUT_SCALE_LOOP. Current, power and temperature are LINEAR11.

use super::mps::{self, VoutStep};
use super::{ChipFamily, VoutSetting, VrChip};
use crate::error::VrError;
use crate::protocol::constants::{mps as regs, pmbus};
use crate::protocol::register::{READ_IOUT_L11, READ_VOUT_RAW};
use crate::transport::PagedTransport;
use crate::units::{Amperes, Volts};

const VID_RES_SHIFT: u16 = 10;
const VID_RES_MASK: u16 = 0b111;

/// Microvolts per LSB, indexed by the resolution field.
const VOUT_STEP_UV: [u32; 8] = [6250, 5000, 2500, 2000, 1000, 4, 2, 1];

#[derive(Debug, Default)]
pub struct Mp29816a;

impl Mp29816a {
    pub fn new() -> Self {
        Self
    }

    pub fn decode_vout_step(scale_loop: u16) -> VoutStep {
        VoutStep(VOUT_STEP_UV[((scale_loop >> VID_RES_SHIFT) & VID_RES_MASK) as usize])
    }

    fn vout_step(&self, t: &mut PagedTransport) -> Result<VoutStep, VrError> {
        Ok(Self::decode_vout_step(t.read_word(pmbus::VOUT_SCALE_LOOP)?))
    }
}

impl VrChip for Mp29816a {
    fn family(&self) -> ChipFamily {
        ChipFamily::Mp29816a
    }

    fn read_vout(&mut self, t: &mut PagedTransport) -> Result<Volts, VrError> {
        let step = self.vout_step(t)?;
        let raw = t.read_register(&READ_VOUT_RAW)?;
        Ok(Volts(READ_VOUT_RAW.decode(raw, step.volts())))
    }

    fn read_iout(&mut self, t: &mut PagedTransport) -> Result<Amperes, VrError> {
        let raw = t.read_register(&READ_IOUT_L11)?;
        Ok(Amperes(READ_IOUT_L11.decode(raw, 1.0)))
    }

    fn fw_version(&mut self, t: &mut PagedTransport) -> Result<u32, VrError> {
        mps::read_user_crc(t)
    }

    fn vout_setting(&mut self, t: &mut PagedTransport, which: VoutSetting) -> Result<u16, VrError> {
        let step = self.vout_step(t)?;
        mps::read_vid_setting(t, &which.register(), step)
    }

    fn set_vout_setting(
        &mut self,
        t: &mut PagedTransport,
        which: VoutSetting,
        millivolts: u16,
    ) -> Result<(), VrError> {
        let step = self.vout_step(t)?;
        mps::write_vid_setting(t, &which.register(), step, millivolts)
    }

    fn verify_identity(&mut self, t: &mut PagedTransport) -> Result<(), VrError> {
        mps::verify_identity(
            t,
            self.family(),
            regs::MP29816A_DEVICE_ID_REG,
            regs::MP29816A_DEVICE_ID,
        )
    }

    fn store(&mut self, t: &mut PagedTransport) -> Result<(), VrError> {
        mps::store(t)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chip::testutil::{ADDR, BUS, transport};
    use crate::protocol::Linear11;
    use crate::transport::MockBus;

    #[test]
    fn test_vout_step_table() {
        let expected = [6250, 5000, 2500, 2000, 1000, 4, 2, 1];
        for (field, uv) in expected.into_iter().enumerate() {
            let scale_loop = (field as u16) << 10;
            assert_eq!(Mp29816a::decode_vout_step(scale_loop), VoutStep(uv));
        }
        // Bits outside 12:10 are ignored.
        assert_eq!(Mp29816a::decode_vout_step(0xE3FF), VoutStep(6250));
    }

    #[test]
    fn test_read_vout_plain_integer() {
        let mock = Arc::new(MockBus::new());
        // 1 mV steps
        mock.set_word(BUS, ADDR, 1, pmbus::VOUT_SCALE_LOOP, 4 << 10);
        mock.set_word(BUS, ADDR, 1, pmbus::READ_VOUT, 750);

        let mut t = transport(&mock, ChipFamily::Mp29816a);
        t.set_page(1).unwrap();
        let v = Mp29816a::new().read_vout(&mut t).unwrap();
        assert!((v.0 - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_read_iout_linear11() {
        let mock = Arc::new(MockBus::new());
        let raw = Linear11::from_real(42.5).unwrap();
        mock.set_word(BUS, ADDR, 0, pmbus::READ_IOUT, raw.0);

        let mut t = transport(&mock, ChipFamily::Mp29816a);
        assert_eq!(Mp29816a::new().read_iout(&mut t).unwrap(), Amperes(42.5));
    }

    #[test]
    fn test_vout_limits_round_trip() {
        let mock = Arc::new(MockBus::new());
        // 5 mV steps
        mock.set_word(BUS, ADDR, 0, pmbus::VOUT_SCALE_LOOP, 1 << 10);

        let mut t = transport(&mock, ChipFamily::Mp29816a);
        let mut chip = Mp29816a::new();
        chip.set_vout_max(&mut t, 1050).unwrap();
        chip.set_vout_min(&mut t, 600).unwrap();
        assert_eq!(mock.word(BUS, ADDR, 0, pmbus::VOUT_MAX), Some(210));
        assert_eq!(chip.vout_max(&mut t).unwrap(), 1050);
        assert_eq!(chip.vout_min(&mut t).unwrap(), 600);
    }

    #[test]
    fn test_identity_vendor_mismatch() {
        let mock = Arc::new(MockBus::new());
        mock.set_register(BUS, ADDR, 0, pmbus::MFR_ID, &[0x03, 0x52, 0x45, 0x4E]);
        mock.set_word(BUS, ADDR, 2, regs::MP29816A_DEVICE_ID_REG, 0xA816);

        let mut t = transport(&mock, ChipFamily::Mp29816a);
        let err = Mp29816a::new().verify_identity(&mut t).unwrap_err();
        assert!(matches!(err, VrError::IdentityMismatch { field: "vendor id", .. }));
    }

    #[test]
    fn test_fw_version_reads_user_crc() {
        let mock = Arc::new(MockBus::new());
        mock.set_word(BUS, ADDR, 1, regs::USER_CRC, 0xBEEF);

        let mut t = transport(&mock, ChipFamily::Mp29816a);
        assert_eq!(Mp29816a::new().fw_version(&mut t).unwrap(), 0xBEEF);
    }
}
