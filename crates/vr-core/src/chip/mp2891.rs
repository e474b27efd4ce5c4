//! MPS MP2891 multi-phase controller.
//!
//! READ_VOUT is LINEAR11 scaled by the VID resolution selected in
//! MFR_VOUT_LOOP_CTRL. READ_IOUT is an 11-bit count scaled by the
//! MFR_SVI3_IOUT_RPT field.

use tracing::warn;

use super::mps::{self, VoutStep};
use super::{ChipFamily, VoutSetting, VrChip};
use crate::error::VrError;
use crate::protocol::constants::mps as regs;
use crate::protocol::register::{READ_IOUT_RAW, READ_VOUT_L11};
use crate::transport::PagedTransport;
use crate::units::{Amperes, Volts};

const DAC_2P5MV_EN: u16 = 1 << 13;
const VID_RES_MASK: u16 = 0b11 << 14;
const VID_RES_5MV: u16 = 1 << 14;
const VID_RES_2MV: u16 = 1 << 15;
const IOUT_SCALE_MASK: u16 = 0b111;
const IOUT_MASK: u32 = 0x07FF;

/// Amperes per LSB, indexed by the IOUT scale field.
const IOUT_SCALE: [f32; 8] = [1.0, 1.0 / 32.0, 1.0 / 16.0, 1.0 / 8.0, 1.0 / 4.0, 1.0 / 2.0, 1.0, 2.0];

#[derive(Debug, Default)]
pub struct Mp2891;

impl Mp2891 {
    pub fn new() -> Self {
        Self
    }

    /// Map MFR_VOUT_LOOP_CTRL onto the VOUT step.
    ///
    /// The 2.5 mV DAC enable takes precedence; otherwise exactly one of the
    /// two resolution bits must be set.
    pub fn decode_vout_step(loop_ctrl: u16) -> Result<VoutStep, VrError> {
        if loop_ctrl & DAC_2P5MV_EN != 0 {
            return Ok(VoutStep(2500));
        }
        match loop_ctrl & VID_RES_MASK {
            VID_RES_5MV => Ok(VoutStep(5000)),
            VID_RES_2MV => Ok(VoutStep(2000)),
            _ => {
                warn!(loop_ctrl = %format!("0x{:04X}", loop_ctrl), "VOUT resolution not supported");
                Err(VrError::UnsupportedEncoding {
                    register: regs::MP2891_LOOP_CTRL,
                    value: loop_ctrl,
                })
            }
        }
    }

    pub fn decode_iout_scale(iout_rpt: u16) -> f32 {
        IOUT_SCALE[(iout_rpt & IOUT_SCALE_MASK) as usize]
    }

    fn vout_step(&self, t: &mut PagedTransport) -> Result<VoutStep, VrError> {
        Self::decode_vout_step(t.read_word(regs::MP2891_LOOP_CTRL)?)
    }
}

impl VrChip for Mp2891 {
    fn family(&self) -> ChipFamily {
        ChipFamily::Mp2891
    }

    fn read_vout(&mut self, t: &mut PagedTransport) -> Result<Volts, VrError> {
        let step = self.vout_step(t)?;
        let raw = t.read_register(&READ_VOUT_L11)?;
        Ok(Volts(READ_VOUT_L11.decode(raw, step.volts())))
    }

    fn read_iout(&mut self, t: &mut PagedTransport) -> Result<Amperes, VrError> {
        let scale = Self::decode_iout_scale(t.read_word(regs::MP2891_IOUT_RPT)?);
        let raw = t.read_register(&READ_IOUT_RAW)? & IOUT_MASK;
        Ok(Amperes(READ_IOUT_RAW.decode(raw, scale)))
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
            regs::MP2891_DEVICE_ID_REG,
            regs::MP2891_DEVICE_ID,
        )
    }

    fn store(&mut self, t: &mut PagedTransport) -> Result<(), VrError> {
        mps::store(t)
    }
}
