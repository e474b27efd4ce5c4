//! Static register descriptions.

use super::constants::pmbus;
use super::linear11::Linear11;

/// How the raw bits of a register map onto a physical value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Plain integer, scaled by a per-family LSB weight.
    Raw,
    /// PMBus LINEAR11, optionally scaled by a per-family resolution.
    Linear11,
    /// Voltage identification code, in steps of the family's VOUT resolution.
    Vid,
}

/// A register on a paged PMBus device.
///
/// `page` is `None` for registers that live on whatever page the owning rail
/// selected; fixed-page registers (identity, CRC) carry their page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagedRegister {
    pub page: Option<u8>,
    pub addr: u8,
    pub encoding: Encoding,
    pub width: usize,
}

impl PagedRegister {
    pub const fn rail(addr: u8, encoding: Encoding, width: usize) -> Self {
        Self {
            page: None,
            addr,
            encoding,
            width,
        }
    }

    pub const fn fixed(page: u8, addr: u8, encoding: Encoding, width: usize) -> Self {
        Self {
            page: Some(page),
            addr,
            encoding,
            width,
        }
    }

    /// Convert a raw reading into a physical value. `lsb` is the weight of one
    /// count for raw and VID registers, and a multiplier for LINEAR11 ones.
    pub fn decode(&self, raw: u32, lsb: f32) -> f32 {
        match self.encoding {
            Encoding::Raw | Encoding::Vid => raw as f32 * lsb,
            Encoding::Linear11 => Linear11(raw as u16).to_real() * lsb,
        }
    }
}

pub const READ_VOUT_L11: PagedRegister = PagedRegister::rail(pmbus::READ_VOUT, Encoding::Linear11, 2);
pub const READ_VOUT_RAW: PagedRegister = PagedRegister::rail(pmbus::READ_VOUT, Encoding::Raw, 2);
pub const READ_IOUT_L11: PagedRegister = PagedRegister::rail(pmbus::READ_IOUT, Encoding::Linear11, 2);
pub const READ_IOUT_RAW: PagedRegister = PagedRegister::rail(pmbus::READ_IOUT, Encoding::Raw, 2);
pub const READ_POUT: PagedRegister = PagedRegister::rail(pmbus::READ_POUT, Encoding::Linear11, 2);
pub const READ_TEMPERATURE: PagedRegister =
    PagedRegister::rail(pmbus::READ_TEMPERATURE_1, Encoding::Linear11, 2);
pub const VOUT_COMMAND: PagedRegister = PagedRegister::rail(pmbus::VOUT_COMMAND, Encoding::Vid, 2);
pub const VOUT_MAX: PagedRegister = PagedRegister::rail(pmbus::VOUT_MAX, Encoding::Vid, 2);
pub const VOUT_MIN: PagedRegister = PagedRegister::rail(pmbus::VOUT_MIN, Encoding::Vid, 2);

/// Status registers readable through `get_vr_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRegister {
    Word,
    Vout,
    Iout,
    Input,
    Temperature,
    Cml,
}

impl StatusRegister {
    pub fn register(self) -> PagedRegister {
        let (addr, width) = match self {
            StatusRegister::Word => (pmbus::STATUS_WORD, 2),
            StatusRegister::Vout => (pmbus::STATUS_VOUT, 1),
            StatusRegister::Iout => (pmbus::STATUS_IOUT, 1),
            StatusRegister::Input => (pmbus::STATUS_INPUT, 1),
            StatusRegister::Temperature => (pmbus::STATUS_TEMPERATURE, 1),
            StatusRegister::Cml => (pmbus::STATUS_CML, 1),
        };
        PagedRegister::rail(addr, Encoding::Raw, width)
    }
}

impl std::str::FromStr for StatusRegister {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "word" => Ok(StatusRegister::Word),
            "vout" => Ok(StatusRegister::Vout),
            "iout" => Ok(StatusRegister::Iout),
            "input" => Ok(StatusRegister::Input),
            "temperature" | "temp" => Ok(StatusRegister::Temperature),
            "cml" => Ok(StatusRegister::Cml),
            other => Err(format!("unknown status register '{other}'")),
        }
    }
}
