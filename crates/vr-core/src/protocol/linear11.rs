//! PMBus numeric formats.

/// A 16-bit value in the LINEAR11 format.
///
/// The top five bits hold a two's-complement exponent N and the low eleven
/// bits a two's-complement mantissa Y. The real value is `Y * 2^N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linear11(pub u16);

const Y_WIDTH: u16 = 11;
const N_WIDTH: u16 = 5;
const Y_MAX: i16 = (1 << (Y_WIDTH - 1)) - 1;
const Y_MIN: i16 = -(1 << (Y_WIDTH - 1));
const Y_MASK: i16 = (1 << Y_WIDTH) - 1;
const N_MAX: i16 = (1 << (N_WIDTH - 1)) - 1;
const N_MIN: i16 = -(1 << (N_WIDTH - 1));
const N_MASK: i16 = (1 << N_WIDTH) - 1;

impl Linear11 {
    pub fn exponent(self) -> i16 {
        (self.0 as i16) >> Y_WIDTH
    }

    pub fn mantissa(self) -> i16 {
        ((self.0 << N_WIDTH) as i16) >> N_WIDTH
    }

    pub fn to_real(self) -> f32 {
        self.mantissa() as f32 * 2f32.powi(self.exponent().into())
    }

    /// Encode `x` keeping as many mantissa digits as the exponent range allows.
    ///
    /// Returns `None` when `x` is outside the representable range.
    pub fn from_real(x: f32) -> Option<Self> {
        if x == 0.0 {
            return Some(Linear11(0));
        }
        let scaled = if x > 0.0 {
            x / Y_MAX as f32
        } else {
            x / Y_MIN as f32
        };
        let n = (scaled.log2().ceil() as i16).max(N_MIN);
        if n > N_MAX {
            return None;
        }
        let y = (x / 2f32.powi(n.into())).round() as i16;
        let high = ((n & N_MASK) as u16) << Y_WIDTH;
        let low = (y & Y_MASK) as u16;
        Some(Linear11(high | low))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ULinear16Exponent(pub i8);

/// Output voltage data format, as reported by VOUT_MODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VOutMode {
    ULinear16(ULinear16Exponent),
    Vid(u8),
    Direct,
    HalfPrecision,
}

impl From<u8> for VOutMode {
    fn from(mode: u8) -> Self {
        match (mode >> 5) & 0b11 {
            0b00 => VOutMode::ULinear16(ULinear16Exponent(((mode << 3) as i8) >> 3)),
            0b01 => VOutMode::Vid(mode & 0x1F),
            0b10 => VOutMode::Direct,
            _ => VOutMode::HalfPrecision,
        }
    }
}

/// An unsigned 16-bit voltage whose exponent comes from VOUT_MODE.
#[derive(Debug, Clone, Copy)]
pub struct ULinear16(pub u16, pub ULinear16Exponent);

impl ULinear16 {
    pub fn to_real(self) -> f32 {
        self.0 as f32 * 2f32.powi(self.1.0.into())
    }

    pub fn from_real(x: f32, exp: ULinear16Exponent) -> Option<Self> {
        let raw = (x / 2f32.powi(exp.0.into())).round();
        if !(0.0..=u16::MAX as f32).contains(&raw) {
            return None;
        }
        Some(ULinear16(raw as u16, exp))
    }
}
