//! Tuple structs for physical units.

use std::fmt;

/// Volts of potential
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Volts(pub f32);

/// Amperes of current
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Amperes(pub f32);

/// Watts of power
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Watts(pub f32);

/// Degrees Celsius
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Celsius(pub f32);

/// Quantities a rail can be polled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Vout,
    Iout,
    Pout,
    Temperature,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Vout => write!(f, "VOUT"),
            Quantity::Iout => write!(f, "IOUT"),
            Quantity::Pout => write!(f, "POUT"),
            Quantity::Temperature => write!(f, "TEMP"),
        }
    }
}

/// A decoded sensor value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Voltage(Volts),
    Current(Amperes),
    Power(Watts),
    Temperature(Celsius),
}

impl Reading {
    /// The value in its base unit (V, A, W or °C).
    pub fn value(&self) -> f32 {
        match self {
            Reading::Voltage(v) => v.0,
            Reading::Current(a) => a.0,
            Reading::Power(w) => w.0,
            Reading::Temperature(c) => c.0,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Reading::Voltage(_) => "V",
            Reading::Current(_) => "A",
            Reading::Power(_) => "W",
            Reading::Temperature(_) => "°C",
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} {}", self.value(), self.unit())
    }
}
