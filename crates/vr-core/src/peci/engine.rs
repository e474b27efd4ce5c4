//! Per-package PECI telemetry: power from energy counters, package and
//! DIMM temperatures.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use super::bus::{PeciBus, PeciError, PkgConfigResponse};
use crate::config::BoardConfig;
use crate::protocol::constants::peci;
use crate::units::{Celsius, Reading, Watts};

/// Power-SKU unit exponents, latched once per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitScale {
    pub time_unit: u8,
    pub energy_unit: u8,
    pub power_unit: u8,
}

impl UnitScale {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            time_unit: ((raw >> 16) & 0x0F) as u8,
            energy_unit: ((raw >> 8) & 0x1F) as u8,
            power_unit: (raw & 0x0F) as u8,
        }
    }

    /// Factor turning energy counts per time count into watts:
    /// `2^(time_unit - energy_unit)`.
    pub fn power_scale(&self) -> f32 {
        2f32.powi(i32::from(self.time_unit) - i32::from(self.energy_unit))
    }
}

/// Previous energy and run-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnergyCounterState {
    energy: u32,
    run_time: u32,
    seeded: bool,
}

impl EnergyCounterState {
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Store the new counters and return the deltas since the previous
    /// sample, or `None` on the first sample.
    pub fn update(&mut self, energy: u32, run_time: u32) -> Option<(u32, u32)> {
        let prev = *self;
        *self = Self {
            energy,
            run_time,
            seeded: true,
        };
        prev.seeded.then(|| {
            (
                energy.wrapping_sub(prev.energy),
                run_time.wrapping_sub(prev.run_time),
            )
        })
    }
}

/// Result of a power read. The first read only seeds the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergySample {
    NotReady,
    Ready(Watts),
}

/// Sensors a package exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeciSensor {
    Power,
    Temperature,
    Margin,
    TjMax,
    Dimm { channel: u8, slot: u8 },
}

impl fmt::Display for PeciSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeciSensor::Power => write!(f, "power"),
            PeciSensor::Temperature => write!(f, "temperature"),
            PeciSensor::Margin => write!(f, "margin"),
            PeciSensor::TjMax => write!(f, "tjmax"),
            PeciSensor::Dimm { channel, slot } => write!(f, "dimm ch{channel} slot{slot}"),
        }
    }
}

/// Telemetry engine for one CPU package.
///
/// Reads take `&mut self`: the counter state is owned by the engine, and
/// callers sharing an engine between threads wrap it in a lock.
pub struct PeciTelemetry {
    bus: Arc<dyn PeciBus>,
    addr: u8,
    counters: EnergyCounterState,
    units: Option<UnitScale>,
}

impl PeciTelemetry {
    pub fn new(bus: Arc<dyn PeciBus>, addr: u8) -> Self {
        Self {
            bus,
            addr,
            counters: EnergyCounterState::default(),
            units: None,
        }
    }

    /// One engine per CPU package in the board description, keyed by name.
    pub fn for_board(config: &BoardConfig, bus: Arc<dyn PeciBus>) -> Vec<(String, Self)> {
        config
            .cpus
            .iter()
            .map(|cpu| (cpu.name.clone(), Self::new(bus.clone(), cpu.address)))
            .collect()
    }

    pub fn address(&self) -> u8 {
        self.addr
    }

    pub fn units(&self) -> Option<UnitScale> {
        self.units
    }

    pub fn counters(&self) -> &EnergyCounterState {
        &self.counters
    }

    fn rd_pkg_config(&self, index: u8, param: u16) -> Result<PkgConfigResponse, PeciError> {
        let bytes = self
            .bus
            .rd_pkg_config(self.addr, index, param, peci::RESPONSE_LEN)?;
        PkgConfigResponse::decode(index, &bytes).inspect_err(|e| {
            error!(addr = %format!("0x{:02X}", self.addr), index, error = %e, "RdPkgConfig failed");
        })
    }

    fn unit_scale(&mut self) -> Result<UnitScale, PeciError> {
        if let Some(units) = self.units {
            return Ok(units);
        }
        let raw = self.rd_pkg_config(peci::IDX_PWR_SKU_UNIT, 0)?.data();
        let units = UnitScale::from_raw(raw);
        debug!(addr = %format!("0x{:02X}", self.addr), ?units, "Power SKU units latched");
        self.units = Some(units);
        Ok(units)
    }

    /// Average package power since the previous call.
    pub fn read_energy_rate(&mut self) -> Result<EnergySample, PeciError> {
        let energy = self.rd_pkg_config(peci::IDX_PKG_ENERGY, peci::PARAM_PKG)?.data();
        let run_time = self.rd_pkg_config(peci::IDX_RUN_TIME, 0)?.data();
        let units = self.unit_scale()?;

        let Some((diff_energy, diff_time)) = self.counters.update(energy, run_time) else {
            debug!(addr = %format!("0x{:02X}", self.addr), "CPU power first read");
            return Ok(EnergySample::NotReady);
        };
        if diff_time == 0 {
            debug!(addr = %format!("0x{:02X}", self.addr), "CPU power time elapsed is zero");
            return Ok(EnergySample::NotReady);
        }

        let watts = diff_energy as f32 / diff_time as f32 * units.power_scale();
        Ok(EnergySample::Ready(Watts(watts)))
    }

    pub fn read_tjmax(&mut self) -> Result<Celsius, PeciError> {
        let r = self.rd_pkg_config(peci::IDX_TJMAX, 0)?;
        Ok(Celsius(f32::from(r.byte(3))))
    }

    /// Distance to TjMax, negative below it.
    pub fn read_margin(&mut self) -> Result<Celsius, PeciError> {
        let r = self.rd_pkg_config(peci::IDX_PKG_TEMP, peci::PARAM_PKG)?;
        let margin = (r.low_i16() >> 6) + 1;
        Ok(Celsius(f32::from(margin)))
    }

    /// Package temperature: TjMax plus margin.
    pub fn read_temperature(&mut self) -> Result<Celsius, PeciError> {
        let tjmax = self.read_tjmax()?;
        let margin = self.read_margin()?;
        Ok(Celsius(tjmax.0 + margin.0))
    }

    pub fn read_dimm_temperature(&mut self, channel: u8, slot: u8) -> Result<Celsius, PeciError> {
        if channel >= peci::DIMM_CHANNELS || slot >= peci::DIMM_SLOTS {
            debug!(channel, slot, "Unsupported PECI DIMM channel");
            return Err(PeciError::Unsupported(format!(
                "DIMM channel {channel} slot {slot}"
            )));
        }
        let r = self.rd_pkg_config(peci::IDX_DIMM_TEMP, u16::from(channel))?;
        Ok(Celsius(f32::from(r.byte(usize::from(slot) + 1))))
    }

    /// Read one sensor. `None` while the power reading is warming up.
    pub fn read(&mut self, sensor: PeciSensor) -> Result<Option<Reading>, PeciError> {
        let reading = match sensor {
            PeciSensor::Power => match self.read_energy_rate()? {
                EnergySample::Ready(w) => Reading::Power(w),
                EnergySample::NotReady => return Ok(None),
            },
            PeciSensor::Temperature => Reading::Temperature(self.read_temperature()?),
            PeciSensor::Margin => Reading::Temperature(self.read_margin()?),
            PeciSensor::TjMax => Reading::Temperature(self.read_tjmax()?),
            PeciSensor::Dimm { channel, slot } => {
                Reading::Temperature(self.read_dimm_temperature(channel, slot)?)
            }
        };
        Ok(Some(reading))
    }
}
