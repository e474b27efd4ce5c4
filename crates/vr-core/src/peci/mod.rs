//! PECI sideband telemetry for CPU packages.

pub mod bus;
pub mod engine;
pub mod mock;

pub use bus::{CompletionCode, PeciBus, PeciError, PkgConfigResponse};
pub use engine::{EnergyCounterState, EnergySample, PeciSensor, PeciTelemetry, UnitScale};
pub use mock::MockPeci;
