//! VR-Core: PMBus voltage-regulator management for BMC firmware.
//!
//! This crate drives multi-rail VR controllers over a paged register bus and
//! reads CPU package telemetry over PECI.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: PMBus constants, Linear11/ULINEAR16, register descriptors
//! - **Transport**: Paged register access with retry (bus trait, mock)
//! - **Chip**: Per-family adapters (MP2891, MP29816A, RAA228249)
//! - **Firmware**: Text image parser and flash sequencer
//! - **Rail**: Rail descriptors and the locking coordinator
//! - **PECI**: Package power and temperature engine
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vr_core::{BoardConfig, MockBus, RailCoordinator};
//!
//! let config = BoardConfig::load_from_file("board.toml").expect("config");
//! let vr = RailCoordinator::new(&config, Arc::new(MockBus::new())).expect("coordinator");
//!
//! let rail = vr.rail_by_name("CPU_P0V85_PVDD").expect("rail");
//! vr.set_vout(rail, 850, false, false).expect("set vout");
//! ```

pub mod chip;
pub mod config;
pub mod error;
pub mod events;
pub mod firmware;
pub mod peci;
pub mod protocol;
pub mod rail;
pub mod transport;
pub mod units;

// Re-exports for convenience
pub use chip::{ChipFamily, VoutSetting, VrChip};
pub use config::{BoardConfig, ConfigError, CpuConfig, DeviceConfig, RailConfig, TransportConfig};
pub use error::{ErrorKind, SensorStatus, VrError};
pub use events::{FlashPhase, NullObserver, TracingObserver, VrEvent, VrObserver};
pub use firmware::{FirmwareImage, FirmwareRecord, FlashReport, FlashSequencer, ImageError};
pub use peci::{EnergySample, MockPeci, PeciBus, PeciError, PeciSensor, PeciTelemetry};
pub use protocol::{Linear11, PagedRegister, StatusRegister};
pub use rail::{DeviceHandle, RailCoordinator, RailDescriptor};
pub use transport::{I2cBus, MockBus, PagedTransport, TransportError, TransportPolicy};
pub use units::{Amperes, Celsius, Quantity, Reading, Volts, Watts};
