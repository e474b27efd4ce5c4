//! Logical rails and the coordinator that serializes access to them.

pub mod coordinator;
pub mod descriptor;

pub use coordinator::RailCoordinator;
pub use descriptor::{DeviceHandle, RailDescriptor};
