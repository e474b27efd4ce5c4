//! Transport layer module.

pub mod mock;
pub mod paged;
pub mod traits;

pub use mock::MockBus;
pub use paged::{PagedTransport, TransportPolicy};
pub use traits::{I2cBus, TransportError};
