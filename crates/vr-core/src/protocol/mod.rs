//! PMBus protocol definitions: command codes, numeric formats and the
//! static register descriptions shared by every chip family.

pub mod constants;
pub mod linear11;
pub mod register;

pub use linear11::{Linear11, ULinear16, VOutMode};
pub use register::{Encoding, PagedRegister, StatusRegister};
