//! Firmware images and the flash sequence that programs them.

pub mod image;
pub mod sequencer;

pub use image::{Field, FirmwareImage, FirmwareRecord, ImageError};
pub use sequencer::{FlashReport, FlashSequencer};
