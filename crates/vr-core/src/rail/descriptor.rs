//! Static rail and device descriptors built from the board configuration.

use crate::chip::ChipFamily;

/// Addressing of one physical VR device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub name: String,
    pub bus: u8,
    pub address: u8,
    pub family: ChipFamily,
    pub page_count: u8,
}

impl DeviceHandle {
    pub fn new(name: impl Into<String>, bus: u8, address: u8, family: ChipFamily) -> Self {
        Self {
            name: name.into(),
            bus,
            address,
            family,
            page_count: family.page_count(),
        }
    }
}

/// One logical rail: a page of a device, plus the index of that device in
/// the coordinator's device table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailDescriptor {
    pub index: usize,
    pub name: String,
    pub family: ChipFamily,
    pub bus: u8,
    pub address: u8,
    pub page: u8,
    pub adjustable: bool,
    pub device: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_handle_page_count() {
        let dev = DeviceHandle::new("vr0", 4, 0x5C, ChipFamily::Mp2891);
        assert_eq!(dev.page_count, 3);
        let dev = DeviceHandle::new("vr1", 4, 0x60, ChipFamily::Raa228249);
        assert_eq!(dev.page_count, 2);
    }
}
