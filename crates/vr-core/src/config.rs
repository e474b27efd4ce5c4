//! Board description: VR devices, the rails they supply, CPU packages and
//! the transport timing policy. Loaded from TOML.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chip::ChipFamily;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No rails configured")]
    NoRails,

    #[error("Duplicate rail name '{0}'")]
    DuplicateRail(String),

    #[error("Duplicate device name '{0}'")]
    DuplicateDevice(String),

    #[error("Rail '{rail}' references unknown device '{device}'")]
    UnknownDevice { rail: String, device: String },

    #[error("Rail '{rail}' page {page} exceeds {family} page count {pages}")]
    PageOutOfRange {
        rail: String,
        page: u8,
        family: ChipFamily,
        pages: u8,
    },

    #[error("Devices '{first}' and '{second}' share bus {bus} address 0x{address:02X}")]
    DuplicateAddress {
        first: String,
        second: String,
        bus: u8,
        address: u8,
    },

    #[error("Retries must be between 1 and 5, got {0}")]
    Retries(u8),

    #[error("Lock timeout must be non-zero")]
    LockTimeout,

    #[error("Duplicate CPU address 0x{0:02X}")]
    DuplicateCpu(u8),
}

/// Retry and settle timing shared by every VR device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Attempts per bus transaction, including the first.
    pub retries: u8,
    /// Delay after every page-select write.
    pub page_settle_ms: u64,
    /// Delay after a non-volatile store.
    pub commit_settle_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            page_settle_ms: 100,
            commit_settle_ms: 1000,
        }
    }
}

/// One physical VR controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub family: ChipFamily,
    pub bus: u8,
    pub address: u8,
    /// Expected device id, for families whose id varies by revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
}

/// One logical rail: a page on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailConfig {
    pub name: String,
    pub device: String,
    #[serde(default)]
    pub page: u8,
    /// Non-adjustable rails are skipped when capturing defaults and refuse
    /// voltage changes.
    #[serde(default = "default_true")]
    pub adjustable: bool,
}

/// A CPU package reachable over PECI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuConfig {
    pub name: String,
    pub address: u8,
}

fn default_true() -> bool {
    true
}

fn default_lock_timeout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Bound on waiting for a device lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub rails: Vec<RailConfig>,
    #[serde(default)]
    pub cpus: Vec<CpuConfig>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            transport: TransportConfig::default(),
            devices: Vec::new(),
            rails: Vec::new(),
            cpus: Vec::new(),
        }
    }
}

impl BoardConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: BoardConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Check the cross references a coordinator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rails.is_empty() {
            return Err(ConfigError::NoRails);
        }
        if !(1..=5).contains(&self.transport.retries) {
            return Err(ConfigError::Retries(self.transport.retries));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::LockTimeout);
        }

        let mut names = HashSet::new();
        for (i, dev) in self.devices.iter().enumerate() {
            if !names.insert(dev.name.as_str()) {
                return Err(ConfigError::DuplicateDevice(dev.name.clone()));
            }
            if let Some(other) = self.devices[..i]
                .iter()
                .find(|o| o.bus == dev.bus && o.address == dev.address)
            {
                return Err(ConfigError::DuplicateAddress {
                    first: other.name.clone(),
                    second: dev.name.clone(),
                    bus: dev.bus,
                    address: dev.address,
                });
            }
        }

        let mut rails = HashSet::new();
        for rail in &self.rails {
            if !rails.insert(rail.name.as_str()) {
                return Err(ConfigError::DuplicateRail(rail.name.clone()));
            }
            let dev = self
                .device(&rail.device)
                .ok_or_else(|| ConfigError::UnknownDevice {
                    rail: rail.name.clone(),
                    device: rail.device.clone(),
                })?;
            let pages = dev.family.page_count();
            if rail.page >= pages {
                return Err(ConfigError::PageOutOfRange {
                    rail: rail.name.clone(),
                    page: rail.page,
                    family: dev.family,
                    pages,
                });
            }
        }

        let mut cpus = HashSet::new();
        for cpu in &self.cpus {
            if !cpus.insert(cpu.address) {
                return Err(ConfigError::DuplicateCpu(cpu.address));
            }
        }
        Ok(())
    }

    /// A small board with one controller of each family.
    pub fn example() -> Self {
        let device = |name: &str, family, bus, address| DeviceConfig {
            name: name.to_string(),
            family,
            bus,
            address,
            device_id: None,
        };
        let rail = |name: &str, device: &str, page, adjustable| RailConfig {
            name: name.to_string(),
            device: device.to_string(),
            page,
            adjustable,
        };
        Self {
            devices: vec![
                device("vr_osfp", ChipFamily::Raa228249, 4, 0x60),
                device("vr_pvdd", ChipFamily::Mp2891, 4, 0x5C),
                device("vr_hbm", ChipFamily::Mp29816a, 5, 0x4E),
            ],
            rails: vec![
                rail("OSFP_P3V3", "vr_osfp", 0, false),
                rail("CPU_P0V85_PVDD", "vr_pvdd", 0, true),
                rail("CPU_P0V75_PVDD_CH_N", "vr_pvdd", 1, true),
                rail("CPU_P1V8_VPP_HBM", "vr_hbm", 0, true),
                rail("CPU_P0V4_VDDQL_HBM", "vr_hbm", 1, true),
            ],
            cpus: vec![CpuConfig {
                name: "cpu0".to_string(),
                address: 0x30,
            }],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg: BoardConfig = toml::from_str(
            r#"
            [[devices]]
            name = "vr0"
            family = "mp2891"
            bus = 1
            address = 0x40

            [[rails]]
            name = "VDDCR"
            device = "vr0"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.lock_timeout(), Duration::from_millis(1000));
        assert_eq!(cfg.transport, TransportConfig::default());
        assert_eq!(cfg.rails[0].page, 0);
        assert!(cfg.rails[0].adjustable);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_example_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.toml");

        let cfg = BoardConfig::example();
        cfg.validate().unwrap();
        cfg.save_to_file(&path).unwrap();
        assert_eq!(BoardConfig::load_from_file(&path).unwrap(), cfg);
    }

    #[test]
    fn test_validate_rejects_bad_references() {
        let mut cfg = BoardConfig::example();
        cfg.rails[1].device = "missing".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::UnknownDevice { .. })));

        let mut cfg = BoardConfig::example();
        cfg.rails[0].page = 2;
        assert!(matches!(cfg.validate(), Err(ConfigError::PageOutOfRange { pages: 2, .. })));

        let mut cfg = BoardConfig::example();
        cfg.rails[2].name = cfg.rails[1].name.clone();
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateRail(_))));

        let mut cfg = BoardConfig::example();
        cfg.devices[1].address = 0x60;
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicateAddress { .. })));

        let mut cfg = BoardConfig::example();
        cfg.transport.retries = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Retries(0))));

        assert!(matches!(BoardConfig::default().validate(), Err(ConfigError::NoRails)));
    }

    #[test]
    fn test_sample_board_matches_example() {
        let cfg: BoardConfig =
            toml::from_str(include_str!("../../../config/board.example.toml")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg, BoardConfig::example());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BoardConfig::load_from_file(dir.path().join("nope.toml")).is_err());
    }
}
