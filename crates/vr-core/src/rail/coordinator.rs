//! Rail coordinator: the single entry point for VR access.
//!
//! Rails are resolved to the physical device that supplies them. Each device
//! has one timed mutex shared by all of its rails, so page selection and the
//! register accesses that follow it are never interleaved with another
//! caller's.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::descriptor::{DeviceHandle, RailDescriptor};
use crate::chip::VrChip;
use crate::config::{BoardConfig, ConfigError};
use crate::error::VrError;
use crate::events::{TracingObserver, VrEvent, VrObserver};
use crate::firmware::{FlashReport, FlashSequencer};
use crate::protocol::StatusRegister;
use crate::transport::{I2cBus, PagedTransport, TransportPolicy};
use crate::units::{Quantity, Reading};

/// A physical device: its transport and the adapter for its family.
struct DeviceSlot {
    transport: PagedTransport,
    chip: Box<dyn VrChip>,
}

pub struct RailCoordinator<O: VrObserver> {
    rails: Vec<RailDescriptor>,
    devices: Vec<Mutex<DeviceSlot>>,
    defaults: Mutex<Vec<Option<u16>>>,
    lock_timeout: Duration,
    observer: Arc<O>,
}

impl RailCoordinator<TracingObserver> {
    /// Build a coordinator that logs events through tracing.
    pub fn new(config: &BoardConfig, bus: Arc<dyn I2cBus>) -> Result<Self, VrError> {
        Self::with_observer(config, bus, Arc::new(TracingObserver))
    }
}

impl<O: VrObserver + 'static> RailCoordinator<O> {
    pub fn with_observer(
        config: &BoardConfig,
        bus: Arc<dyn I2cBus>,
        observer: Arc<O>,
    ) -> Result<Self, VrError> {
        config.validate()?;
        let policy = TransportPolicy::from(&config.transport);

        let devices = config
            .devices
            .iter()
            .map(|dev| {
                let handle = DeviceHandle::new(&dev.name, dev.bus, dev.address, dev.family);
                Mutex::new(DeviceSlot {
                    transport: PagedTransport::new(bus.clone(), handle, policy),
                    chip: dev.family.adapter(dev.device_id),
                })
            })
            .collect();

        let rails = config
            .rails
            .iter()
            .enumerate()
            .map(|(index, rail)| {
                let device = config
                    .devices
                    .iter()
                    .position(|d| d.name == rail.device)
                    .ok_or_else(|| ConfigError::UnknownDevice {
                        rail: rail.name.clone(),
                        device: rail.device.clone(),
                    })?;
                let dev = &config.devices[device];
                Ok(RailDescriptor {
                    index,
                    name: rail.name.clone(),
                    family: dev.family,
                    bus: dev.bus,
                    address: dev.address,
                    page: rail.page,
                    adjustable: rail.adjustable,
                    device,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        info!(
            rails = rails.len(),
            devices = config.devices.len(),
            "Rail coordinator ready"
        );
        Ok(Self {
            defaults: Mutex::new(vec![None; rails.len()]),
            rails,
            devices,
            lock_timeout: config.lock_timeout(),
            observer,
        })
    }

    pub fn rail_count(&self) -> usize {
        self.rails.len()
    }

    pub fn rails(&self) -> &[RailDescriptor] {
        &self.rails
    }

    pub fn rail_name(&self, rail: usize) -> Option<&str> {
        self.rails.get(rail).map(|r| r.name.as_str())
    }

    /// Case-insensitive lookup of a rail index by name.
    pub fn rail_by_name(&self, name: &str) -> Option<usize> {
        self.rails
            .iter()
            .position(|r| r.name.eq_ignore_ascii_case(name))
    }

    fn descriptor(&self, rail: usize) -> Result<&RailDescriptor, VrError> {
        self.rails.get(rail).ok_or(VrError::RailNotFound(rail))
    }

    /// Run `f` with the rail's device locked and the rail's page selected.
    ///
    /// Several adapter calls made inside `f` are atomic with respect to other
    /// callers. Adapter operations on fixed pages (identity, version, store)
    /// move the page pointer; every call re-selects the rail page first, so
    /// no caller relies on a page left behind by another.
    pub fn with_rail<T>(
        &self,
        rail: usize,
        f: impl FnOnce(&mut dyn VrChip, &mut PagedTransport) -> Result<T, VrError>,
    ) -> Result<T, VrError> {
        let desc = self.descriptor(rail)?;
        let Some(mut slot) = self.devices[desc.device].try_lock_for(self.lock_timeout) else {
            let timeout_ms = self.lock_timeout.as_millis() as u64;
            self.observer.on_event(&VrEvent::LockTimeout {
                rail: desc.name.clone(),
                timeout_ms,
            });
            return Err(VrError::LockTimeout {
                rail: desc.name.clone(),
                timeout_ms,
            });
        };

        let DeviceSlot { transport, chip } = &mut *slot;
        transport.set_page(desc.page)?;
        f(chip.as_mut(), transport)
    }

    /// Current VOUT_COMMAND in millivolts.
    #[instrument(skip(self))]
    pub fn get_vout(&self, rail: usize) -> Result<u16, VrError> {
        self.with_rail(rail, |chip, t| chip.vout_command(t))
    }

    /// Program VOUT_COMMAND.
    ///
    /// With `use_default`, `millivolts` is ignored and the value captured by
    /// [`capture_defaults`](Self::capture_defaults) is written instead. With
    /// `persist`, the write is committed to non-volatile memory.
    #[instrument(skip(self))]
    pub fn set_vout(
        &self,
        rail: usize,
        millivolts: u16,
        use_default: bool,
        persist: bool,
    ) -> Result<(), VrError> {
        let desc = self.descriptor(rail)?;
        if !desc.adjustable {
            warn!(rail = %desc.name, "Rail is not adjustable");
            return Err(VrError::NotAdjustable(desc.name.clone()));
        }
        let millivolts = if use_default {
            let default = self.defaults.lock()[rail];
            let default = default.ok_or_else(|| VrError::NoDefault(desc.name.clone()))?;
            debug!(rail = %desc.name, millivolts = default, "Using default voltage");
            default
        } else {
            millivolts
        };

        self.with_rail(rail, |chip, t| {
            if persist && !chip.supports_store() {
                return Err(VrError::Unsupported {
                    family: chip.family(),
                    operation: "store",
                });
            }
            chip.set_vout_command(t, millivolts)?;
            if persist {
                chip.store(t)?;
                t.settle_after_commit();
            }
            Ok(())
        })?;

        self.observer.on_event(&VrEvent::VoutChanged {
            rail: desc.name.clone(),
            millivolts,
            persisted: persist,
        });
        Ok(())
    }

    /// Record the current VOUT_COMMAND of every adjustable rail as its
    /// default. Stops at the first rail that cannot be read.
    #[instrument(skip(self))]
    pub fn capture_defaults(&self) -> Result<usize, VrError> {
        let mut captured = vec![None; self.rails.len()];
        for rail in self.rails.iter().filter(|r| r.adjustable) {
            let mv = self.get_vout(rail.index).inspect_err(|e| {
                error!(rail = %rail.name, error = %e, "Can't read default voltage");
            })?;
            captured[rail.index] = Some(mv);
        }
        let count = captured.iter().flatten().count();
        *self.defaults.lock() = captured;
        self.observer.on_event(&VrEvent::DefaultsCaptured { count });
        Ok(count)
    }

    pub fn default_vout(&self, rail: usize) -> Option<u16> {
        self.defaults.lock().get(rail).copied().flatten()
    }

    /// Poll one telemetry quantity.
    #[instrument(skip(self))]
    pub fn read_sensor(&self, rail: usize, quantity: Quantity) -> Result<Reading, VrError> {
        self.with_rail(rail, |chip, t| chip.read(t, quantity))
    }

    pub fn get_vout_max(&self, rail: usize) -> Result<u16, VrError> {
        self.with_rail(rail, |chip, t| chip.vout_max(t))
    }

    #[instrument(skip(self))]
    pub fn set_vout_max(&self, rail: usize, millivolts: u16) -> Result<(), VrError> {
        self.with_rail(rail, |chip, t| chip.set_vout_max(t, millivolts))
    }

    pub fn get_vout_min(&self, rail: usize) -> Result<u16, VrError> {
        self.with_rail(rail, |chip, t| chip.vout_min(t))
    }

    #[instrument(skip(self))]
    pub fn set_vout_min(&self, rail: usize, millivolts: u16) -> Result<(), VrError> {
        self.with_rail(rail, |chip, t| chip.set_vout_min(t, millivolts))
    }

    pub fn fw_version(&self, rail: usize) -> Result<u32, VrError> {
        self.with_rail(rail, |chip, t| chip.fw_version(t))
    }

    pub fn vr_status(&self, rail: usize, which: StatusRegister) -> Result<u16, VrError> {
        self.with_rail(rail, |chip, t| chip.vr_status(t, which))
    }

    #[instrument(skip(self))]
    pub fn clear_vr_status(&self, rail: usize) -> Result<(), VrError> {
        self.with_rail(rail, |chip, t| chip.clear_vr_status(t))
    }

    pub fn remaining_writes(&self, rail: usize) -> Result<u8, VrError> {
        self.with_rail(rail, |chip, t| chip.remaining_writes(t))
    }

    pub fn verify_identity(&self, rail: usize) -> Result<(), VrError> {
        self.with_rail(rail, |chip, t| chip.verify_identity(t))
    }

    /// Program a firmware image into the device behind `rail`.
    ///
    /// The image is parsed before the device lock is taken; a malformed image
    /// never reaches the bus. The lock is then held from the page select
    /// through the post-commit settle.
    #[instrument(skip(self, image), fields(len = image.len()))]
    pub fn flash(&self, rail: usize, image: &[u8]) -> Result<FlashReport, VrError> {
        let desc = self.descriptor(rail)?;
        let mut seq = FlashSequencer::new(&desc.name, self.observer.as_ref());
        let parsed = seq.parse(desc.family, image)?;

        let result = self.with_rail(rail, |chip, t| seq.run(chip, t, &parsed));
        if result.is_err() {
            seq.abort();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::chip::ChipFamily;
    use crate::config::{DeviceConfig, RailConfig, TransportConfig};
    use crate::error::SensorStatus;
    use crate::events::FlashPhase;
    use crate::events::testutil::RecordingObserver;
    use crate::firmware::ImageError;
    use crate::protocol::constants::{mps, pmbus};
    use crate::transport::MockBus;
    use crate::units::Volts;

    const BUS: u8 = 1;
    const MP2891: u8 = 0x40;
    const MP29816A: u8 = 0x41;
    const RAA: u8 = 0x42;

    fn board() -> BoardConfig {
        let device = |name: &str, family, address| DeviceConfig {
            name: name.into(),
            family,
            bus: BUS,
            address,
            device_id: None,
        };
        let rail = |name: &str, device: &str, page, adjustable| RailConfig {
            name: name.into(),
            device: device.into(),
            page,
            adjustable,
        };
        BoardConfig {
            lock_timeout_ms: 50,
            transport: TransportConfig {
                retries: 3,
                page_settle_ms: 0,
                commit_settle_ms: 0,
            },
            devices: vec![
                device("pvdd", ChipFamily::Mp2891, MP2891),
                device("hbm", ChipFamily::Mp29816a, MP29816A),
                device("osfp", ChipFamily::Raa228249, RAA),
            ],
            rails: vec![
                rail("P0V85_PVDD", "pvdd", 0, true),
                rail("P0V75_PVDD_CH_N", "pvdd", 1, true),
                rail("P1V8_VPP_HBM", "hbm", 0, true),
                rail("OSFP_P3V3", "osfp", 0, false),
                rail("P1V2_VDDHTX", "osfp", 1, true),
            ],
            cpus: Vec::new(),
        }
    }

    fn seeded_bus() -> Arc<MockBus> {
        let mock = Arc::new(MockBus::new());
        for page in 0..2 {
            // 2.5 mV steps
            mock.set_word(BUS, MP2891, page, mps::MP2891_LOOP_CTRL, 0x2000);
            mock.set_word(BUS, MP2891, page, pmbus::VOUT_COMMAND, 320);
            mock.set_register(BUS, RAA, page, pmbus::VOUT_MODE, &[0x40]);
            mock.set_word(BUS, RAA, page, pmbus::VOUT_COMMAND, 3300);
        }
        // 1 mV steps
        mock.set_word(BUS, MP29816A, 0, pmbus::VOUT_SCALE_LOOP, 4 << 10);
        mock.set_word(BUS, MP29816A, 0, pmbus::VOUT_COMMAND, 1800);
        mock
    }

    fn coordinator(mock: &Arc<MockBus>) -> RailCoordinator<RecordingObserver> {
        RailCoordinator::with_observer(&board(), mock.clone(), Arc::new(RecordingObserver::default()))
            .unwrap()
    }

    #[test]
    fn test_set_then_get_per_family() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);

        for (rail, mv) in [(0, 850), (1, 750), (2, 1100), (4, 1200)] {
            vr.set_vout(rail, mv, false, false).unwrap();
            assert_eq!(vr.get_vout(rail).unwrap(), mv, "rail {rail}");
        }
        // Pages of one device hold independent settings.
        assert_eq!(mock.word(BUS, MP2891, 0, pmbus::VOUT_COMMAND), Some(340));
        assert_eq!(mock.word(BUS, MP2891, 1, pmbus::VOUT_COMMAND), Some(300));
    }

    #[test]
    fn test_every_call_selects_rail_page() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);

        vr.get_vout(1).unwrap();
        let ops = mock.ops();
        assert!(ops[0].is_page_select());
        assert!(matches!(&ops[0].kind, crate::transport::mock::BusOpKind::Write { data } if data[1] == 1));
    }

    #[test]
    fn test_defaults_skip_non_adjustable() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);

        assert_eq!(vr.capture_defaults().unwrap(), 4);
        assert_eq!(vr.default_vout(0), Some(800));
        assert_eq!(vr.default_vout(3), None);

        vr.set_vout(0, 900, false, false).unwrap();
        vr.set_vout(0, 0, true, false).unwrap();
        assert_eq!(vr.get_vout(0).unwrap(), 800);
        assert!(
            vr.observer
                .events()
                .contains(&VrEvent::DefaultsCaptured { count: 4 })
        );
    }

    #[test]
    fn test_default_before_capture() {
        let vr = coordinator(&seeded_bus());
        let err = vr.set_vout(0, 0, true, false).unwrap_err();
        assert!(matches!(err, VrError::NoDefault(_)));
        assert_eq!(SensorStatus::from(&err), SensorStatus::InitFailure);
    }

    #[test]
    fn test_non_adjustable_rail_rejected() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);
        assert!(matches!(
            vr.set_vout(3, 3300, false, false),
            Err(VrError::NotAdjustable(_))
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn test_persist_stores() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);

        vr.set_vout(1, 800, false, true).unwrap();
        assert_eq!(mock.commands(BUS, MP2891), vec![mps::STORE]);
        assert!(vr.observer.events().contains(&VrEvent::VoutChanged {
            rail: "P0V75_PVDD_CH_N".into(),
            millivolts: 800,
            persisted: true,
        }));

        // No NVM store on this family: nothing is written.
        mock.clear_ops();
        assert!(matches!(
            vr.set_vout(4, 1000, false, true),
            Err(VrError::Unsupported { .. })
        ));
        assert_eq!(mock.word(BUS, RAA, 1, pmbus::VOUT_COMMAND), Some(3300));
    }

    #[test]
    fn test_unknown_rail() {
        let vr = coordinator(&seeded_bus());
        let result = vr.get_vout(9);
        assert!(matches!(result, Err(VrError::RailNotFound(9))));
        assert_eq!(SensorStatus::from_result(&result), SensorStatus::NotFound);
        assert_eq!(vr.rail_name(9), None);
    }

    #[test]
    fn test_rail_lookup() {
        let vr = coordinator(&seeded_bus());
        assert_eq!(vr.rail_count(), 5);
        assert_eq!(vr.rail_by_name("p1v8_vpp_hbm"), Some(2));
        assert_eq!(vr.rail_by_name("P5V"), None);
        assert_eq!(vr.rail_name(3), Some("OSFP_P3V3"));
        assert_eq!(vr.rails()[1].page, 1);
        assert_eq!(vr.rails()[1].device, vr.rails()[0].device);
    }

    #[test]
    fn test_read_sensor() {
        let mock = seeded_bus();
        mock.set_word(BUS, MP29816A, 0, pmbus::READ_VOUT, 1795);
        let vr = coordinator(&mock);

        let reading = vr.read_sensor(2, Quantity::Vout).unwrap();
        let Reading::Voltage(Volts(v)) = reading else {
            panic!("unexpected reading {reading:?}");
        };
        assert!((v - 1.795).abs() < 1e-6);

        // Unseeded register: the device NACKs every attempt.
        let result = vr.read_sensor(2, Quantity::Iout);
        assert_eq!(SensorStatus::from_result(&result), SensorStatus::AccessFailure);
    }

    #[test]
    fn test_lock_timeout() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            s.spawn(|| {
                vr.with_rail(0, |_, _| {
                    tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(300));
                    Ok(())
                })
                .unwrap();
            });

            rx.recv().unwrap();
            let start = Instant::now();
            // Same device, different rail.
            let err = vr.get_vout(1).unwrap_err();
            assert!(start.elapsed() < Duration::from_millis(250));
            assert!(matches!(err, VrError::LockTimeout { timeout_ms: 50, .. }));
            assert!(err.is_transient());

            // Other devices are not blocked.
            assert_eq!(vr.get_vout(2).unwrap(), 1800);
        });
    }

    #[test]
    fn test_concurrent_access_never_interleaves() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);

        thread::scope(|s| {
            for rail in [0, 1] {
                let vr = &vr;
                s.spawn(move || {
                    for i in 0..50u16 {
                        let mv = 700 + (i % 8) * 25;
                        // A short lock timeout may expire under contention.
                        match vr.set_vout(rail, mv, false, false) {
                            Ok(()) | Err(VrError::LockTimeout { .. }) => {}
                            Err(e) => panic!("{e}"),
                        }
                        let _ = vr.get_vout(rail);
                    }
                });
            }
        });

        let mut owner = None;
        for op in mock.ops().iter().filter(|op| op.addr == MP2891) {
            if op.is_page_select() {
                owner = Some(op.thread);
            } else {
                assert_eq!(Some(op.thread), owner, "access interleaved with another thread's page");
            }
        }
    }

    #[test]
    fn test_flash_holds_lock_and_reports() {
        let mock = seeded_bus();
        mock.set_register(BUS, MP2891, 0, pmbus::MFR_ID, &[0x03, 0x53, 0x50, 0x4D]);
        mock.set_word(BUS, MP2891, 2, mps::MP2891_DEVICE_ID_REG, 0x2891);
        let vr = coordinator(&mock);

        let image = b"2891\t0\t21\t33\tVOUT_COMMAND\t0154\t340\r\n\
                      2891\t1\t21\t33\tVOUT_COMMAND\t012C\t300\r\n";
        let report = vr.flash(1, image).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(vr.get_vout(0).unwrap(), 850);
        assert_eq!(vr.get_vout(1).unwrap(), 750);

        assert!(matches!(vr.flash(3, image), Err(VrError::Unsupported { .. })));
    }

    #[test]
    fn test_invalid_board_rejected() {
        let mut cfg = board();
        cfg.rails[0].page = 5;
        let result = RailCoordinator::new(&cfg, Arc::new(MockBus::new()));
        assert!(matches!(result, Err(VrError::Config(ConfigError::PageOutOfRange { .. }))));
    }

    #[test]
    fn test_malformed_flash_never_selects_page() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);

        let err = vr.flash(1, b"2891\t0\t2G\t33\tX\t0140\t320\r\n").unwrap_err();
        assert!(matches!(err, VrError::Image(ImageError::InvalidHex { byte: b'G', .. })));
        assert_eq!(mock.write_count(), 0);
        assert!(mock.ops().is_empty());

        let err = vr
            .flash(1, b"2891\t0\t40\t0\tX\t0001\t1\r\n2891\t7\t41\t0\tX\t0001\t1\r\n")
            .unwrap_err();
        assert!(matches!(err, VrError::Image(ImageError::PageOutOfRange { page: 7, .. })));
        assert_eq!(mock.write_count(), 0);

        let phases: Vec<FlashPhase> = vr
            .observer
            .events()
            .iter()
            .filter_map(|e| match e {
                VrEvent::FlashPhaseChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                FlashPhase::Parsing,
                FlashPhase::Failed,
                FlashPhase::Parsing,
                FlashPhase::Failed
            ]
        );
    }

    #[test]
    fn test_flash_lock_timeout_fails_sequence() {
        let mock = seeded_bus();
        let vr = coordinator(&mock);
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            s.spawn(|| {
                vr.with_rail(0, |_, _| {
                    tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(300));
                    Ok(())
                })
                .unwrap();
            });

            rx.recv().unwrap();
            let err = vr
                .flash(1, b"2891\t0\t21\t33\tVOUT_COMMAND\t0154\t340\r\n")
                .unwrap_err();
            assert!(matches!(err, VrError::LockTimeout { .. }));
        });

        let last = vr.observer.events().into_iter().rev().find_map(|e| match e {
            VrEvent::FlashPhaseChanged { to, .. } => Some(to),
            _ => None,
        });
        assert_eq!(last, Some(FlashPhase::Failed));
    }

    #[test]
    fn test_persist_waits_for_commit_settle() {
        let mock = seeded_bus();
        let mut cfg = board();
        cfg.transport.commit_settle_ms = 30;
        let vr = RailCoordinator::new(&cfg, mock.clone()).unwrap();

        let start = Instant::now();
        vr.set_vout(0, 850, false, true).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(mock.commands(BUS, MP2891), vec![mps::STORE]);

        let start = Instant::now();
        vr.set_vout(0, 800, false, false).unwrap();
        assert!(start.elapsed() < Duration::from_millis(30));
    }
}
