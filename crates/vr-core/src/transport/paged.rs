//! Paged register access with bounded retry.
//!
//! Every PMBus access goes through a `PagedTransport` bound to one device.
//! Page selection is a write of register 0x00 followed by a settle delay;
//! bus-level failures are retried up to the configured bound, device
//! rejections are surfaced immediately.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace, warn};

use super::traits::{I2cBus, TransportError};
use crate::config::TransportConfig;
use crate::protocol::PagedRegister;
use crate::protocol::constants::pmbus;
use crate::rail::DeviceHandle;

/// Retry and settle timing for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPolicy {
    /// Attempts per transaction, including the first.
    pub retries: u8,
    pub page_settle: Duration,
    pub commit_settle: Duration,
}

impl Default for TransportPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            page_settle: Duration::from_millis(100),
            commit_settle: Duration::from_millis(1000),
        }
    }
}

impl From<&TransportConfig> for TransportPolicy {
    fn from(cfg: &TransportConfig) -> Self {
        Self {
            retries: cfg.retries.max(1),
            page_settle: Duration::from_millis(cfg.page_settle_ms),
            commit_settle: Duration::from_millis(cfg.commit_settle_ms),
        }
    }
}

/// Register transport bound to a single paged device.
pub struct PagedTransport {
    bus: Arc<dyn I2cBus>,
    device: DeviceHandle,
    policy: TransportPolicy,
    page: Option<u8>,
}

impl PagedTransport {
    pub fn new(bus: Arc<dyn I2cBus>, device: DeviceHandle, policy: TransportPolicy) -> Self {
        Self {
            bus,
            device,
            policy,
            page: None,
        }
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn policy(&self) -> &TransportPolicy {
        &self.policy
    }

    /// The page written by the last successful `set_page`.
    pub fn page(&self) -> Option<u8> {
        self.page
    }

    /// Select `page` and wait for the device to settle.
    ///
    /// The write is always issued, even if `page` is believed to be current.
    pub fn set_page(&mut self, page: u8) -> Result<(), TransportError> {
        if page >= self.device.page_count {
            return Err(TransportError::InvalidPage {
                page,
                pages: self.device.page_count,
            });
        }
        self.page = None;
        let (bus, addr) = (self.device.bus, self.device.address);
        self.with_retry(pmbus::PAGE, |b| b.write(bus, addr, &[pmbus::PAGE, page]))?;
        trace!(device = %self.device.name, page, "Page selected");
        if !self.policy.page_settle.is_zero() {
            thread::sleep(self.policy.page_settle);
        }
        self.page = Some(page);
        Ok(())
    }

    /// Read `width` bytes from `reg` on the current page.
    pub fn read_reg(&mut self, reg: u8, width: usize) -> Result<Vec<u8>, TransportError> {
        let (bus, addr) = (self.device.bus, self.device.address);
        let bytes = self.with_retry(reg, |b| b.write_read(bus, addr, &[reg], width))?;
        if bytes.len() < width {
            return Err(TransportError::ShortRead {
                reg,
                expected: width,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    pub fn read_byte(&mut self, reg: u8) -> Result<u8, TransportError> {
        Ok(self.read_reg(reg, 1)?[0])
    }

    pub fn read_word(&mut self, reg: u8) -> Result<u16, TransportError> {
        let bytes = self.read_reg(reg, 2)?;
        Ok(LittleEndian::read_u16(&bytes))
    }

    /// Write `data` to `reg` on the current page.
    pub fn write_reg(&mut self, reg: u8, data: &[u8]) -> Result<(), TransportError> {
        let (bus, addr) = (self.device.bus, self.device.address);
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(reg);
        frame.extend_from_slice(data);
        self.with_retry(reg, |b| b.write(bus, addr, &frame))
    }

    pub fn write_word(&mut self, reg: u8, value: u16) -> Result<(), TransportError> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.write_reg(reg, &buf)
    }

    /// Issue a data-less command such as CLEAR_FAULTS or STORE.
    pub fn send_byte(&mut self, cmd: u8) -> Result<(), TransportError> {
        let (bus, addr) = (self.device.bus, self.device.address);
        self.with_retry(cmd, |b| b.write(bus, addr, &[cmd]))
    }

    /// Read a described register as a little-endian integer, selecting its
    /// fixed page first when it has one.
    pub fn read_register(&mut self, reg: &PagedRegister) -> Result<u32, TransportError> {
        if let Some(page) = reg.page {
            self.set_page(page)?;
        }
        let bytes = self.read_reg(reg.addr, reg.width)?;
        Ok(LittleEndian::read_uint(&bytes, reg.width) as u32)
    }

    /// Write a described register from the low `width` bytes of `value`.
    pub fn write_register(&mut self, reg: &PagedRegister, value: u32) -> Result<(), TransportError> {
        if let Some(page) = reg.page {
            self.set_page(page)?;
        }
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_reg(reg.addr, &buf[..reg.width])
    }

    /// Wait out the post-commit settle after a non-volatile store.
    pub fn settle_after_commit(&self) {
        debug!(
            device = %self.device.name,
            settle_ms = self.policy.commit_settle.as_millis() as u64,
            "Waiting for NVM commit"
        );
        if !self.policy.commit_settle.is_zero() {
            thread::sleep(self.policy.commit_settle);
        }
    }

    fn with_retry<T>(
        &self,
        reg: u8,
        mut op: impl FnMut(&dyn I2cBus) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let attempts = self.policy.retries.max(1);
        let mut attempt = 1;
        loop {
            match op(self.bus.as_ref()) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(
                        device = %self.device.name,
                        reg = %format!("0x{:02X}", reg),
                        attempt,
                        error = %e,
                        "Transient bus error, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        device = %self.device.name,
                        reg = %format!("0x{:02X}", reg),
                        attempts = attempt,
                        error = %e,
                        "Bus transaction failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipFamily;
    use crate::transport::mock::{BusOpKind, FaultKind, MockBus};

    fn transport(mock: &Arc<MockBus>, retries: u8) -> PagedTransport {
        let device = DeviceHandle::new("vr0", 1, 0x40, ChipFamily::Mp2891);
        let policy = TransportPolicy {
            retries,
            page_settle: Duration::ZERO,
            commit_settle: Duration::ZERO,
        };
        PagedTransport::new(mock.clone(), device, policy)
    }

    #[test]
    fn test_page_select_is_register_zero() {
        let mock = Arc::new(MockBus::new());
        let mut t = transport(&mock, 3);
        t.set_page(1).unwrap();
        assert_eq!(t.page(), Some(1));
        assert_eq!(mock.page_of(1, 0x40), Some(1));

        let ops = mock.ops();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0].kind, BusOpKind::Write { data } if data == &vec![0x00, 0x01]));
    }

    #[test]
    fn test_page_out_of_range() {
        let mock = Arc::new(MockBus::new());
        let mut t = transport(&mock, 3);
        assert!(matches!(
            t.set_page(3),
            Err(TransportError::InvalidPage { page: 3, pages: 3 })
        ));
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn test_retry_on_nack() {
        let mock = Arc::new(MockBus::new());
        mock.set_register(1, 0x40, 0, 0x8B, &[0x34, 0x12]);
        mock.fail_next(1, 0x40, FaultKind::Nack, 2);

        let mut t = transport(&mock, 3);
        assert_eq!(t.read_word(0x8B).unwrap(), 0x1234);
        assert_eq!(mock.ops().len(), 3);
    }

    #[test]
    fn test_retry_bound() {
        let mock = Arc::new(MockBus::new());
        mock.set_register(1, 0x40, 0, 0x8B, &[0x34, 0x12]);
        mock.fail_next(1, 0x40, FaultKind::Timeout, 5);

        let mut t = transport(&mock, 3);
        assert!(matches!(t.read_word(0x8B), Err(TransportError::Timeout { .. })));
        assert_eq!(mock.ops().len(), 3);
    }

    #[test]
    fn test_no_retry_on_rejection() {
        let mock = Arc::new(MockBus::new());
        mock.fail_next(1, 0x40, FaultKind::Rejected, 1);

        let mut t = transport(&mock, 5);
        assert!(matches!(
            t.write_word(0x21, 0x0140),
            Err(TransportError::Rejected { .. })
        ));
        assert_eq!(mock.ops().len(), 1);
    }

    #[test]
    fn test_fixed_page_register() {
        let mock = Arc::new(MockBus::new());
        mock.set_register(1, 0x40, 2, 0x93, &[0x91, 0x28]);

        let mut t = transport(&mock, 3);
        let reg = PagedRegister::fixed(2, 0x93, crate::protocol::Encoding::Raw, 2);
        assert_eq!(t.read_register(&reg).unwrap(), 0x2891);
        assert_eq!(t.page(), Some(2));
    }

    #[test]
    fn test_short_read() {
        let mock = Arc::new(MockBus::new());
        mock.set_register(1, 0x40, 0, 0x99, &[0x03, 0x53]);

        let mut t = transport(&mock, 3);
        assert!(matches!(
            t.read_reg(0x99, 4),
            Err(TransportError::ShortRead {
                expected: 4,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_page_select_waits_for_settle() {
        let mock = Arc::new(MockBus::new());
        let device = DeviceHandle::new("vr0", 1, 0x40, ChipFamily::Mp2891);
        let policy = TransportPolicy {
            retries: 3,
            page_settle: Duration::from_millis(20),
            commit_settle: Duration::from_millis(30),
        };
        let mut t = PagedTransport::new(mock.clone(), device, policy);

        let start = std::time::Instant::now();
        t.set_page(1).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));

        // Register access on the selected page does not settle again.
        let start = std::time::Instant::now();
        t.write_word(0x21, 0x0140).unwrap();
        assert!(start.elapsed() < Duration::from_millis(20));

        let start = std::time::Instant::now();
        t.settle_after_commit();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(mock.write_count(), 2);
    }
}
