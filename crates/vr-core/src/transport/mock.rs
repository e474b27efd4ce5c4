//! In-memory PMBus bus for testing.
//!
//! Simulates any number of paged devices keyed by (bus, address). Writes to
//! register 0x00 move the device's page pointer; other writes land in a
//! register map keyed by (page, register). Every transaction is logged with
//! the issuing thread so ordering properties can be checked afterwards.

use std::collections::{HashMap, VecDeque};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use super::traits::{I2cBus, TransportError};
use crate::protocol::constants::pmbus;

/// Failure to inject on upcoming transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Nack,
    Timeout,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOpKind {
    Write { data: Vec<u8> },
    Read { reg: u8, len: usize },
}

/// One logged bus transaction.
#[derive(Debug, Clone)]
pub struct BusOp {
    pub thread: ThreadId,
    pub bus: u8,
    pub addr: u8,
    pub kind: BusOpKind,
    pub ok: bool,
}

impl BusOp {
    pub fn is_page_select(&self) -> bool {
        matches!(&self.kind, BusOpKind::Write { data } if data.len() == 2 && data[0] == pmbus::PAGE)
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, BusOpKind::Write { .. })
    }
}

#[derive(Default)]
struct SimDevice {
    page: u8,
    registers: HashMap<(u8, u8), Vec<u8>>,
    commands: Vec<u8>,
}

struct Fault {
    kind: FaultKind,
    remaining: usize,
    /// Only fail writes to this register, after skipping `skip` of them.
    write_reg: Option<u8>,
    skip: usize,
}

#[derive(Default)]
struct MockState {
    devices: HashMap<(u8, u8), SimDevice>,
    faults: HashMap<(u8, u8), VecDeque<Fault>>,
    log: Vec<BusOp>,
}

/// Mock bus for unit testing adapters, the flash sequencer and the coordinator.
pub struct MockBus {
    state: Mutex<MockState>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    /// Seed `reg` on `page` of the device at (bus, addr).
    pub fn set_register(&self, bus: u8, addr: u8, page: u8, reg: u8, data: &[u8]) {
        self.state
            .lock()
            .devices
            .entry((bus, addr))
            .or_default()
            .registers
            .insert((page, reg), data.to_vec());
    }

    pub fn set_word(&self, bus: u8, addr: u8, page: u8, reg: u8, value: u16) {
        self.set_register(bus, addr, page, reg, &value.to_le_bytes());
    }

    pub fn register(&self, bus: u8, addr: u8, page: u8, reg: u8) -> Option<Vec<u8>> {
        self.state
            .lock()
            .devices
            .get(&(bus, addr))
            .and_then(|d| d.registers.get(&(page, reg)).cloned())
    }

    pub fn word(&self, bus: u8, addr: u8, page: u8, reg: u8) -> Option<u16> {
        self.register(bus, addr, page, reg)
            .filter(|b| b.len() >= 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Current page pointer of a device that has been touched.
    pub fn page_of(&self, bus: u8, addr: u8) -> Option<u8> {
        self.state.lock().devices.get(&(bus, addr)).map(|d| d.page)
    }

    /// Single-byte commands (STORE, CLEAR_FAULTS) received by a device.
    pub fn commands(&self, bus: u8, addr: u8) -> Vec<u8> {
        self.state
            .lock()
            .devices
            .get(&(bus, addr))
            .map(|d| d.commands.clone())
            .unwrap_or_default()
    }

    /// Fail the next `count` transactions to the device.
    pub fn fail_next(&self, bus: u8, addr: u8, kind: FaultKind, count: usize) {
        self.push_fault(
            bus,
            addr,
            Fault {
                kind,
                remaining: count,
                write_reg: None,
                skip: 0,
            },
        );
    }

    /// Fail writes to `reg` once `skip` of them have gone through.
    pub fn fail_write_after(&self, bus: u8, addr: u8, reg: u8, skip: usize, kind: FaultKind) {
        self.push_fault(
            bus,
            addr,
            Fault {
                kind,
                remaining: usize::MAX,
                write_reg: Some(reg),
                skip,
            },
        );
    }

    fn push_fault(&self, bus: u8, addr: u8, fault: Fault) {
        self.state
            .lock()
            .faults
            .entry((bus, addr))
            .or_default()
            .push_back(fault);
    }

    /// All logged transactions, in order.
    pub fn ops(&self) -> Vec<BusOp> {
        self.state.lock().log.clone()
    }

    /// Number of write transactions attempted, page selects included.
    pub fn write_count(&self) -> usize {
        self.state.lock().log.iter().filter(|op| op.is_write()).count()
    }

    pub fn clear_ops(&self) {
        self.state.lock().log.clear();
    }

    fn check_fault(state: &mut MockState, bus: u8, addr: u8, write_reg: Option<u8>) -> Option<TransportError> {
        let faults = state.faults.get_mut(&(bus, addr))?;
        let fault = faults.front_mut()?;
        if let Some(target) = fault.write_reg {
            if write_reg != Some(target) {
                return None;
            }
            if fault.skip > 0 {
                fault.skip -= 1;
                return None;
            }
        }
        let kind = fault.kind;
        fault.remaining = fault.remaining.saturating_sub(1);
        if fault.remaining == 0 {
            faults.pop_front();
        }
        let reg = write_reg.unwrap_or(0);
        Some(match kind {
            FaultKind::Nack => TransportError::Nack { bus, addr },
            FaultKind::Timeout => TransportError::Timeout { bus, timeout_ms: 25 },
            FaultKind::Rejected => TransportError::Rejected { addr, reg },
        })
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cBus for MockBus {
    fn write(&self, bus: u8, addr: u8, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let fault = Self::check_fault(&mut state, bus, addr, data.first().copied());
        state.log.push(BusOp {
            thread: thread::current().id(),
            bus,
            addr,
            kind: BusOpKind::Write {
                data: data.to_vec(),
            },
            ok: fault.is_none(),
        });
        if let Some(err) = fault {
            return Err(err);
        }

        let device = state.devices.entry((bus, addr)).or_default();
        match data {
            [] => {}
            [cmd] => device.commands.push(*cmd),
            [reg, page] if *reg == pmbus::PAGE => device.page = *page,
            [reg, payload @ ..] => {
                let page = device.page;
                device.registers.insert((page, *reg), payload.to_vec());
            }
        }
        Ok(())
    }

    fn write_read(
        &self,
        bus: u8,
        addr: u8,
        data: &[u8],
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        let reg = data.first().copied().unwrap_or(0);
        let fault = Self::check_fault(&mut state, bus, addr, None);
        let value = state
            .devices
            .get(&(bus, addr))
            .and_then(|d| d.registers.get(&(d.page, reg)).cloned());
        let ok = fault.is_none() && value.is_some();
        state.log.push(BusOp {
            thread: thread::current().id(),
            bus,
            addr,
            kind: BusOpKind::Read { reg, len },
            ok,
        });
        if let Some(err) = fault {
            return Err(err);
        }
        match value {
            Some(mut bytes) => {
                bytes.truncate(len);
                Ok(bytes)
            }
            None => Err(TransportError::Nack { bus, addr }),
        }
    }
}
