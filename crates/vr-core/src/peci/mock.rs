//! Mock PECI bus for testing the telemetry engine.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::bus::{PeciBus, PeciError};
use crate::protocol::constants::peci;

/// One logged RdPkgConfig request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeciRequest {
    pub addr: u8,
    pub index: u8,
    pub param: u16,
}

#[derive(Default)]
struct MockState {
    /// The last queued response for a key is sticky.
    responses: HashMap<(u8, u16), VecDeque<Result<Vec<u8>, PeciError>>>,
    log: Vec<PeciRequest>,
}

/// Mock PECI bus with queued responses per (index, param).
#[derive(Default)]
pub struct MockPeci {
    state: Mutex<MockState>,
}

impl MockPeci {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response, completion code first.
    pub fn push_response(&self, index: u8, param: u16, bytes: &[u8]) {
        self.push(index, param, Ok(bytes.to_vec()));
    }

    /// Queue a successful response carrying `data`.
    pub fn push_data(&self, index: u8, param: u16, data: u32) {
        let mut bytes = vec![peci::CC_SUCCESS];
        bytes.extend_from_slice(&data.to_le_bytes());
        self.push(index, param, Ok(bytes));
    }

    pub fn push_error(&self, index: u8, param: u16, err: PeciError) {
        self.push(index, param, Err(err));
    }

    fn push(&self, index: u8, param: u16, response: Result<Vec<u8>, PeciError>) {
        self.state
            .lock()
            .responses
            .entry((index, param))
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<PeciRequest> {
        self.state.lock().log.clone()
    }

    pub fn request_count(&self, index: u8) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|r| r.index == index)
            .count()
    }
}

impl PeciBus for MockPeci {
    fn rd_pkg_config(&self, addr: u8, index: u8, param: u16, len: usize) -> Result<Vec<u8>, PeciError> {
        let mut state = self.state.lock();
        state.log.push(PeciRequest { addr, index, param });
        let queue = state
            .responses
            .get_mut(&(index, param))
            .ok_or_else(|| PeciError::Bus(format!("no response for index 0x{index:02X}")))?;
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        let mut bytes = response.ok_or_else(|| PeciError::Bus("response queue empty".into()))??;
        bytes.truncate(len);
        Ok(bytes)
    }
}
