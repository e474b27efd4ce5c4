//! Event system for UI decoupling.
//!
//! Flash progress, voltage changes and lock contention are reported through
//! a [`VrObserver`] so the CLI and the management stack can follow along
//! without reaching into the coordinator.

use std::fmt;

/// Firmware update phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    Idle,
    Parsing,
    /// Identity check against the target device.
    Validating,
    Flashing,
    /// Non-volatile store and settle.
    Committing,
    Done,
    Failed,
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashPhase::Idle => write!(f, "Idle"),
            FlashPhase::Parsing => write!(f, "Parsing"),
            FlashPhase::Validating => write!(f, "Validating"),
            FlashPhase::Flashing => write!(f, "Flashing"),
            FlashPhase::Committing => write!(f, "Committing"),
            FlashPhase::Done => write!(f, "Done"),
            FlashPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events emitted by the rail coordinator and the flash sequencer.
#[derive(Debug, Clone, PartialEq)]
pub enum VrEvent {
    FlashPhaseChanged {
        rail: String,
        from: FlashPhase,
        to: FlashPhase,
    },
    /// Emitted at every tenth of the image.
    FlashProgress {
        rail: String,
        current: usize,
        total: usize,
        page: u8,
    },
    VoutChanged {
        rail: String,
        millivolts: u16,
        persisted: bool,
    },
    DefaultsCaptured { count: usize },
    LockTimeout { rail: String, timeout_ms: u64 },
}

/// Observer trait for receiving VR events.
pub trait VrObserver: Send + Sync {
    fn on_event(&self, event: &VrEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl VrObserver for NullObserver {
    fn on_event(&self, _event: &VrEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl VrObserver for TracingObserver {
    fn on_event(&self, event: &VrEvent) {
        match event {
            VrEvent::FlashPhaseChanged { rail, from, to } => {
                if *to == FlashPhase::Failed {
                    tracing::error!(rail = %rail, from = %from, "Firmware update failed");
                } else {
                    tracing::info!(rail = %rail, from = %from, to = %to, "Phase changed");
                }
            }
            VrEvent::FlashProgress {
                rail,
                current,
                total,
                page,
            } => {
                let pct = if *total > 0 { current * 100 / total } else { 0 };
                tracing::info!(
                    rail = %rail,
                    page,
                    progress = %format!("{}%", pct),
                    "Updated {}/{} records",
                    current,
                    total
                );
            }
            VrEvent::VoutChanged {
                rail,
                millivolts,
                persisted,
            } => {
                tracing::info!(rail = %rail, millivolts, persisted, "VOUT changed");
            }
            VrEvent::DefaultsCaptured { count } => {
                tracing::info!(count, "Default voltages captured");
            }
            VrEvent::LockTimeout { rail, timeout_ms } => {
                tracing::warn!(rail = %rail, timeout_ms, "Rail lock timed out");
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(FlashPhase::Validating.to_string(), "Validating");
        assert_eq!(FlashPhase::Committing.to_string(), "Committing");
    }
}
