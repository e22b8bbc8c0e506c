//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow link activity without
//! tight coupling to the coordinator.

use std::fmt;
use std::time::Duration;

use crate::verifier::VerifyOutcome;

/// Byte direction on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the coordinator.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Port opened and buffers discarded.
    Connected { port: String, baud_rate: u32 },
    /// Port closed.
    Disconnected,
    /// Bytes written or received. `hex` is capped at the first 32 bytes.
    Packet {
        direction: PacketDirection,
        length: usize,
        hex: String,
    },
    /// Echo check finished.
    EchoVerified {
        outcome: VerifyOutcome,
        expected: String,
        received: String,
        elapsed: Duration,
    },
    /// Line response to a command.
    CommandResponse { command: String, response: String },
    /// Command got no line back in time.
    CommandTimedOut { command: String, timeout: Duration },
}

/// Observer trait for receiving link events.
///
/// Called from both the caller's thread and the transport's reader thread.
pub trait LinkObserver: Send + Sync {
    fn on_event(&self, event: &LinkEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl LinkObserver for NullObserver {
    fn on_event(&self, _event: &LinkEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl LinkObserver for TracingObserver {
    fn on_event(&self, event: &LinkEvent) {
        match event {
            LinkEvent::Connected { port, baud_rate } => {
                tracing::info!(port = %port, baud_rate, "Connected");
            }
            LinkEvent::Disconnected => {
                tracing::info!("Disconnected");
            }
            LinkEvent::Packet {
                direction,
                length,
                hex,
            } => {
                tracing::debug!(dir = %direction, len = length, data = %hex, "Packet");
            }
            LinkEvent::EchoVerified {
                outcome,
                expected,
                received,
                elapsed,
            } => {
                if outcome.is_match() {
                    tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "Echo verified");
                } else {
                    tracing::warn!(
                        outcome = %outcome,
                        expected = %expected,
                        received = %received,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Echo check failed"
                    );
                }
            }
            LinkEvent::CommandResponse { command, response } => {
                tracing::debug!(command = %command, response = %response, "Command response");
            }
            LinkEvent::CommandTimedOut { command, timeout } => {
                tracing::warn!(command = %command, timeout_ms = timeout.as_millis() as u64, "No response");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Observer that records every event for assertions.
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<LinkEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<LinkEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl LinkObserver for RecordingObserver {
        fn on_event(&self, event: &LinkEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
