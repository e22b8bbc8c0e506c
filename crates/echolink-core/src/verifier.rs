//! Echo verification.
//!
//! Decides whether the bytes collected in a [`ResponseAccumulator`] are the
//! echo of what was sent. There is no end-of-frame marker, so the decision
//! is driven by size and time:
//!
//! - an exact match is accepted as soon as it is seen;
//! - once at least as much data as expected has arrived and the line has
//!   been quiet for `quiet_period`, the response is judged by prefix
//!   (trailing extra bytes are tolerated);
//! - otherwise the verifier keeps waiting until `timeout`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::accumulator::ResponseAccumulator;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Result of one verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyOutcome {
    Matched,
    TimedOut,
    Mismatched,
}

impl VerifyOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, VerifyOutcome::Matched)
    }
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyOutcome::Matched => write!(f, "MATCHED"),
            VerifyOutcome::TimedOut => write!(f, "TIMED_OUT"),
            VerifyOutcome::Mismatched => write!(f, "MISMATCHED"),
        }
    }
}

/// Polls an accumulator against an expected hex string.
#[derive(Debug, Clone)]
pub struct EchoVerifier {
    accumulator: Arc<ResponseAccumulator>,
    poll_interval: Duration,
    quiet_period: Duration,
}

impl EchoVerifier {
    pub fn new(accumulator: Arc<ResponseAccumulator>) -> Self {
        Self {
            accumulator,
            poll_interval: DEFAULT_POLL_INTERVAL,
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Wait for `expected_hex` to show up in the accumulator.
    ///
    /// Blocks the calling thread for at most `timeout` (plus one wake-up).
    /// Between checks it waits up to the poll interval, waking early when new
    /// bytes arrive.
    pub fn verify(&self, expected_hex: &str, timeout: Duration) -> VerifyOutcome {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut polls = 0u64;

        loop {
            polls += 1;
            let snap = self.accumulator.snapshot();

            if snap.hex == expected_hex {
                debug!(polls, elapsed_ms = start.elapsed().as_millis() as u64, "Exact echo");
                return VerifyOutcome::Matched;
            }

            if snap.hex.len() >= expected_hex.len()
                && let Some(last) = snap.last_arrival
                && last.elapsed() >= self.quiet_period
            {
                let outcome = if snap.hex.starts_with(expected_hex) {
                    VerifyOutcome::Matched
                } else {
                    VerifyOutcome::Mismatched
                };
                debug!(
                    polls,
                    received_len = snap.hex.len() / 2,
                    expected_len = expected_hex.len() / 2,
                    outcome = %outcome,
                    "Line quiet, deciding on received data"
                );
                return outcome;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(polls, received = %snap.hex, "Echo timed out");
                return VerifyOutcome::TimedOut;
            }

            let wait = self.poll_interval.min(deadline - now);
            trace!(received_len = snap.hex.len() / 2, wait_ms = wait.as_millis() as u64, "Polling");
            self.accumulator.wait_for_arrival(snap.generation, wait);
        }
    }
}
