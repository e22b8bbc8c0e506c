//! Response accumulator.
//!
//! Ordered log of bytes received since the last reset, stored as canonical
//! hex tokens together with the time of the most recent arrival. This is the
//! only state shared between the transport's reader thread and the caller
//! driving a transmission, and every operation takes the same lock.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::codec::push_hex;
use crate::transport::ByteSink;

/// Consistent view of the accumulator at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Concatenated hex tokens in arrival order.
    pub hex: String,
    /// When the last chunk arrived, `None` if nothing arrived since reset.
    pub last_arrival: Option<Instant>,
    /// Number of chunks appended since creation. Used to detect new data.
    pub generation: u64,
}

#[derive(Debug, Default)]
struct State {
    /// Two-digit token per byte, concatenated in arrival order.
    tokens: String,
    last_arrival: Option<Instant>,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    state: Mutex<State>,
    arrived: Condvar,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clear all tokens and forget the last arrival time.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.tokens.clear();
        state.last_arrival = None;
    }

    /// Append one chunk of received bytes.
    pub fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.lock();
        push_hex(&mut state.tokens, bytes);
        state.last_arrival = Some(Instant::now());
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.arrived.notify_all();
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            hex: state.tokens.clone(),
            last_arrival: state.last_arrival,
            generation: state.generation,
        }
    }

    /// Number of bytes received since the last reset.
    pub fn len(&self) -> usize {
        self.lock().tokens.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until a chunk newer than `generation` arrives or `timeout`
    /// elapses. Returns `true` if new data arrived.
    ///
    /// The lock is released while waiting.
    pub fn wait_for_arrival(&self, generation: u64, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .arrived
            .wait_timeout_while(state, timeout, |s| s.generation == generation)
            .unwrap_or_else(|e| e.into_inner());
        state.generation != generation
    }
}

impl ByteSink for ResponseAccumulator {
    fn on_bytes_received(&self, bytes: &[u8]) {
        self.append(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_reset_append_snapshot() {
        let acc = ResponseAccumulator::new();
        acc.reset();
        acc.append(&[0xFF, 0x00]);

        let snap = acc.snapshot();
        assert_eq!(snap.hex, "FF00");
        assert!(snap.last_arrival.is_some());
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_reset_clears_state() {
        let acc = ResponseAccumulator::new();
        acc.append(b"abc");
        acc.reset();

        let snap = acc.snapshot();
        assert_eq!(snap.hex, "");
        assert_eq!(snap.last_arrival, None);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_empty_chunk_is_ignored() {
        let acc = ResponseAccumulator::new();
        acc.append(&[]);
        assert_eq!(acc.snapshot().last_arrival, None);
    }

    #[test]
    fn test_sequential_appends_preserve_order() {
        let acc = ResponseAccumulator::new();
        acc.append(&[0x01]);
        acc.append(&[0x02, 0x03]);
        acc.on_bytes_received(&[0x04]);
        assert_eq!(acc.snapshot().hex, "01020304");
    }

    #[test]
    fn test_concurrent_chunks_are_never_split() {
        let acc = Arc::new(ResponseAccumulator::new());
        let handles: Vec<_> = (0u8..4)
            .map(|id| {
                let acc = Arc::clone(&acc);
                thread::spawn(move || {
                    for _ in 0..50 {
                        acc.append(&[id; 4]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let hex = acc.snapshot().hex;
        assert_eq!(hex.len(), 4 * 50 * 4 * 2);
        // Every 8-digit group must come from a single chunk
        let whole = ["00000000", "01010101", "02020202", "03030303"];
        for group in hex.as_bytes().chunks(8) {
            let group = std::str::from_utf8(group).unwrap();
            assert!(whole.contains(&group), "split chunk: {group}");
        }
    }

    #[test]
    fn test_wait_for_arrival_wakes_on_append() {
        let acc = Arc::new(ResponseAccumulator::new());
        let generation = acc.snapshot().generation;

        let writer = {
            let acc = Arc::clone(&acc);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                acc.append(&[0xAA]);
            })
        };

        let start = Instant::now();
        assert!(acc.wait_for_arrival(generation, Duration::from_secs(2)));
        assert!(start.elapsed() < Duration::from_secs(1));
        writer.join().unwrap();
    }

    #[test]
    fn test_wait_for_arrival_times_out() {
        let acc = ResponseAccumulator::new();
        let generation = acc.snapshot().generation;
        assert!(!acc.wait_for_arrival(generation, Duration::from_millis(30)));
    }
}
