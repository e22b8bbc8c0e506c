//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use super::traits::{ByteSink, SerialTransport, TransportError};
use crate::config::PortSettings;

/// How the simulated device answers a raw write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EchoMode {
    /// Device stays silent.
    #[default]
    Off,
    /// Device sends back exactly what it received.
    Exact,
    /// Device echoes, then appends extra bytes.
    WithTrailer(Vec<u8>),
    /// Device answers with fixed bytes regardless of input.
    Reply(Vec<u8>),
}

#[derive(Default)]
struct MockState {
    open: bool,
    settings: Option<PortSettings>,
    fail_open: Option<String>,
    write_log: Vec<Vec<u8>>,
    line_log: Vec<String>,
    /// Replies released one per `write_line`.
    replies: VecDeque<String>,
    /// Lines readable right now.
    readable: VecDeque<String>,
    faulted: bool,
    failing_reads: usize,
    read_attempts: usize,
    discard_input_calls: usize,
    discard_output_calls: usize,
    echo: EchoMode,
    echo_delay: Duration,
    echo_chunk: Option<usize>,
    sink: Option<Arc<dyn ByteSink>>,
}

impl MockState {
    fn check_io(&self) -> Result<(), TransportError> {
        if !self.open {
            Err(TransportError::NotOpen)
        } else if self.faulted {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }
}

/// Mock transport for unit testing coordinator logic.
///
/// Clones share state, so a test can keep a handle after moving one into
/// the coordinator.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Set how writes are echoed back.
    pub fn set_echo(&self, mode: EchoMode) {
        self.state().echo = mode;
    }

    /// Deliver echoes from a separate thread after `delay`.
    pub fn set_echo_delay(&self, delay: Duration) {
        self.state().echo_delay = delay;
    }

    /// Split echoes into chunks of at most `size` bytes.
    pub fn set_echo_chunk_size(&self, size: usize) {
        self.state().echo_chunk = Some(size.max(1));
    }

    /// Make the next `open` fail with `message`.
    pub fn fail_next_open(&self, message: &str) {
        self.state().fail_open = Some(message.to_string());
    }

    /// Queue the device's reply to the next `write_line`.
    pub fn queue_line(&self, line: &str) {
        self.state().replies.push_back(line.to_string());
    }

    /// Make a line readable immediately, as if left over from earlier traffic.
    pub fn inject_line(&self, line: &str) {
        self.state().readable.push_back(line.to_string());
    }

    /// Simulate the port failing underneath an open handle.
    pub fn fault(&self) {
        self.state().faulted = true;
    }

    /// Make the next `count` calls to `read_line` fail even if lines are queued.
    pub fn fail_reads(&self, count: usize) {
        self.state().failing_reads = count;
    }

    /// Simulate bytes arriving from the device.
    pub fn inject(&self, bytes: &[u8]) {
        let sink = self.state().sink.clone();
        if let Some(sink) = sink {
            sink.on_bytes_received(bytes);
        }
    }

    /// Get all captured raw writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.state().write_log.clone()
    }

    /// Get all captured line writes, without terminators.
    pub fn get_lines(&self) -> Vec<String> {
        self.state().line_log.clone()
    }

    pub fn read_attempts(&self) -> usize {
        self.state().read_attempts
    }

    pub fn discard_counts(&self) -> (usize, usize) {
        let state = self.state();
        (state.discard_input_calls, state.discard_output_calls)
    }

    pub fn settings(&self) -> Option<PortSettings> {
        self.state().settings.clone()
    }

    /// Simulate the device going away.
    pub fn unplug(&self) {
        self.state().open = false;
    }

    fn echo_for(mode: &EchoMode, data: &[u8]) -> Option<Vec<u8>> {
        match mode {
            EchoMode::Off => None,
            EchoMode::Exact => Some(data.to_vec()),
            EchoMode::WithTrailer(extra) => {
                let mut out = data.to_vec();
                out.extend_from_slice(extra);
                Some(out)
            }
            EchoMode::Reply(reply) => Some(reply.clone()),
        }
    }
}

impl SerialTransport for MockTransport {
    fn is_open(&self) -> bool {
        self.state().open
    }

    fn open(&self, settings: &PortSettings) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(message) = state.fail_open.take() {
            return Err(TransportError::OpenFailed {
                port: settings.port.clone(),
                message,
            });
        }
        state.open = true;
        state.faulted = false;
        state.settings = Some(settings.clone());
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.state().open = false;
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let (echo, delay, chunk, sink) = {
            let mut state = self.state();
            state.check_io()?;
            state.write_log.push(data.to_vec());
            (
                Self::echo_for(&state.echo, data),
                state.echo_delay,
                state.echo_chunk,
                state.sink.clone(),
            )
        };

        if let (Some(echo), Some(sink)) = (echo, sink) {
            let deliver = move || {
                let size = chunk.unwrap_or(echo.len().max(1));
                for part in echo.chunks(size) {
                    sink.on_bytes_received(part);
                }
            };
            if delay.is_zero() {
                deliver();
            } else {
                thread::spawn(move || {
                    thread::sleep(delay);
                    deliver();
                });
            }
        }
        Ok(data.len())
    }

    fn write_line(&self, text: &str) -> Result<(), TransportError> {
        let mut state = self.state();
        state.check_io()?;
        state.line_log.push(text.to_string());
        if let Some(reply) = state.replies.pop_front() {
            state.readable.push_back(reply);
        }
        Ok(())
    }

    fn read_line(&self) -> Result<String, TransportError> {
        let mut state = self.state();
        state.check_io()?;
        state.read_attempts += 1;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(TransportError::NoLine);
        }
        state.readable.pop_front().ok_or(TransportError::NoLine)
    }

    fn discard_input(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.discard_input_calls += 1;
        state.readable.clear();
        Ok(())
    }

    fn discard_output(&self) -> Result<(), TransportError> {
        self.state().discard_output_calls += 1;
        Ok(())
    }

    fn set_receiver(&self, sink: Arc<dyn ByteSink>) {
        self.state().sink = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::ResponseAccumulator;

    fn open_mock() -> MockTransport {
        let mock = MockTransport::new();
        mock.open(&PortSettings::default()).unwrap();
        mock
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = open_mock();
        mock.write(b"Hello").unwrap();
        mock.write(b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_closed_rejects_io() {
        let mock = MockTransport::new();
        assert!(!mock.is_open());
        assert!(matches!(mock.write(b"x"), Err(TransportError::NotOpen)));
        assert!(matches!(mock.read_line(), Err(TransportError::NotOpen)));
    }

    #[test]
    fn test_mock_echo_reaches_sink() {
        let mock = open_mock();
        let acc = Arc::new(ResponseAccumulator::new());
        mock.set_receiver(acc.clone());
        mock.set_echo(EchoMode::WithTrailer(vec![0x0D]));
        mock.set_echo_chunk_size(1);

        mock.write(&[0x01, 0x02]).unwrap();
        assert_eq!(acc.snapshot().hex, "01020D");
    }

    #[test]
    fn test_mock_line_queue_and_failures() {
        let mock = open_mock();
        mock.queue_line("OK");
        assert!(matches!(mock.read_line(), Err(TransportError::NoLine)));

        mock.write_line("AT").unwrap();
        mock.fail_reads(1);
        assert!(matches!(mock.read_line(), Err(TransportError::NoLine)));
        assert_eq!(mock.read_line().unwrap(), "OK");
        assert!(mock.read_line().is_err());
        assert_eq!(mock.read_attempts(), 4);
    }

    #[test]
    fn test_mock_discard_drops_stale_lines_only() {
        let mock = open_mock();
        mock.inject_line("stale");
        mock.queue_line("fresh");
        mock.discard_input().unwrap();

        mock.write_line("AT").unwrap();
        assert_eq!(mock.read_line().unwrap(), "fresh");
    }

    #[test]
    fn test_mock_fault() {
        let mock = open_mock();
        mock.fault();
        assert!(mock.is_open());
        assert!(matches!(mock.write(b"x"), Err(TransportError::Disconnected)));
        assert!(matches!(mock.read_line(), Err(TransportError::Disconnected)));
    }

    #[test]
    fn test_mock_unplug() {
        let mock = open_mock();
        mock.unplug();
        assert!(!mock.is_open());
        assert!(mock.write(b"test").is_err());
    }
}
