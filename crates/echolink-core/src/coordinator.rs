//! Command coordinator - ties codec, transport, accumulator and verifier
//! together for single request/response exchanges.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use crate::accumulator::ResponseAccumulator;
use crate::codec::{encode, to_hex_string};
use crate::config::{EchoSettings, PortSettings};
use crate::error::{CoreError, Result};
use crate::events::{LinkEvent, LinkObserver, PacketDirection, TracingObserver};
use crate::transport::{ByteSink, SerialTransport, TransportError};
use crate::verifier::{EchoVerifier, VerifyOutcome};

/// Delay between `read_line` attempts while waiting for a command response.
pub const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bytes of payload included in packet events.
const PACKET_PREVIEW: usize = 32;

/// Full result of an echo-checked transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReport {
    pub outcome: VerifyOutcome,
    /// Hex of what was sent.
    pub expected: String,
    /// Hex of what came back before the verdict.
    pub received: String,
    /// Time from the end of the write to the verdict.
    pub elapsed: Duration,
}

/// Feeds inbound bytes to the accumulator and reports them to the observer.
struct ReceiveTap<O: LinkObserver> {
    accumulator: Arc<ResponseAccumulator>,
    observer: Arc<O>,
}

impl<O: LinkObserver> ByteSink for ReceiveTap<O> {
    fn on_bytes_received(&self, bytes: &[u8]) {
        self.accumulator.append(bytes);
        self.observer.on_event(&packet_event(PacketDirection::Rx, bytes));
    }
}

fn packet_event(direction: PacketDirection, data: &[u8]) -> LinkEvent {
    LinkEvent::Packet {
        direction,
        length: data.len(),
        hex: to_hex_string(&data[..data.len().min(PACKET_PREVIEW)]),
    }
}

/// Drives one link: connect, transmit, verify echoes, exchange line commands.
///
/// All operations run on the caller's thread. Inbound bytes arrive on the
/// transport's thread and only ever touch the accumulator.
pub struct CommandCoordinator<T: SerialTransport, O: LinkObserver = TracingObserver> {
    transport: T,
    observer: Arc<O>,
    accumulator: Arc<ResponseAccumulator>,
    verifier: EchoVerifier,
}

impl<T: SerialTransport> CommandCoordinator<T, TracingObserver> {
    /// Create a coordinator with the default tracing observer.
    pub fn new(transport: T) -> Self {
        Self::with_observer(transport, Arc::new(TracingObserver))
    }
}

impl<T: SerialTransport, O: LinkObserver + 'static> CommandCoordinator<T, O> {
    /// Create a coordinator with a custom observer.
    pub fn with_observer(transport: T, observer: Arc<O>) -> Self {
        let accumulator = Arc::new(ResponseAccumulator::new());
        Self {
            transport,
            observer,
            verifier: EchoVerifier::new(Arc::clone(&accumulator)),
            accumulator,
        }
    }

    /// Override verifier timing.
    pub fn with_echo_settings(mut self, echo: &EchoSettings) -> Self {
        self.verifier = self
            .verifier
            .with_poll_interval(echo.poll_interval())
            .with_quiet_period(echo.quiet_period());
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn accumulator(&self) -> &Arc<ResponseAccumulator> {
        &self.accumulator
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.transport.is_open() {
            Ok(())
        } else {
            Err(CoreError::NotConnected)
        }
    }

    /// Open the link and discard anything stale in its buffers.
    #[instrument(skip(self, settings), fields(port = %settings.port))]
    pub fn connect(&self, settings: &PortSettings) -> Result<()> {
        if self.transport.is_open() {
            return Err(CoreError::AlreadyConnected);
        }

        self.transport.set_receiver(Arc::new(ReceiveTap {
            accumulator: Arc::clone(&self.accumulator),
            observer: Arc::clone(&self.observer),
        }));
        self.transport.open(settings)?;
        self.transport.discard_input()?;
        self.transport.discard_output()?;

        self.observer.on_event(&LinkEvent::Connected {
            port: settings.port.clone(),
            baud_rate: settings.baud_rate,
        });
        Ok(())
    }

    /// Close the link. Safe to call when not connected.
    pub fn disconnect(&self) -> Result<()> {
        if !self.transport.is_open() {
            debug!("Disconnect requested while not connected");
            return Ok(());
        }
        self.transport.close()?;
        self.observer.on_event(&LinkEvent::Disconnected);
        Ok(())
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.transport.write(bytes)?;
        self.observer
            .on_event(&packet_event(PacketDirection::Tx, bytes));
        Ok(())
    }

    /// Encode `spec` and write it. No response is awaited.
    pub fn transmit(&self, spec: &str) -> Result<()> {
        self.ensure_connected()?;
        let bytes = encode(spec)?;
        self.write_bytes(&bytes)
    }

    /// Write `text` as UTF-8 exactly as given, without hex decoding.
    pub fn transmit_text(&self, text: &str) -> Result<()> {
        self.ensure_connected()?;
        self.write_bytes(text.as_bytes())
    }

    /// Transmit `spec` and report whether the device echoed it back.
    pub fn transmit_with_echo(&self, spec: &str, timeout: Duration) -> Result<bool> {
        Ok(self.transmit_and_verify(spec, timeout)?.outcome.is_match())
    }

    /// Transmit `spec` and return the full verification result.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub fn transmit_and_verify(&self, spec: &str, timeout: Duration) -> Result<EchoReport> {
        self.ensure_connected()?;

        self.accumulator.reset();
        let bytes = encode(spec)?;
        let expected = to_hex_string(&bytes);
        self.write_bytes(&bytes)?;

        let start = Instant::now();
        let outcome = self.verifier.verify(&expected, timeout);
        let report = EchoReport {
            outcome,
            received: self.accumulator.snapshot().hex,
            expected,
            elapsed: start.elapsed(),
        };

        self.observer.on_event(&LinkEvent::EchoVerified {
            outcome: report.outcome,
            expected: report.expected.clone(),
            received: report.received.clone(),
            elapsed: report.elapsed,
        });
        Ok(report)
    }

    /// Write `text` as a line and wait for one line in response.
    ///
    /// Unread input is discarded first so the answer is not mixed with
    /// earlier echoes. An empty read inside the window is retried; a port
    /// that has gone away is reported at once.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub fn send_command(&self, text: &str, timeout: Duration) -> Result<String> {
        self.ensure_connected()?;
        self.transport.discard_input()?;
        self.transport.write_line(text)?;
        self.observer
            .on_event(&packet_event(PacketDirection::Tx, text.as_bytes()));

        let start = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.transport.read_line() {
                Ok(line) => {
                    info!(attempts, "Command answered");
                    self.observer.on_event(&LinkEvent::CommandResponse {
                        command: text.to_string(),
                        response: line.clone(),
                    });
                    return Ok(line);
                }
                Err(e @ (TransportError::Disconnected | TransportError::NotOpen)) => {
                    return Err(e.into());
                }
                Err(_) => {}
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }
            thread::sleep(COMMAND_POLL_INTERVAL.min(timeout - elapsed));
        }

        self.observer.on_event(&LinkEvent::CommandTimedOut {
            command: text.to_string(),
            timeout,
        });
        Err(CoreError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}
