//! `serialport`-based transport implementation.
//!
//! A background reader thread pulls bytes off the port as they arrive. Each
//! chunk is handed to the registered [`ByteSink`] and also kept in a line
//! buffer that `read_line` drains.

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use serialport::{ClearBuffer, SerialPort, SerialPortType};
use tracing::{debug, info, instrument, warn};

use super::traits::{ByteSink, SerialTransport, TransportError};
use crate::config::{DataBits, Parity, PortSettings, StopBits};

/// Upper bound on unread bytes kept for `read_line`.
const LINE_BUFFER_CAP: usize = 64 * 1024;
const READ_CHUNK: usize = 1024;

type SinkSlot = Arc<Mutex<Option<Arc<dyn ByteSink>>>>;

/// Information about an available serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }
}

/// List available serial ports, sorted by name.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .map_err(|e| TransportError::Io(e.into()))?
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

/// Bytes received but not yet consumed as lines.
#[derive(Debug, Default)]
struct LineBuffer {
    data: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > LINE_BUFFER_CAP {
            let excess = self.data.len() - LINE_BUFFER_CAP;
            self.data.drain(..excess);
        }
    }

    fn take_line(&mut self, ending: &[u8]) -> Option<String> {
        if ending.is_empty() {
            return None;
        }
        let pos = self
            .data
            .windows(ending.len())
            .position(|w| w == ending)?;
        let mut line: Vec<u8> = self.data.drain(..pos + ending.len()).collect();
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    fn clear(&mut self) {
        self.data.clear();
    }
}

struct OpenPort {
    name: String,
    writer: Box<dyn SerialPort>,
    line_ending: String,
    stop: Arc<AtomicBool>,
    faulted: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// State the reader thread shares with the transport.
struct ReaderLink {
    lines: Arc<Mutex<LineBuffer>>,
    sink: SinkSlot,
    stop: Arc<AtomicBool>,
    /// Set when the port failed underneath the reader.
    faulted: Arc<AtomicBool>,
}

impl ReaderLink {
    /// Read until stopped or the port fails. A failure is recorded in
    /// `faulted` so later operations report it.
    fn pump<R: Read>(&self, reader: &mut R, name: &str) {
        let mut buf = [0u8; READ_CHUNK];
        while !self.stop.load(Ordering::Relaxed) {
            match reader.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    let chunk = &buf[..n];
                    self.lines.lock().unwrap_or_else(|e| e.into_inner()).push(chunk);
                    let sink = self.sink.lock().unwrap_or_else(|e| e.into_inner()).clone();
                    if let Some(sink) = sink {
                        sink.on_bytes_received(chunk);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
                Err(e) => {
                    warn!(port = %name, error = %e, "Port failed, reader stopped");
                    self.faulted.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
        debug!(port = %name, "Reader thread exiting");
    }
}

/// Serial transport backed by the `serialport` crate.
pub struct SerialPortTransport {
    port: Mutex<Option<OpenPort>>,
    lines: Arc<Mutex<LineBuffer>>,
    sink: SinkSlot,
}

impl Default for SerialPortTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPortTransport {
    pub fn new() -> Self {
        Self {
            port: Mutex::new(None),
            lines: Arc::new(Mutex::new(LineBuffer::default())),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    fn port(&self) -> MutexGuard<'_, Option<OpenPort>> {
        self.port.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on the open port. Fails once the reader has seen the port die.
    fn with_port<R>(
        &self,
        f: impl FnOnce(&mut OpenPort) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        match self.port().as_mut() {
            Some(open) if open.faulted.load(Ordering::Relaxed) => Err(TransportError::Disconnected),
            Some(open) => f(open),
            None => Err(TransportError::NotOpen),
        }
    }

    fn spawn_reader(
        &self,
        mut reader: Box<dyn SerialPort>,
        stop: Arc<AtomicBool>,
        faulted: Arc<AtomicBool>,
    ) -> std::io::Result<JoinHandle<()>> {
        let link = ReaderLink {
            lines: Arc::clone(&self.lines),
            sink: Arc::clone(&self.sink),
            stop,
            faulted,
        };
        let name = reader.name().unwrap_or_default();

        thread::Builder::new()
            .name(format!("serial-rx {}", name))
            .spawn(move || link.pump(&mut reader, &name))
    }
}

fn to_data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn to_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn to_stop_bits(stop: StopBits) -> serialport::StopBits {
    match stop {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn open_failed(settings: &PortSettings, e: impl ToString) -> TransportError {
    TransportError::OpenFailed {
        port: settings.port.clone(),
        message: e.to_string(),
    }
}

impl SerialTransport for SerialPortTransport {
    fn is_open(&self) -> bool {
        self.port().is_some()
    }

    #[instrument(skip(self, settings), fields(port = %settings.port, baud = settings.baud_rate))]
    fn open(&self, settings: &PortSettings) -> Result<(), TransportError> {
        let mut slot = self.port();
        if slot.is_some() {
            return Err(open_failed(settings, "port already open"));
        }

        let writer = serialport::new(&settings.port, settings.baud_rate)
            .data_bits(to_data_bits(settings.data_bits))
            .parity(to_parity(settings.parity))
            .stop_bits(to_stop_bits(settings.stop_bits))
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.read_timeout())
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(settings.port.clone()),
                _ => open_failed(settings, e),
            })?;
        let reader = writer.try_clone().map_err(|e| open_failed(settings, e))?;

        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let stop = Arc::new(AtomicBool::new(false));
        let faulted = Arc::new(AtomicBool::new(false));
        let handle = self
            .spawn_reader(reader, Arc::clone(&stop), Arc::clone(&faulted))
            .map_err(|e| open_failed(settings, e))?;

        info!(settings = %settings, "Port opened");
        *slot = Some(OpenPort {
            name: settings.port.clone(),
            writer,
            line_ending: settings.line_ending.clone(),
            stop,
            faulted,
            reader: Some(handle),
        });
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let Some(mut open) = self.port().take() else {
            return Ok(());
        };
        open.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = open.reader.take()
            && handle.join().is_err()
        {
            warn!(port = %open.name, "Reader thread panicked");
        }
        info!(port = %open.name, "Port closed");
        Ok(())
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.with_port(|open| {
            open.writer
                .write_all(data)
                .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
            open.writer
                .flush()
                .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
            debug!(bytes_written = data.len(), "Write complete");
            Ok(data.len())
        })
    }

    fn write_line(&self, text: &str) -> Result<(), TransportError> {
        self.with_port(|open| {
            let mut line = Vec::with_capacity(text.len() + open.line_ending.len());
            line.extend_from_slice(text.as_bytes());
            line.extend_from_slice(open.line_ending.as_bytes());
            open.writer
                .write_all(&line)
                .and_then(|_| open.writer.flush())
                .map_err(|e| TransportError::WriteFailed(e.to_string()))
        })
    }

    fn read_line(&self) -> Result<String, TransportError> {
        let ending = self.with_port(|open| Ok(open.line_ending.clone()))?;
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take_line(ending.as_bytes())
            .ok_or(TransportError::NoLine)
    }

    fn discard_input(&self) -> Result<(), TransportError> {
        self.with_port(|open| {
            open.writer
                .clear(ClearBuffer::Input)
                .map_err(|e| TransportError::Io(e.into()))
        })?;
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    fn discard_output(&self) -> Result<(), TransportError> {
        self.with_port(|open| {
            open.writer
                .clear(ClearBuffer::Output)
                .map_err(|e| TransportError::Io(e.into()))
        })
    }

    fn set_receiver(&self, sink: Arc<dyn ByteSink>) {
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::ResponseAccumulator;
    use std::collections::VecDeque;

    /// Reader that replays scripted results, then reports a dead port.
    struct ScriptedReader(VecDeque<std::io::Result<Vec<u8>>>);

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(std::io::Error::new(ErrorKind::BrokenPipe, "device unplugged")),
            }
        }
    }

    fn reader_link(sink: Option<Arc<dyn ByteSink>>) -> ReaderLink {
        ReaderLink {
            lines: Arc::new(Mutex::new(LineBuffer::default())),
            sink: Arc::new(Mutex::new(sink)),
            stop: Arc::new(AtomicBool::new(false)),
            faulted: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_pump_feeds_sink_and_lines_then_records_fault() {
        let acc = Arc::new(ResponseAccumulator::new());
        let link = reader_link(Some(acc.clone()));
        let mut reader = ScriptedReader(VecDeque::from(vec![
            Ok(b"O".to_vec()),
            Err(std::io::Error::new(ErrorKind::TimedOut, "idle")),
            Ok(b"K\n".to_vec()),
        ]));

        link.pump(&mut reader, "test");

        assert_eq!(acc.snapshot().hex, "4F4B0A");
        assert_eq!(link.lines.lock().unwrap().take_line(b"\n").as_deref(), Some("OK"));
        assert!(link.faulted.load(Ordering::Relaxed));
    }

    #[test]
    fn test_pump_stop_flag_is_not_a_fault() {
        let link = reader_link(None);
        link.stop.store(true, Ordering::Relaxed);
        link.pump(&mut ScriptedReader(VecDeque::new()), "test");
        assert!(!link.faulted.load(Ordering::Relaxed));
    }

    #[test]
    fn test_line_buffer_splits_on_ending() {
        let mut buf = LineBuffer::default();
        buf.push(b"OK\r\nERR");
        assert_eq!(buf.take_line(b"\n").as_deref(), Some("OK"));
        assert_eq!(buf.take_line(b"\n"), None);
        buf.push(b"OR\n");
        assert_eq!(buf.take_line(b"\n").as_deref(), Some("ERROR"));
    }

    #[test]
    fn test_line_buffer_custom_ending() {
        let mut buf = LineBuffer::default();
        buf.push(b"+CSQ: 20,0\r\nOK\r\n");
        assert_eq!(buf.take_line(b"\r\n").as_deref(), Some("+CSQ: 20,0"));
        assert_eq!(buf.take_line(b"\r\n").as_deref(), Some("OK"));
    }

    #[test]
    fn test_line_buffer_is_bounded() {
        let mut buf = LineBuffer::default();
        buf.push(&vec![b'x'; LINE_BUFFER_CAP + 10]);
        assert_eq!(buf.data.len(), LINE_BUFFER_CAP);
    }

    #[test]
    fn test_closed_port_rejects_io() {
        let transport = SerialPortTransport::new();
        assert!(!transport.is_open());
        assert!(matches!(transport.write(b"x"), Err(TransportError::NotOpen)));
        assert!(matches!(transport.read_line(), Err(TransportError::NotOpen)));
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_open_missing_port_fails() {
        let transport = SerialPortTransport::new();
        let settings = PortSettings::new("/dev/echolink-does-not-exist", 9600);
        assert!(transport.open(&settings).is_err());
        assert!(!transport.is_open());
    }
}
