//! Serial transport layer abstraction.
//!
//! Defines the `SerialTransport` trait for byte-oriented links,
//! allowing different implementations (serialport, mock, etc.).

use std::sync::Arc;

use thiserror::Error;

use crate::config::PortSettings;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Failed to open port {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("No complete line available")]
    NoLine,

    #[error("Port is not open")]
    NotOpen,

    #[error("Port disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receiver of inbound bytes.
///
/// Invoked by the transport once per received chunk, in arrival order, on a
/// thread owned by the transport.
pub trait ByteSink: Send + Sync {
    fn on_bytes_received(&self, bytes: &[u8]);
}

/// Abstract serial transport interface.
///
/// This trait enables:
/// - Production implementation using the `serialport` crate
/// - Mock implementation for unit testing
///
/// All methods take `&self`; implementations keep their port state behind
/// interior mutability so a reader thread can run alongside writers.
pub trait SerialTransport: Send + Sync {
    /// Whether the link is currently open.
    fn is_open(&self) -> bool;

    /// Open the link with the given settings.
    fn open(&self, settings: &PortSettings) -> Result<(), TransportError>;

    /// Close the link. Closing a closed link is a no-op.
    fn close(&self) -> Result<(), TransportError>;

    /// Write raw bytes, blocking until they are handed to the driver.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Write `text` followed by the configured line ending.
    fn write_line(&self, text: &str) -> Result<(), TransportError>;

    /// Take one complete buffered line, without its terminator.
    ///
    /// Fails with `TransportError::NoLine` when no full line has arrived yet.
    fn read_line(&self) -> Result<String, TransportError>;

    /// Drop any bytes received but not yet consumed.
    fn discard_input(&self) -> Result<(), TransportError>;

    /// Drop any bytes queued for transmission.
    fn discard_output(&self) -> Result<(), TransportError>;

    /// Register the sink notified for every inbound chunk.
    fn set_receiver(&self, sink: Arc<dyn ByteSink>);
}
