//! Echolink-Core: serial echo verification in Rust.
//!
//! This crate sends payloads to a device over a byte-oriented serial link
//! and checks that the device echoes them back within a time window.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: serial link abstraction (serialport, mock)
//! - **Codec**: payload spec to bytes, bytes to canonical hex
//! - **Accumulator**: thread-safe log of bytes received since the last send
//! - **Verifier**: size/time heuristic deciding match, mismatch or timeout
//! - **Coordinator**: connect, transmit, echo check, line commands
//! - **Events**: Observer pattern for UI decoupling
//! - **Config**: TOML link configuration
//! - **Stress**: repeated-trial harness and report
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use echolink_core::{CommandCoordinator, PortSettings, SerialPortTransport};
//!
//! let link = CommandCoordinator::new(SerialPortTransport::new());
//! link.connect(&PortSettings::new("/dev/ttyUSB0", 115200))?;
//! let echoed = link.transmit_with_echo("0xFF007C3A", Duration::from_secs(1))?;
//! println!("echo ok: {echoed}");
//! # Ok::<(), echolink_core::CoreError>(())
//! ```

pub mod accumulator;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod stress;
pub mod transport;
pub mod verifier;

// Re-exports for convenience
pub use accumulator::{ResponseAccumulator, Snapshot};
pub use codec::{decode_hex, encode, is_hex_literal, to_hex_string};
pub use config::{EchoSettings, LinkConfig, PortSettings};
pub use coordinator::{CommandCoordinator, EchoReport};
pub use error::CoreError;
pub use events::{LinkEvent, LinkObserver, NullObserver, PacketDirection, TracingObserver};
pub use stress::{StressConfig, StressReport, TrialRecord, TrialStatus, run_stress};
pub use transport::{
    ByteSink, EchoMode, MockTransport, PortInfo, SerialPortTransport, SerialTransport,
    TransportError, list_ports,
};
pub use verifier::{EchoVerifier, VerifyOutcome};
