//! Transport layer module.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::{EchoMode, MockTransport};
pub use serial::{PortInfo, SerialPortTransport, list_ports};
pub use traits::{ByteSink, SerialTransport, TransportError};
