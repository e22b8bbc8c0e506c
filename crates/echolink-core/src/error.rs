//! Core error taxonomy.

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed hex literal: odd digit count or a non-hex character.
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    /// No line response arrived within the command window.
    #[error("No response after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
