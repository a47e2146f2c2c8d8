//! Error types shared across the core crate.
//!
//! None of these are fatal: callers turn them into a state value plus a
//! diagnostic line, never into a halt of the poll loop.

use thiserror::Error;

/// A radio command was not acknowledged by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The firmware answered with a non-success status.
    #[error("radio command {command} failed with status {status}")]
    Rejected { command: &'static str, status: i32 },

    /// No response arrived within the wait policy.
    #[error("radio command {command} timed out")]
    Timeout { command: &'static str },

    /// The bus itself is not responding.
    #[error("radio bus unavailable")]
    BusUnavailable,
}

/// Credentials that cannot be turned into a key record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// Pre-shared key length outside the accepted range.
    #[error("pre-shared key must be {min}..={max} bytes, got {len}")]
    PskLength { len: usize, min: usize, max: usize },

    /// SAE password length outside the accepted range.
    #[error("SAE password must be 1..={max} bytes, got {len}")]
    SaeLength { len: usize, max: usize },

    /// Unknown textual auth mode.
    #[error("unknown auth mode '{0}'")]
    UnknownMode(String),
}

/// Errors from the streaming transfer layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// All transfer slots are in use.
    #[error("no free transfer slot")]
    PoolExhausted,

    /// The path asks for a content variant that is not served.
    #[error("unsupported variant: {0}")]
    UnsupportedVariant(String),

    /// The slot handle refers to a closed or reused slot.
    #[error("transfer slot {0} is not open")]
    SlotClosed(usize),

    /// The base64 encoder refused the output buffer.
    #[error("base64 encoding failed: {0}")]
    Encode(String),
}
