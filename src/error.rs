//! Error types for ninalink
//!
//! Two disjoint numeric domains share the `lastError()` byte:
//! transport problems are always [`FAILURE`] (255), while failures reported
//! by the co-processor's network stack are small errno-like values.

use thiserror::Error;

use crate::bus::BusError;

/// Result type alias using LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

/// Code recorded for any transport-level failure (bus timeout, desync)
pub const FAILURE: u8 = 255;

/// errno values used by the co-processor's socket stack (lwip numbering)
pub mod errno {
    pub const EBADF: u8 = 9;
    pub const EAGAIN: u8 = 11;
    pub const ENFILE: u8 = 23;
    pub const EINVAL: u8 = 22;
    pub const ENOPROTOOPT: u8 = 92;
    pub const EPROTONOSUPPORT: u8 = 93;
    pub const EOPNOTSUPP: u8 = 95;
    pub const EADDRINUSE: u8 = 98;
    pub const ENOTCONN: u8 = 107;
    pub const ECONNREFUSED: u8 = 111;
    pub const EHOSTUNREACH: u8 = 113;
}

/// Unified error type for ninalink operations
#[derive(Debug, Error)]
pub enum LinkError {
    // -------------------------------------------------------------------------
    // Transport Errors (code 255)
    // -------------------------------------------------------------------------
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("No reply: start marker never seen")]
    NoReply,

    #[error("Co-processor answered with an error marker")]
    ErrorReply,

    #[error("Protocol desync: expected reply to 0x{expected:02x}, got 0x{received:02x}")]
    Desync { expected: u8, received: u8 },

    #[error("Protocol desync: expected {expected} reply params, got {received}")]
    ParamCount { expected: u8, received: u8 },

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Remote Errors
    // -------------------------------------------------------------------------
    #[error("Co-processor rejected the request (errno {0})")]
    Remote(u8),

    // -------------------------------------------------------------------------
    // Local Precondition Errors (code EINVAL / EBADF)
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Parameter too large: {len} bytes (max {max})")]
    ParamTooLarge { len: usize, max: usize },

    #[error("Socket is not open")]
    InvalidSocket,

    // -------------------------------------------------------------------------
    // Simulator Persistence Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Flash image corruption detected: {0}")]
    Corruption(String),
}

impl LinkError {
    /// Map an error to the numeric value `lastError()` reports for it
    pub fn code(&self) -> u8 {
        match self {
            LinkError::Remote(code) => *code,
            LinkError::InvalidArgument(_) | LinkError::ParamTooLarge { .. } => errno::EINVAL,
            LinkError::InvalidSocket => errno::EBADF,
            _ => FAILURE,
        }
    }

    /// Build the error matching a `lastError()` value
    pub fn from_code(code: u8) -> Self {
        match code {
            FAILURE => LinkError::NoReply,
            other => LinkError::Remote(other),
        }
    }

    /// True for bus/protocol problems, false for anything the remote stack decided
    pub fn is_transport(&self) -> bool {
        self.code() == FAILURE
    }
}
