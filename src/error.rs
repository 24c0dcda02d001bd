//! Error types for the Modbus session engine.
//!
//! Every validation failure is reported through [`ModbusError`]; a transport
//! that receives nothing is *not* an error and is surfaced as `Ok(None)` by the
//! sessions instead.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised by framing, validation, sessions and transports.
#[derive(Error, Debug)]
pub enum ModbusError {
    /// An echoed field (slave address, function code) differs from the request.
    #[error("Mismatch data: {message}")]
    MismatchData { message: String },

    /// Checksum failure (RTU) or header/length inconsistency (TCP).
    #[error("Data corrupted: {message}")]
    DataCorrupted { message: String },

    /// The session cannot accept the request in its current state.
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Misconfiguration detected while constructing a session or a request.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Input bytes do not fit the structure being decoded.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// The transport received an incomplete frame.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Connection could not be established or was lost.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A transport operation exceeded its deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModbusError {
    pub fn mismatch_data<S: Into<String>>(message: S) -> Self {
        Self::MismatchData {
            message: message.into(),
        }
    }

    pub fn data_corrupted<S: Into<String>>(message: S) -> Self {
        Self::DataCorrupted {
            message: message.into(),
        }
    }

    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Returns `true` when the remote side answered, but the answer failed
    /// validation against the request that was sent.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::MismatchData { .. } | Self::DataCorrupted { .. }
        )
    }

    /// Returns `true` for failures of the underlying medium.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Frame { .. } | Self::Connection { .. } | Self::Timeout { .. } | Self::Io(_)
        )
    }
}
