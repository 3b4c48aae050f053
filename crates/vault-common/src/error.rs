//! Error handling for the vaultd driver.
//!
//! Provides a unified error type and result alias used across all
//! components.

use std::fmt;
use thiserror::Error;

/// Result type alias for driver operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and are stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid caller-supplied argument.
    InputInvalid = 0x0002,
    /// Request cancelled by the host.
    Cancelled = 0x0003,

    // Protocol errors (0x0100 - 0x01FF)
    /// Reply carried an unexpected command byte.
    TransportMismatch = 0x0100,
    /// Device rejected the command.
    DeviceRefused = 0x0101,
    /// Multi-packet reply violated length or continuation rules.
    ProtocolInvariant = 0x0102,
    /// Transport failed to move a frame.
    Transport = 0x0103,

    // Database errors (0x0200 - 0x02FF)
    /// Integrity check found an unrepairable structural error.
    DatabaseCorrupt = 0x0200,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Protocol",
            0x02 => "Database",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for the vaultd driver.
///
/// Each variant carries the context a caller needs to report the failure;
/// job-level failures additionally surface a human-readable message through
/// the completion callback.
#[derive(Debug, Clone, Error)]
pub enum VaultError {
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid caller-supplied argument.
    #[error("invalid input: {message}")]
    InputInvalid {
        /// Error message.
        message: String,
    },

    /// Request was cancelled by the host.
    #[error("request was cancelled")]
    Cancelled,

    /// Reply command byte differs from the command it answers.
    #[error("transport mismatch: sent {sent:#04x}, reply carried {received:#04x}")]
    TransportMismatch {
        /// Command byte of the outstanding command.
        sent: u8,
        /// Command byte found in the reply.
        received: u8,
    },

    /// Single-byte refusal reply from the device.
    #[error("device refused {operation}")]
    DeviceRefused {
        /// The operation that was refused.
        operation: String,
    },

    /// Multi-packet reply violated length or continuation rules.
    #[error("protocol invariant violated: {message}")]
    ProtocolInvariant {
        /// Description of the violation.
        message: String,
    },

    /// The transport could not move a frame.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// Integrity check found an unrepairable structural error.
    #[error("database corrupt: {message}")]
    DatabaseCorrupt {
        /// Description of the corruption.
        message: String,
    },
}

impl VaultError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InputInvalid { .. } => ErrorCode::InputInvalid,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::TransportMismatch { .. } => ErrorCode::TransportMismatch,
            Self::DeviceRefused { .. } => ErrorCode::DeviceRefused,
            Self::ProtocolInvariant { .. } => ErrorCode::ProtocolInvariant,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::DatabaseCorrupt { .. } => ErrorCode::DatabaseCorrupt,
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid-input error.
    #[must_use]
    pub fn input_invalid(message: impl Into<String>) -> Self {
        Self::InputInvalid {
            message: message.into(),
        }
    }

    /// Creates a device-refused error for the named operation.
    #[must_use]
    pub fn refused(operation: impl Into<String>) -> Self {
        Self::DeviceRefused {
            operation: operation.into(),
        }
    }

    /// Creates a protocol-invariant error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolInvariant {
            message: message.into(),
        }
    }

    /// Creates a database-corruption error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::DatabaseCorrupt {
            message: message.into(),
        }
    }
}
