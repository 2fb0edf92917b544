//! Engine error types.
//!
//! Provides error types for all cell-loading and cache operations.

use std::fmt;
use thiserror::Error;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0002,
    /// Operation timed out.
    Timeout = 0x0003,
    /// Operation was cancelled.
    Cancelled = 0x0004,
    /// The engine has been shut down.
    Shutdown = 0x0005,

    // Request errors (0x0100 - 0x01FF)
    /// Cell request can never be satisfied.
    Unsatisfiable = 0x0100,
    /// Too many cell requests accumulated; flush a batch.
    RequestQuantumExceeded = 0x0101,

    // Cache errors (0x0200 - 0x02FF)
    /// Header or body failed the serialisation round-trip check.
    NotSerializable = 0x0200,
    /// Segment body does not match its header.
    CorruptedSegment = 0x0201,

    // Load errors (0x0300 - 0x03FF)
    /// A bulk fact query failed.
    SqlExecution = 0x0300,
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
            0x01 => "Request",
            0x02 => "Cache",
            0x03 => "Load",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Lattice.
///
/// This enum covers all errors that can occur while batching cell
/// requests, loading segments, and managing the segment cache. Each
/// variant includes relevant context for debugging.
#[derive(Debug, Clone, Error)]
pub enum LatticeError {
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Statement timed out.
    #[error("statement timed out after {duration_ms}ms")]
    Timeout {
        /// Time the statement had been running, in milliseconds.
        duration_ms: u64,
    },

    /// Statement was cancelled.
    #[error("statement was cancelled")]
    Cancelled,

    /// The cache manager has been shut down; no further commands are
    /// accepted.
    #[error("cache manager has been shut down")]
    Shutdown,

    /// Cell request can never return a value (for example, an empty
    /// slicer).
    #[error("cell request is unsatisfiable")]
    Unsatisfiable,

    /// The batch reader has accumulated its full quantum of cell
    /// requests. Not really an error: the evaluator catches this and
    /// loads a batch early.
    #[error("cell request quantum of {quantum} exceeded")]
    RequestQuantumExceeded {
        /// The configured quantum.
        quantum: usize,
    },

    /// A header or body failed the serialisation round-trip check that
    /// every cache `put` must pass.
    #[error("segment {what} is not serializable: {reason}")]
    NotSerializable {
        /// "header" or "body".
        what: &'static str,
        /// Codec error text.
        reason: String,
    },

    /// A segment body does not agree with its header.
    #[error("corrupted segment '{segment}': {reason}")]
    CorruptedSegment {
        /// Display form of the offending segment header.
        segment: String,
        /// Reason for the mismatch.
        reason: String,
    },

    /// A bulk fact query failed. Propagated through every future of the
    /// failed load invocation.
    #[error("SQL execution failed: {message}")]
    SqlExecution {
        /// Driver or generator error text.
        message: String,
    },
}

impl LatticeError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::InvalidConfig { .. } => ErrorCode::InvalidArgument,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Shutdown => ErrorCode::Shutdown,
            Self::Unsatisfiable => ErrorCode::Unsatisfiable,
            Self::RequestQuantumExceeded { .. } => ErrorCode::RequestQuantumExceeded,
            Self::NotSerializable { .. } => ErrorCode::NotSerializable,
            Self::CorruptedSegment { .. } => ErrorCode::CorruptedSegment,
            Self::SqlExecution { .. } => ErrorCode::SqlExecution,
        }
    }

    /// Returns true if this error aborts the whole statement rather than
    /// a single cache interaction.
    #[must_use]
    pub const fn aborts_statement(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Cancelled | Self::Shutdown | Self::SqlExecution { .. }
        )
    }

    /// Returns true if this error is internal control flow that the
    /// evaluator handles without surfacing to the user.
    #[must_use]
    pub const fn is_control_flow(&self) -> bool {
        matches!(self, Self::RequestQuantumExceeded { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a SQL execution error.
    #[must_use]
    pub fn sql(message: impl Into<String>) -> Self {
        Self::SqlExecution {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = LatticeError::NotSerializable {
            what: "body",
            reason: "unexpected eof".into(),
        };
        assert_eq!(err.code(), ErrorCode::NotSerializable);
        assert_eq!(err.code().category(), "Cache");
    }

    #[test]
    fn test_error_display() {
        let err = LatticeError::RequestQuantumExceeded { quantum: 5000 };
        assert_eq!(err.to_string(), "cell request quantum of 5000 exceeded");
    }

    #[test]
    fn test_aborts_statement() {
        assert!(LatticeError::Cancelled.aborts_statement());
        assert!(LatticeError::sql("boom").aborts_statement());
        assert!(!LatticeError::Unsatisfiable.aborts_statement());
    }

    #[test]
    fn test_control_flow() {
        assert!(LatticeError::RequestQuantumExceeded { quantum: 1 }.is_control_flow());
        assert!(!LatticeError::Cancelled.is_control_flow());
    }
}
