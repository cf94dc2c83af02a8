//! Error types shared by every acquisition component.
//!
//! `AcqError` is the single error type that flows out of the collaborator,
//! the scheduler and the multicast. It is `Clone` because one failure inside a
//! background poll loop has to be reported to every subscriber of that loop.
//!
//! ## Error Categories
//!
//! - **`Connection`**: the collaborator could not be reached or the connection
//!   dropped. Recovery: a fresh subscription after teardown.
//! - **`Protocol`**: a collaborator call returned a failure indicator. Never
//!   retried inside a loop; the sequence terminates.
//! - **`Configuration`**: invalid settings (empty channel set, zero buffer
//!   length, unknown stream code). Raised synchronously, before any
//!   connection attempt.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the acquisition error type.
pub type AcqResult<T> = std::result::Result<T, AcqError>;

/// Coarse classification of an [`AcqError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Cannot establish or maintain the collaborator connection.
    Connection,
    /// A collaborator call reported failure.
    Protocol,
    /// Settings rejected before any connection attempt.
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Configuration => "configuration",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for acquisition streaming.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcqError {
    /// The acquisition server could not be reached, or the connection was lost.
    #[error("Connection error ({endpoint}): {message}")]
    Connection {
        /// `host:port` of the server.
        endpoint: String,
        /// Human readable cause.
        message: String,
    },

    /// A collaborator call returned a failure indicator.
    ///
    /// `operation` names the call (`fetch`, `get_sample_count`, ...), which is
    /// what shows up first in logs when a stream dies.
    #[error("Protocol error in {operation}: {message}")]
    Protocol {
        /// Collaborator operation that failed.
        operation: &'static str,
        /// Server-reported message.
        message: String,
    },

    /// Settings failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl AcqError {
    /// Build a [`AcqError::Connection`].
    pub fn connection(endpoint: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Build a [`AcqError::Protocol`].
    pub fn protocol(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Protocol {
            operation,
            message: message.into(),
        }
    }

    /// Build a [`AcqError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// True for errors a fresh subscription may recover from.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}
