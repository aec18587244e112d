//! Error types for pegasus-client
//!
//! Two layers:
//! - `ErrorCode`: the closed set of status codes carried on the wire and
//!   reported by every operation.
//! - `Error`: what the library returns. Each variant maps to exactly one code.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Status codes shared by client and cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    Timeout,
    DataNotExist,
    ObjectNotFound,
    SessionNotReady,
    InvalidParameters,
    InvalidState,
    ForwardToOthers,
    ServiceNotActive,
    ParentPartitionMisused,
    NetworkFailure,
    SessionReset,
    InvalidData,
    HandlerNotFound,
    Busy,
    Unknown,
}

impl ErrorCode {
    /// Canonical `ERR_*` name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "ERR_OK",
            ErrorCode::Timeout => "ERR_TIMEOUT",
            ErrorCode::DataNotExist => "ERR_DATA_NOT_EXIST",
            ErrorCode::ObjectNotFound => "ERR_OBJECT_NOT_FOUND",
            ErrorCode::SessionNotReady => "ERR_SESSION_NOT_READY",
            ErrorCode::InvalidParameters => "ERR_INVALID_PARAMETERS",
            ErrorCode::InvalidState => "ERR_INVALID_STATE",
            ErrorCode::ForwardToOthers => "ERR_FORWARD_TO_OTHERS",
            ErrorCode::ServiceNotActive => "ERR_SERVICE_NOT_ACTIVE",
            ErrorCode::ParentPartitionMisused => "ERR_PARENT_PARTITION_MISUSED",
            ErrorCode::NetworkFailure => "ERR_NETWORK_FAILURE",
            ErrorCode::SessionReset => "ERR_SESSION_RESET",
            ErrorCode::InvalidData => "ERR_INVALID_DATA",
            ErrorCode::HandlerNotFound => "ERR_HANDLER_NOT_FOUND",
            ErrorCode::Busy => "ERR_BUSY",
            ErrorCode::Unknown => "ERR_UNKNOWN",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorCode::Ok)
    }

    /// Replica replies meaning our routing table is stale.
    pub fn is_stale_route(&self) -> bool {
        matches!(
            self,
            ErrorCode::ObjectNotFound | ErrorCode::InvalidState | ErrorCode::ParentPartitionMisused
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    // === Expected outcomes ===
    #[error("Data not exist")]
    DataNotExist,

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Session Errors ===
    #[error("Session not ready: {0}")]
    NotReady(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Protocol Errors ===
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    // === Caller Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Cluster Errors ===
    #[error("Server replied {code}: {context}")]
    Server { code: ErrorCode, context: String },
}

impl Error {
    /// Build the error for a non-OK status reported by the cluster.
    pub fn from_code(code: ErrorCode, context: impl Into<String>) -> Self {
        let context = context.into();
        match code {
            ErrorCode::DataNotExist => Error::DataNotExist,
            ErrorCode::Timeout => Error::Timeout(context),
            ErrorCode::SessionNotReady => Error::NotReady(context),
            ErrorCode::InvalidParameters => Error::InvalidArgument(context),
            ErrorCode::NetworkFailure => Error::ConnectionFailed(context),
            ErrorCode::InvalidData => Error::Protocol(context),
            code => Error::Server { code, context },
        }
    }

    /// The status code this error reports.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::DataNotExist => ErrorCode::DataNotExist,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::NotReady(_) => ErrorCode::SessionNotReady,
            Error::TableNotFound(_) => ErrorCode::ObjectNotFound,
            Error::ConnectionFailed(_) | Error::Io(_) => ErrorCode::NetworkFailure,
            Error::Protocol(_) | Error::ChecksumMismatch { .. } => ErrorCode::InvalidData,
            Error::InvalidArgument(_) | Error::InvalidConfig(_) => ErrorCode::InvalidParameters,
            Error::Server { code, .. } => *code,
        }
    }

    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Io(_) => true,
            Error::Server { code, .. } => {
                code.is_stale_route()
                    || matches!(
                        code,
                        ErrorCode::Busy
                            | ErrorCode::SessionReset
                            | ErrorCode::ForwardToOthers
                            | ErrorCode::ServiceNotActive
                    )
            }
            _ => false,
        }
    }

    /// Does this error mean the record is absent?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DataNotExist)
    }

    /// Should the routing table be refreshed before retrying?
    pub(crate) fn needs_route_refresh(&self) -> bool {
        match self {
            Error::ConnectionFailed(_) | Error::Io(_) => true,
            Error::Server { code, .. } => code.is_stale_route() || *code == ErrorCode::SessionReset,
            _ => false,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Protocol(format!("bincode: {}", e))
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
