//! Error types for directory provisioning operations.
//!
//! This module provides the error taxonomy shared by the directory client and its callers,
//! including stable error codes, HTTP status mapping and structured error responses.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Main error type for directory provisioning operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// No directory session could be established or borrowed
    #[error("Directory connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// Every pooled connection is currently lent out
    #[error("Connection pool exhausted: {outstanding} of {max} connections in use")]
    PoolExhausted {
        /// Connections currently lent out
        outstanding: usize,
        /// Configured pool ceiling
        max: usize,
    },

    /// The pool has been shut down
    #[error("Connection pool is closed")]
    PoolClosed,

    /// The circuit breaker is rejecting calls
    #[error("Circuit open: directory calls suspended for another {retry_after:?}")]
    CircuitOpen {
        /// Time left before a probe call is admitted
        retry_after: Duration,
    },

    /// The service account bind was rejected
    #[error("Directory authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An entry with the same login already exists
    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    /// Account not found
    #[error("Account not found: {0}")]
    NotFound(String),

    /// The add operation was rejected for a reason other than duplication
    #[error("Account creation failed: {0}")]
    CreationFailed(String),

    /// No unused login could be derived within the attempt ceiling
    #[error("No free login derived from `{base}` after {attempts} attempts")]
    SuggestionExhausted {
        /// Base identifier the candidates were derived from
        base: String,
        /// Number of candidates checked
        attempts: u32,
    },

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Directory protocol error outside the categories above
    #[error("Directory error: {0}")]
    Directory(String),

    /// Caller input rejected before reaching the directory
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Specialized result type for directory provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Structured error response for serialization.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
    /// Optional request ID for tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error detail structure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorDetail {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// How an error outcome should be recorded by a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Counts toward opening the circuit.
    Failure,
    /// Rejected by input validation before any pool or directory work; not recorded.
    Neutral,
}

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionUnavailable(_) => "CONNECTION_UNAVAILABLE",
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::PoolClosed => "POOL_CLOSED",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::NotFound(_) => "NOT_FOUND",
            Self::CreationFailed(_) => "CREATION_FAILED",
            Self::SuggestionExhausted { .. } => "SUGGESTION_EXHAUSTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Directory(_) => "DIRECTORY_ERROR",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Returns the HTTP status a handler should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) => 409,
            Self::SuggestionExhausted { .. } => 422,
            Self::ConnectionUnavailable(_)
            | Self::PoolExhausted { .. }
            | Self::PoolClosed
            | Self::CircuitOpen { .. }
            | Self::AuthenticationFailed(_) => 503,
            Self::Timeout(_) => 504,
            Self::CreationFailed(_) | Self::Directory(_) | Self::ConfigError(_) => 500,
        }
    }

    /// Classifies the error for circuit-breaker accounting.
    ///
    /// Every error raised behind the breaker gate is a failure, including business outcomes
    /// and pool saturation; only input validation is neutral.
    #[must_use]
    pub const fn failure_class(&self) -> FailureClass {
        match self {
            Self::InvalidInput(_) => FailureClass::Neutral,
            _ => FailureClass::Failure,
        }
    }

    /// Returns true if the connection the error occurred on should not be reused.
    #[must_use]
    pub const fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable(_)
                | Self::AuthenticationFailed(_)
                | Self::CreationFailed(_)
                | Self::Timeout(_)
                | Self::Directory(_)
        )
    }

    /// Converts the error into an `ErrorResponse`.
    #[must_use]
    pub fn into_error_response(self) -> ErrorResponse {
        self.into_error_response_with_id(None)
    }

    /// Converts the error into an `ErrorResponse` with a request ID.
    #[must_use]
    pub fn into_error_response_with_id(self, request_id: Option<String>) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: None,
            },
            request_id,
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_)
                | Self::ConnectionUnavailable(_)
                | Self::AuthenticationFailed(_)
                | Self::Directory(_)
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid directory URL: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::InvalidInput(err.to_string())
    }
}
