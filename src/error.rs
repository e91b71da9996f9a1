// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the dispatch core.
//!
//! Errors are classified by whether a retry can help. The retrying request
//! recovers transient failures locally with exponential backoff; permanent
//! failures surface through the terminal completion exactly once.
//!
//! # Error Categories
//!
//! | Error Type | Transient | Description |
//! |------------|-----------|-------------|
//! | `Network` | Yes | I/O-level failure with no HTTP response (refused, reset, timeout, DNS) |
//! | `Status` (5xx, 408) | Yes | Server-side or request-timeout status |
//! | `Status` (other) | No | Client errors, auth failures, anything 4xx but 408 |
//! | `Protocol` | No | Malformed URL, unsupported method, wrong body type for the request kind |
//! | `Shutdown` | No | Cannot schedule further work |
//!
//! # Classification
//!
//! Use [`DispatchError::is_transient()`] to decide whether an attempt is
//! worth retrying. Transient errors indicate the remote side may recover;
//! permanent errors indicate the request itself is wrong or the caller is
//! shutting down.

use http::StatusCode;
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors observed by the dispatch core.
///
/// Use [`is_transient()`](Self::is_transient) to check whether the failed
/// attempt should be retried.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// I/O-level failure before any HTTP response arrived.
    ///
    /// Connection refused/reset, timeouts, DNS failures. Always transient.
    #[error("network error ({operation}): {message}")]
    Network {
        operation: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The remote answered with a non-success status.
    ///
    /// Transient for the `5xx` family and request-timeout (408); permanent
    /// for everything else.
    #[error("request failed with status {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// Invalid request construction.
    ///
    /// Malformed URL, unsupported method, or a body that does not match the
    /// request kind. Raised synchronously before any attempt is made.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Shutdown in progress; no further attempts can be scheduled.
    #[error("shutdown in progress")]
    Shutdown,
}

impl DispatchError {
    /// Create a network error from an `std::io::Error`.
    pub fn network(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Network {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a network error without a source.
    pub fn network_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a status error from a response status.
    pub fn status(status: StatusCode) -> Self {
        Self::Status {
            status,
            message: status
                .canonical_reason()
                .unwrap_or("unrecognized status")
                .to_string(),
        }
    }

    /// Check if a retry could help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Status { status, .. } => is_transient_status(*status),
            Self::Protocol(_) => false,
            Self::Shutdown => false,
        }
    }
}

/// Whether a response status is worth retrying.
///
/// The `5xx` family plus request-timeout (408).
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT
}
