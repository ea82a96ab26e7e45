//! Error types for proxy operations.
//!
//! This module defines structured error types for the proxy:
//! - Server errors (binding, accept)
//! - Request errors (unparseable targets, missing host)
//! - Upstream errors (connect failures, timeouts)
//! - Tunnel errors (upgrade, relay I/O)
//!
//! A policy denial is not an error: handlers answer it with a 403 and
//! return normally.

use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Could not bind the listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address we tried to bind.
        addr: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Accepting connections failed with a non-recoverable error.
    #[error("Failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// The request named no destination host.
    #[error("Request has no target host")]
    MissingHost,

    /// The request target is not a valid `host[:port]`.
    #[error("Invalid request target: {0}")]
    InvalidTarget(String),

    /// The plain HTTP path only forwards `http://` URIs.
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// Failed to connect to upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// Upstream did not connect or answer in time.
    #[error("Upstream '{addr}' timed out after {timeout:?}")]
    UpstreamTimeout {
        /// The address we tried to reach.
        addr: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// Upgrade to tunnel failed.
    #[error("HTTP upgrade failed: {0}")]
    UpgradeFailed(String),

    /// A tunnel direction failed mid-relay.
    #[error("Tunnel relay failed: {0}")]
    Relay(std::io::Error),
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl ProxyError {
    /// Status code for errors that are answered with an HTTP response.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingHost
            | ProxyError::InvalidTarget(_)
            | ProxyError::UnsupportedScheme(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Whether this is a routine peer disconnect rather than a real failure.
    pub fn is_disconnect(&self) -> bool {
        let io = match self {
            ProxyError::Io(e) | ProxyError::Relay(e) => e,
            ProxyError::Http(e) => return e.is_incomplete_message() || e.is_closed(),
            _ => return false,
        };
        matches!(
            io.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        )
    }
}
