//! Error types for the passage gateway.
//!
//! This module provides a unified error type with explicit variants for
//! transport, authentication, server, and response-format failures. Every
//! outcome a caller can observe from the gateway is one of these variants;
//! raw HTTP-client or parser errors never cross this boundary.

use std::fmt;
use thiserror::Error;

/// The unified error type for gateway operations.
///
/// All variants are terminal at the gateway layer: the gateway retries only
/// the 401 → refresh → retry path, and at most once. Retry policy for
/// anything else belongs to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure before any response was received.
    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// Authentication or authorization failure.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Remote server error (HTTP 5xx).
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Transport succeeded but the body was not the expected JSON.
    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    /// Any other non-success response, carrying the server's error body.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Input validation failure when constructing a URL.
    #[error("invalid API URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network connection failed.
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// Generic HTTP transport error.
    #[error("HTTP error: {message}")]
    Http { message: String },
}

/// Authentication-related errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No valid access token and refresh could not establish one.
    #[error("not authenticated")]
    Unauthenticated,

    /// Refresh was attempted and failed; the session is over.
    #[error("session expired")]
    SessionExpired,

    /// Authenticated but forbidden (HTTP 403). Never triggers a refresh.
    #[error("permission denied")]
    PermissionDenied,
}

/// A 5xx response from the remote server.
///
/// Surfaced as-is; the gateway never retries these itself.
#[derive(Debug)]
pub struct ServerError {
    /// HTTP status code (500..=599).
    pub status: u16,
    /// Error message from the server, if one could be read.
    pub message: Option<String>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}

/// A non-success response outside the 401/403/5xx classification,
/// carrying whatever structured error body the server returned.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Server-side error code (if present).
    pub error: Option<String>,
    /// Error message from the server.
    pub message: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}", self.status)?;
        if let Some(ref error) = self.error {
            write!(f, " [{}]", error)?;
        }
        if let Some(ref message) = self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: u16, error: Option<String>, message: Option<String>) -> Self {
        Self {
            status,
            error,
            message,
        }
    }
}

/// Errors from a [`TokenStore`](crate::traits::TokenStore) implementation.
///
/// Deliberately separate from [`Error`]: persistence failures are not an
/// outcome of a gateway request. The gateway logs them and carries on with
/// the in-memory tokens.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem or other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Stored tokens could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(String),
}
