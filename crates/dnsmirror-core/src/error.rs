//! Error types for the dnsmirror engine
//!
//! This module defines all error types used throughout the crate. The first
//! four variants are the taxonomy the engine reacts to; the rest cover local
//! input and configuration problems.

use thiserror::Error;

/// Result type alias for dnsmirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the dnsmirror engine
#[derive(Error, Debug)]
pub enum Error {
    /// The session is no longer valid; the user must log in again
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    /// The record was rejected, locally or by the remote store
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The remote store answered with an error
    #[error("Record store error: {0}")]
    Remote(String),

    /// The remote store could not be reached at all
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Record or zone not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an authentication error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a remote store error
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkUnavailable(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error means the session must re-authenticate
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Whether the error is a transport failure worth retrying silently
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }

    /// Whether a read failing with this error may fall back to cached data
    pub fn allows_stale_fallback(&self) -> bool {
        !self.is_unauthorized()
    }

    /// Message suitable for a user-facing notice
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized(_) => "Session expired, please log in again".to_string(),
            Self::Validation(msg)
            | Self::Remote(msg)
            | Self::NotFound(msg)
            | Self::InvalidInput(msg) => msg.clone(),
            Self::NetworkUnavailable(_) => "Record store is unreachable".to_string(),
            other => other.to_string(),
        }
    }
}
