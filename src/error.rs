//! Error types for the csaf-mirror crate.
//!
//! This module provides a comprehensive error type [`MirrorError`] that covers
//! all failure modes in the library, enabling proper error handling.

use std::io;

/// The main error type for all operations in this crate.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Configuration error (missing or invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote returned 404 or 410. Callers use this sentinel to
    /// implement fallback probes without parsing messages.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote returned a non-2xx status other than not-found.
    #[error("Fetching {url} failed with status {status}")]
    Status {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP request via middleware failed.
    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (file operations, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A timestamp could not be parsed as RFC 3339.
    #[error("Invalid timestamp: {0}")]
    Time(#[from] chrono::ParseError),

    /// A path expression could not be compiled or a matched value had the
    /// wrong shape.
    #[error("Path expression error: {0}")]
    PathExpr(String),

    /// No provider metadata could be located for a domain.
    #[error("No provider-metadata.json found for '{domain}'")]
    Metadata {
        /// The domain whose well-known locations were probed.
        domain: String,
    },

    /// The provider does not allow mirroring by aggregators.
    #[error("No mirroring of '{provider}' allowed")]
    Policy {
        /// Name of the provider that refused mirroring.
        provider: String,
    },

    /// The embedded advisory schema could not be compiled.
    #[error("Schema error: {0}")]
    Schema(String),

    /// OpenPGP key handling or signing failed.
    #[error("OpenPGP error: {0}")]
    Pgp(#[from] pgp::errors::Error),

    /// The remote validation service failed. This indicates infrastructure
    /// failure, not document failure, and aborts the whole run.
    #[error("Remote validator error: {0}")]
    RemoteValidator(String),

    /// Orchestration failed (root directories, orphan removal, manifest).
    #[error("{0}")]
    Orchestration(String),
}

/// A specialized Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

impl MirrorError {
    /// Create a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a new path expression error.
    pub fn path_expr(message: impl Into<String>) -> Self {
        Self::PathExpr(message.into())
    }

    /// Create a new schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create a new remote validator error.
    pub fn remote_validator(message: impl Into<String>) -> Self {
        Self::RemoteValidator(message.into())
    }

    /// Create a new orchestration error.
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration(message.into())
    }

    /// Check if this error is the not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_sentinel() {
        let err = MirrorError::NotFound("https://example.com/x".to_string());
        assert!(err.is_not_found());

        let err = MirrorError::Status {
            url: "https://example.com/x".to_string(),
            status: 500,
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_helper_constructors() {
        assert!(matches!(
            MirrorError::config("bad"),
            MirrorError::Config(m) if m == "bad"
        ));
        assert!(matches!(
            MirrorError::remote_validator("down"),
            MirrorError::RemoteValidator(m) if m == "down"
        ));
    }
}
