//! Error types for s3sync-core
//!
//! Provides a unified error type that can be converted to appropriate exit codes.
//! Errors fall into two groups: fatal errors that end a session before or during
//! discovery, and per-item errors that are collected and reported at the end.

use std::path::Path;

use thiserror::Error;

/// Result type alias for s3sync-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for s3sync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed local root or remote address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Remote enumeration failed; the action set cannot be trusted
    #[error("Listing failed: {0}")]
    ListingFailed(String),

    /// A single transfer or deletion failed
    #[error("{key}: {message}")]
    Transfer { key: String, message: String },

    /// A local entry could not be read during discovery
    #[error("Cannot read {path}: {message}")]
    LocalRead { path: String, message: String },

    /// A network step exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// External stop requested
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network error (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Conflict error
    #[error("Conflict: {0}")]
    Conflict(String),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Wrap any error as a per-item transfer failure for `key`
    pub fn transfer(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Transfer {
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// Wrap an IO failure on a local path as a discovery failure
    pub fn local_read(path: &Path, err: impl std::fmt::Display) -> Self {
        Error::LocalRead {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Whether this error is confined to a single item
    pub const fn is_per_item(&self) -> bool {
        matches!(
            self,
            Error::Transfer { .. } | Error::LocalRead { .. } | Error::Timeout(_)
        )
    }

    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidAddress(_) => 2,                     // UsageError
            Error::Config(_) => 2,                             // UsageError
            Error::ListingFailed(_) => 3,                      // NetworkError
            Error::Network(_) | Error::Timeout(_) => 3,        // NetworkError
            Error::Auth(_) => 4,                               // AuthError
            Error::NotFound(_) => 5,                           // NotFound
            Error::Conflict(_) => 6,                           // Conflict
            Error::Transfer { .. } | Error::LocalRead { .. } => 8, // PartialFailure
            Error::Cancelled => 130,                           // Interrupted
            _ => 1,                                            // GeneralError
        }
    }
}
