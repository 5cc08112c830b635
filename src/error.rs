//! Error types for offline-servicing
//!
//! This module provides error handling for the servicing pipeline, including:
//! - Domain-specific error types (Catalog, Fetch, Apply, Database)
//! - Classification of which errors abort a batch and which are recorded per artifact
//! - Context information (backend name, file path, update ID, etc.)

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for offline-servicing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for offline-servicing
///
/// Catalog errors and [`ApplyError::MountPrecondition`] abort a batch. Every
/// other condition is recorded against the artifact it concerns and surfaced
/// in the batch summary.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "cache.root")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Catalog backend error
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Content fetch or validation error
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Apply error
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (dism, expand, cabextract, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, unparseable container, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true if this error must abort the whole batch
    ///
    /// A catalog that cannot be queried or understood and an unusable mount
    /// target are fatal; everything else is recoverable at artifact
    /// granularity.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Error::Catalog(_) | Error::Apply(ApplyError::MountPrecondition { .. })
        )
    }

    /// Shorthand for a configuration error tied to a config key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Catalog backend errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Backend could not be reached or answered with a server error
    #[error("{backend} catalog unavailable: {reason}")]
    Unavailable {
        /// Backend name (e.g. "curated-index")
        backend: &'static str,
        /// The reason the backend is unavailable
        reason: String,
    },

    /// Backend rejected the supplied credentials
    #[error("{backend} catalog rejected credentials (HTTP {status})")]
    Unauthorized {
        /// Backend name
        backend: &'static str,
        /// HTTP status code returned by the backend
        status: u16,
    },

    /// Backend answered, but the payload could not be understood
    #[error("{backend} catalog returned malformed data: {reason}")]
    Malformed {
        /// Backend name
        backend: &'static str,
        /// The parse failure
        reason: String,
    },

    /// A classification or exclusion rule could not be compiled
    #[error("invalid catalog rule '{pattern}': {reason}")]
    InvalidRule {
        /// The offending pattern
        pattern: String,
        /// The reason compilation failed
        reason: String,
    },
}

/// Content fetch and validation errors (recorded per content item)
#[derive(Debug, Error)]
pub enum FetchError {
    /// Download failed at the transport level or with an HTTP error status
    #[error("transfer of {file_name} failed: {reason}")]
    Transfer {
        /// The content item filename
        file_name: String,
        /// The reason the transfer failed
        reason: String,
    },

    /// Content server answered with a non-success status
    #[error("download of {file_name} returned HTTP {status}")]
    HttpStatus {
        /// The content item filename
        file_name: String,
        /// HTTP status code
        status: u16,
    },

    /// Downloaded bytes did not match the digest the catalog published
    #[error("digest mismatch for {file_name}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The content item filename
        file_name: String,
        /// Digest published by the catalog
        expected: String,
        /// Digest of the downloaded bytes
        actual: String,
    },

    /// Required metadata marker missing from a cabinet
    #[error("{path} does not contain required marker {marker}")]
    MarkerMissing {
        /// The inspected container
        path: PathBuf,
        /// The marker file name that was looked for
        marker: String,
    },

    /// Container could not be parsed by the structured inspector
    #[error("cannot inspect {path}: {reason}")]
    Inspection {
        /// The inspected container
        path: PathBuf,
        /// Why inspection failed
        reason: String,
    },

    /// Content locator could not be resolved to a URL
    #[error("invalid content locator '{locator}': {reason}")]
    InvalidLocator {
        /// The locator as published by the catalog
        locator: String,
        /// Why it could not be resolved
        reason: String,
    },
}

/// Apply-phase errors
#[derive(Debug, Error)]
pub enum ApplyError {
    /// Mount target is missing, not a directory, or not readable
    #[error("mount target {path} is not usable: {reason}")]
    MountPrecondition {
        /// The mount path supplied by the caller
        path: PathBuf,
        /// Why the precondition failed
        reason: String,
    },

    /// Package installation reported failure
    #[error("failed to add package {package}: {reason}")]
    PackageFailed {
        /// The package path handed to the installer
        package: PathBuf,
        /// Installer-reported reason
        reason: String,
    },

    /// Renaming a package between container labels failed
    #[error("failed to relabel {from} to {to}: {reason}")]
    RelabelFailed {
        /// Path before the rename
        from: PathBuf,
        /// Path after the rename
        to: PathBuf,
        /// The reason the rename failed
        reason: String,
    },
}
