//! Core error types for workload registration and catalog loading.
//!
//! All errors are explicit and typed. Registry errors indicate a catalog or
//! event-name mismatch and are treated as fatal by callers.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    // Registry errors
    #[error("workload '{id}' is already registered")]
    DuplicateId { id: String },

    #[error("workload '{id}' not found")]
    NotFound { id: String },

    #[error("invalid workload id '{id}': {reason}")]
    InvalidWorkloadId { id: String, reason: String },

    #[error("workload '{id}' already owns container '{container}'")]
    HandleAlreadyAttached { id: String, container: String },

    // Catalog errors
    #[error("failed to read catalog '{path}': {reason}")]
    CatalogRead { path: PathBuf, reason: String },

    #[error("catalog parse error: {reason}")]
    CatalogParse { reason: String },

    #[error("invalid catalog: {reason}")]
    InvalidCatalog { reason: String },
}

impl Error {
    /// Create a duplicate id error.
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an invalid workload id error.
    pub fn invalid_workload_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkloadId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a catalog read error.
    pub fn catalog_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CatalogRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a catalog parse error.
    pub fn catalog_parse(reason: impl Into<String>) -> Self {
        Self::CatalogParse {
            reason: reason.into(),
        }
    }

    /// Create an invalid catalog error.
    pub fn invalid_catalog(reason: impl Into<String>) -> Self {
        Self::InvalidCatalog {
            reason: reason.into(),
        }
    }

    /// Whether this error is a failed registry lookup.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
