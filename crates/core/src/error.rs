//! Catalog error model.

use thiserror::Error;

/// Result type used across the catalog.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Catalog-level error.
///
/// Every adapter error is eventually mapped into one of these variants so that
/// callers can branch on the failure class without knowing which backend
/// produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A value failed validation (e.g. negative price).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The entity does not exist or carries a tombstone.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write lost against a concurrent or prior mutation.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// A store, cache, blob or broker transport failed.
    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable {
        service: &'static str,
        message: String,
    },

    /// A payload could not be decoded.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The caller cancelled the operation before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl CatalogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn upstream(service: &'static str, msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service,
            message: msg.into(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// True for failures that a retry against the same backend might fix.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}
