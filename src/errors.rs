//! Error types for the multi-role retrieval core.
//!
//! Typed errors surface from cache construction and index loading; the
//! top-level retriever catches everything and degrades instead of failing.

use thiserror::Error;

/// Main error type for the retrieval system.
///
/// `Clone` is required so a single in-flight load can hand the same failure
/// to every caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum RetrievalError {
    /// Invalid construction-time configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Role is not known to the role registry
    #[error("Role not found: {role_id}")]
    RoleNotFound { role_id: String },

    /// Index build or load failed
    #[error("Failed to load index for role {role_id}: {reason}")]
    LoadFailure { role_id: String, reason: String },

    /// Per-role vector search failed
    #[error("Search failed for role {role_id}: {reason}")]
    SearchFailure { role_id: String, reason: String },

    /// Operation exceeded its deadline
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Generic errors with context
    #[error("Retrieval error: {0}")]
    Generic(String),
}

/// Result type alias for retrieval operations
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Convert anyhow errors from collaborator seams
impl From<anyhow::Error> for RetrievalError {
    fn from(err: anyhow::Error) -> Self {
        RetrievalError::Generic(err.to_string())
    }
}
