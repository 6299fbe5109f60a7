//! Error types for `xoarena-core`.
//!
//! Calls against external dependencies (the shared store, the identity
//! issuer) return [`CoreResult<T>`], an alias for `Result<T, CoreError>`.

/// Unified error type for deadline-guarded calls and store access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// The operation did not finish before its deadline.
    #[error("{label} timed out after {after_ms}ms")]
    Timeout { label: String, after_ms: u64 },

    /// The backing store rejected or failed the operation.
    #[error("store error: {0}")]
    Store(String),

    /// The background task driving a guarded call panicked or was aborted.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl CoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout { .. })
    }
}

/// Convenience alias used throughout `xoarena-core`.
pub type CoreResult<T> = Result<T, CoreError>;
