//! Error types for local storage operations.

/// Errors that can occur during local storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store was closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,

    /// The storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}
