use gauntlet_types::{ContentHash, TypeError};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested hash is neither a stored object nor a git redirect.
    #[error("object not found: {0}")]
    NotFound(ContentHash),

    /// A textual hash failed validation.
    #[error("invalid object hash: {0}")]
    InvalidHash(#[from] TypeError),

    /// An upload exceeded the configured size limit.
    #[error("object too large: exceeds {max} bytes")]
    TooLarge { max: u64 },

    /// The git redirect index could not be read or written.
    #[error("redirect index {path}: {reason}")]
    Index { path: String, reason: String },

    /// I/O error from the underlying directory tree.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
