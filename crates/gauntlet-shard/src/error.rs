use thiserror::Error;

/// Malformed shard bytes, or a header that cannot be represented on the wire.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("invalid shard magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported shard version: {0}")]
    UnsupportedVersion(u8),

    #[error("shard truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("shard {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("{field} too long for shard header: {len} (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShardError {
    /// Returns `true` for errors that indicate malformed shard bytes rather
    /// than a failing underlying stream.
    pub fn is_format_error(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::FieldTooLong { .. })
    }
}

pub type ShardResult<T> = Result<T, ShardError>;
