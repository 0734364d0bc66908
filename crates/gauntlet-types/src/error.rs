use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid hash length: expected {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid package name: '{0}'")]
    InvalidPackageName(String),

    #[error("compose entries are in <package>:<hash> form, got '{0}'")]
    InvalidComposeEntry(String),
}
