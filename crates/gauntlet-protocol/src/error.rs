use gauntlet_types::{ContentHash, GitRedirect, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("object not found: {0}")]
    NotFound(ContentHash),

    /// The server answered with a non-success status.
    #[error("remote error ({status}): {body}")]
    Remote { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A byte-level operation was asked of a hash that is a git redirect.
    #[error("{0} is a git redirect")]
    Redirected(GitRedirect),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid hash in response: {0}")]
    InvalidHash(#[from] TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
