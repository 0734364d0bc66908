use gauntlet_types::ContentHash;
use thiserror::Error;

/// Which composition namespace an error came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    Linked,
    BuildOnly,
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Linked => "compose",
            Self::BuildOnly => "compose-buildonly",
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    /// One package pinned to two different hashes.
    #[error("package '{package}' listed twice at two revisions in {namespace}")]
    PackageCollision { package: String, namespace: Namespace },

    /// Two different packages resolved to the same content.
    #[error("hash {hash} listed twice for two packages in {namespace}")]
    HashCollision { hash: ContentHash, namespace: Namespace },
}

pub type ComposeResult<T> = Result<T, ComposeError>;
