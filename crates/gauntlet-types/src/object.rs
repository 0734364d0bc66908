use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::ContentHash;

/// What a hash resolves to inside the store. Carried on the wire in the
/// `X-Gauntlet-Type` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Raw bytes held in the object directory.
    Raw,
    /// A commit inside an external git repository.
    Git,
}

impl ObjectKind {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Git => "git",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(Self::Raw),
            "git" => Some(Self::Git),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hash that names a commit in an external repository instead of a blob.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitRedirect {
    pub hash: ContentHash,
    pub url: String,
}

impl fmt::Display for GitRedirect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.hash, self.url)
    }
}
