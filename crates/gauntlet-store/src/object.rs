use std::path::PathBuf;

pub use gauntlet_types::{GitRedirect, ObjectKind};

/// Resolution of a hash inside the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredObject {
    /// Raw bytes at `path`, `size` bytes long.
    Raw { path: PathBuf, size: u64 },
    /// A git redirect.
    Git(GitRedirect),
}

impl StoredObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Raw { .. } => ObjectKind::Raw,
            Self::Git(_) => ObjectKind::Git,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_types::ContentHash;

    #[test]
    fn stored_object_kind() {
        let redirect = StoredObject::Git(GitRedirect {
            hash: ContentHash::from_digest([9; 20]),
            url: "https://example.com/repo.git".into(),
        });
        assert_eq!(redirect.kind(), ObjectKind::Git);
        let raw = StoredObject::Raw { path: "/x".into(), size: 3 };
        assert_eq!(raw.kind(), ObjectKind::Raw);
    }
}
