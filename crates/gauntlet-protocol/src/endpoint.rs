use gauntlet_types::ContentHash;

/// HTTP endpoint paths for the object store.
pub mod endpoints {
    /// `POST` a raw object.
    pub const PUBLISH: &str = "/";
    /// `GET`/`HEAD` an object by hash.
    pub const OBJECT: &str = "/:hash";
    /// `POST` a git repository URL to index.
    pub const GIT: &str = "/git";
}

/// Response header distinguishing raw objects from git redirects.
pub const TYPE_HEADER: &str = "X-Gauntlet-Type";

/// Request path for the object named by `hash`.
pub fn object_path(hash: &ContentHash) -> String {
    format!("/{}", hash.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_is_full_hex() {
        let hash = ContentHash::from_digest([0x0f; 20]);
        assert_eq!(object_path(&hash), format!("/{}", "0f".repeat(20)));
    }

    #[test]
    fn endpoint_paths() {
        assert_eq!(endpoints::PUBLISH, "/");
        assert_eq!(endpoints::GIT, "/git");
    }
}
