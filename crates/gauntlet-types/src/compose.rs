use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::ContentHash;

/// One declared dependency of a shard: a package name pinned to the content
/// hash of a published shard.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComposeEntry {
    pub package: String,
    pub hash: ContentHash,
}

impl ComposeEntry {
    /// Create an entry, validating the package name.
    pub fn new(package: impl Into<String>, hash: ContentHash) -> Result<Self, TypeError> {
        let package = package.into();
        validate_package_name(&package)?;
        Ok(Self { package, hash })
    }

    /// Parse the `<package>:<hash>` shorthand.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (package, hash) = s
            .split_once(':')
            .ok_or_else(|| TypeError::InvalidComposeEntry(s.to_string()))?;
        Self::new(package, ContentHash::from_hex(hash)?)
    }
}

impl fmt::Display for ComposeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.package, self.hash)
    }
}

/// Package names are non-empty runs of word characters.
pub fn validate_package_name(name: &str) -> Result<(), TypeError> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(TypeError::InvalidPackageName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_digest([byte; 20])
    }

    #[test]
    fn parse_shorthand() {
        let text = format!("libc:{}", hash(7));
        let entry = ComposeEntry::parse(&text).unwrap();
        assert_eq!(entry.package, "libc");
        assert_eq!(entry.hash, hash(7));
        assert_eq!(entry.to_string(), text);
    }

    #[test]
    fn parse_rejects_missing_separator() {
        assert!(matches!(
            ComposeEntry::parse("libc"),
            Err(TypeError::InvalidComposeEntry(_))
        ));
    }

    #[test]
    fn package_names_are_word_characters() {
        assert!(ComposeEntry::new("core_utils2", hash(1)).is_ok());
        assert!(matches!(
            ComposeEntry::new("core-utils", hash(1)),
            Err(TypeError::InvalidPackageName(_))
        ));
        assert!(ComposeEntry::new("", hash(1)).is_err());
    }
}
