use std::collections::{HashMap, HashSet};

use gauntlet_types::{ComposeEntry, ContentHash};
use tracing::debug;

use crate::error::{ComposeError, ComposeResult, Namespace};

/// The validated, deduplicated dependency declarations of one shard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencySet {
    /// Part of the resulting image, installed first.
    pub linked: Vec<ComposeEntry>,
    /// Present only while the task runs.
    pub build_only: Vec<ComposeEntry>,
}

impl DependencySet {
    pub fn linked_hashes(&self) -> Vec<ContentHash> {
        self.linked.iter().map(|e| e.hash).collect()
    }

    pub fn build_only_hashes(&self) -> Vec<ContentHash> {
        self.build_only.iter().map(|e| e.hash).collect()
    }

    /// Every entry in install order: linked, then build-only.
    pub fn iter(&self) -> impl Iterator<Item = &ComposeEntry> {
        self.linked.iter().chain(&self.build_only)
    }

    pub fn len(&self) -> usize {
        self.linked.len() + self.build_only.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the package name declared for `hash`, if any.
    pub fn package_for(&self, hash: &ContentHash) -> Option<&str> {
        self.iter()
            .find(|e| e.hash == *hash)
            .map(|e| e.package.as_str())
    }
}

/// Deduplicate one namespace and reject collisions.
///
/// Exact duplicates collapse to their first occurrence, keeping declared
/// order. Afterwards no package may appear twice and no hash may appear
/// twice; the package check runs first.
pub fn resolve_namespace(
    entries: &[ComposeEntry],
    namespace: Namespace,
) -> ComposeResult<Vec<ComposeEntry>> {
    let mut seen = HashSet::with_capacity(entries.len());
    let unique: Vec<ComposeEntry> = entries
        .iter()
        .filter(|e| seen.insert(*e))
        .cloned()
        .collect();

    let mut packages: HashMap<&str, &ContentHash> = HashMap::with_capacity(unique.len());
    for entry in &unique {
        if packages.insert(&entry.package, &entry.hash).is_some() {
            return Err(ComposeError::PackageCollision {
                package: entry.package.clone(),
                namespace,
            });
        }
    }

    let mut hashes = HashSet::with_capacity(unique.len());
    for entry in &unique {
        if !hashes.insert(entry.hash) {
            return Err(ComposeError::HashCollision {
                hash: entry.hash,
                namespace,
            });
        }
    }

    debug!(
        %namespace,
        declared = entries.len(),
        unique = unique.len(),
        "compose namespace resolved"
    );
    Ok(unique)
}

/// Validate both namespaces of a shard's declarations.
///
/// The namespaces are independent: a package may appear once in each.
pub fn resolve(linked: &[ComposeEntry], build_only: &[ComposeEntry]) -> ComposeResult<DependencySet> {
    Ok(DependencySet {
        linked: resolve_namespace(linked, Namespace::Linked)?,
        build_only: resolve_namespace(build_only, Namespace::BuildOnly)?,
    })
}
