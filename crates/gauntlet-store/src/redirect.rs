use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use gauntlet_types::ContentHash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::object::GitRedirect;

/// File inside the git directory holding the persisted redirect table.
pub const INDEX_FILE: &str = "redirects.json";

#[derive(Default, Serialize, Deserialize)]
struct IndexFile {
    redirects: HashMap<ContentHash, String>,
}

/// Table of commit hashes that resolve to external git repositories.
///
/// The table lives in memory behind a `RwLock` and is rewritten atomically to
/// `<git_dir>/redirects.json` on every registration. Numbered clone slots are
/// allocated as sibling directories of the index file.
pub struct RedirectIndex {
    git_dir: PathBuf,
    table: RwLock<HashMap<ContentHash, String>>,
}

impl RedirectIndex {
    /// Open (or create) the index under `git_dir`.
    pub fn open(git_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let git_dir = git_dir.into();
        fs::create_dir_all(&git_dir)?;

        let index_path = git_dir.join(INDEX_FILE);
        let table = match fs::read(&index_path) {
            Ok(bytes) => {
                let file: IndexFile =
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::Index {
                        path: index_path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                file.redirects
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(git_dir = %git_dir.display(), entries = table.len(), "opened redirect index");

        Ok(Self {
            git_dir,
            table: RwLock::new(table),
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn index_error(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Index {
            path: self.git_dir.join(INDEX_FILE).display().to_string(),
            reason: reason.into(),
        }
    }

    fn read_table(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<ContentHash, String>>> {
        self.table
            .read()
            .map_err(|_| self.index_error("redirect table read lock poisoned"))
    }

    fn write_table(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<ContentHash, String>>> {
        self.table
            .write()
            .map_err(|_| self.index_error("redirect table write lock poisoned"))
    }

    /// Look up a redirect for `hash`.
    pub fn get(&self, hash: &ContentHash) -> StoreResult<Option<GitRedirect>> {
        let table = self.read_table()?;
        Ok(table.get(hash).map(|url| GitRedirect {
            hash: *hash,
            url: url.clone(),
        }))
    }

    /// Number of registered redirects.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read_table()?.len())
    }

    /// Returns `true` if no redirects are registered.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Point every hash in `commits` at `url` and persist the table.
    ///
    /// Returns the number of hashes that were not previously registered.
    /// Blocks on the index file write; async callers go through
    /// [`FsObjectStore::register_git`](crate::FsObjectStore::register_git).
    pub fn register(&self, url: &str, commits: &[ContentHash]) -> StoreResult<usize> {
        let mut table = self.write_table()?;
        let mut added = 0;
        for hash in commits {
            if table.insert(*hash, url.to_string()).is_none() {
                added += 1;
            }
        }
        self.persist(&table)?;
        info!(url, commits = commits.len(), added, "registered git redirects");
        Ok(added)
    }

    /// Reserve the next numbered clone slot, returning its id and directory.
    ///
    /// Slot ids grow monotonically from the highest existing slot; concurrent
    /// callers race on `create_dir`, and the loser moves on to the next id.
    pub fn allocate_slot(&self) -> StoreResult<(u64, PathBuf)> {
        let mut next = fs::read_dir(&self.git_dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1);
        loop {
            let path = self.git_dir.join(next.to_string());
            match fs::create_dir(&path) {
                Ok(()) => return Ok((next, path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => next += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn persist(&self, table: &HashMap<ContentHash, String>) -> StoreResult<()> {
        let index_path = self.git_dir.join(INDEX_FILE);
        let index_err = |reason: String| self.index_error(reason);
        let file = IndexFile {
            redirects: table.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| index_err(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.git_dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&index_path)
            .map_err(|e| index_err(e.error.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for RedirectIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectIndex")
            .field("git_dir", &self.git_dir)
            .field("entries", &self.len().ok())
            .finish()
    }
}
