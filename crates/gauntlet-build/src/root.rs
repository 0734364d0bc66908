use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::fs::OpenOptions;
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use gauntlet_shard::ShardReader;
use gauntlet_types::ContentHash;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{BuildError, BuildResult};

/// Intermediate symlinks followed while resolving one path, as in `ELOOP`.
const MAX_SYMLINKS: usize = 40;

/// The directory tree one build assembles and then uses as the task's `/`.
///
/// A `BuildRoot` owns its path: [`reset`](Self::reset) destroys whatever is
/// there. Paths handed to it are interpreted relative to the root and may not
/// climb out of it.
#[derive(Clone, Debug)]
pub struct BuildRoot {
    path: PathBuf,
}

impl BuildRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Map a root-relative path (leading `/` allowed) to a host path that
    /// stays inside the root.
    ///
    /// Symlinks met in intermediate components are followed as the task
    /// would see them after `chroot`: absolute targets restart at the root
    /// and `..` never climbs above it. The final component is never
    /// followed, so callers act on a link itself rather than its target.
    pub fn resolve(&self, rel: &str) -> BuildResult<PathBuf> {
        let mut pending = VecDeque::new();
        for component in Path::new(rel).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => pending.push_back(part.to_os_string()),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(BuildError::InvalidPath(rel.to_string()))
                }
            }
        }

        let mut inside = PathBuf::new();
        let mut links = 0;
        while let Some(part) = pending.pop_front() {
            if part == ".." {
                inside.pop();
                continue;
            }
            let candidate = inside.join(&part);
            if pending.is_empty() {
                inside = candidate;
                break;
            }
            let host = self.path.join(&candidate);
            match fs::symlink_metadata(&host) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    links += 1;
                    if links > MAX_SYMLINKS {
                        return Err(BuildError::InvalidPath(rel.to_string()));
                    }
                    let target = fs::read_link(&host).map_err(|e| BuildError::setup(&host, e))?;
                    if target.is_absolute() {
                        inside = PathBuf::new();
                    }
                    for component in target.components().rev() {
                        match component {
                            Component::Normal(p) => pending.push_front(p.to_os_string()),
                            Component::ParentDir => pending.push_front("..".into()),
                            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                        }
                    }
                }
                Ok(_) => inside = candidate,
                Err(e) if e.kind() == io::ErrorKind::NotFound => inside = candidate,
                Err(e) => return Err(BuildError::setup(host, e)),
            }
        }
        Ok(self.path.join(inside))
    }

    /// Where an explicit file entry lands: absolute paths are anchored at the
    /// root, relative ones at the build-path subdirectory.
    pub fn file_target(&self, path: &str, build_path: &str) -> BuildResult<PathBuf> {
        if path.starts_with('/') {
            self.resolve(path)
        } else {
            self.resolve(&format!("{}/{}", build_path.trim_end_matches('/'), path))
        }
    }

    /// Delete the root if present and recreate it empty.
    pub fn reset(&self) -> BuildResult<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(root = %self.path.display(), "removed previous root"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::setup(&self.path, e)),
        }
        fs::create_dir_all(&self.path).map_err(|e| BuildError::setup(&self.path, e))
    }

    /// Copy the tree at `src` into the root at `build_path`.
    pub fn copy_tree(&self, src: &Path, build_path: &str) -> BuildResult<u64> {
        let dest = self.resolve(build_path)?;
        let mut files = 0;
        for entry in WalkDir::new(src).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(src).to_path_buf();
                BuildError::setup(path, e.into())
            })?;
            let rel = entry
                .path()
                .strip_prefix(src)
                .map_err(|_| BuildError::InvalidPath(entry.path().display().to_string()))?;
            let target = dest.join(rel);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir_all(&target).map_err(|e| BuildError::setup(&target, e))?;
            } else if file_type.is_symlink() {
                let link = fs::read_link(entry.path()).map_err(|e| BuildError::setup(entry.path(), e))?;
                std::os::unix::fs::symlink(&link, &target).map_err(|e| BuildError::setup(&target, e))?;
            } else {
                fs::copy(entry.path(), &target).map_err(|e| BuildError::setup(&target, e))?;
                files += 1;
            }
        }
        info!(src = %src.display(), dest = %dest.display(), files, "copied build tree");
        Ok(files)
    }

    /// Lay one dependency shard into the root: extract its payload, apply its
    /// drop list, then its mode overrides. The shard's hash is checked once
    /// the whole stream has been consumed.
    pub fn install_shard<R: Read>(
        &self,
        expected: &ContentHash,
        mut reader: ShardReader<R>,
    ) -> BuildResult<()> {
        let invalid = |source| BuildError::InvalidShard {
            hash: *expected,
            source,
        };
        reader.unpack_payload(&self.path).map_err(invalid)?;
        let (header, actual) = reader.finish().map_err(invalid)?;
        if actual != *expected {
            return Err(BuildError::HashMismatch {
                expected: *expected,
                actual,
            });
        }

        let dropped = self.apply_drops(&header.drop_list)?;
        self.apply_chmods(&header.chmod_list)?;
        info!(
            hash = %expected,
            name = %header.name,
            dropped,
            chmods = header.chmod_list.len(),
            "installed shard"
        );
        Ok(())
    }

    /// Remove each listed path. Paths that are already gone are skipped.
    pub fn apply_drops(&self, drops: &[String]) -> BuildResult<usize> {
        let mut removed = 0;
        for rel in drops {
            let path = self.resolve(rel)?;
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %rel, "drop target does not exist");
                    continue;
                }
                Err(e) => return Err(BuildError::setup(&path, e)),
            };
            let result = if meta.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| BuildError::setup(&path, e))?;
            debug!(path = %rel, "dropped");
            removed += 1;
        }
        Ok(removed)
    }

    /// Set file modes. Symlinks are left alone; their mode is meaningless and
    /// setting it would change the target.
    pub fn apply_chmods(&self, chmods: &BTreeMap<String, u16>) -> BuildResult<()> {
        for (rel, mode) in chmods {
            let path = self.resolve(rel)?;
            let meta = fs::symlink_metadata(&path).map_err(|e| BuildError::setup(&path, e))?;
            if meta.file_type().is_symlink() {
                warn!(path = %rel, "not changing mode of a symlink");
                continue;
            }
            fs::set_permissions(&path, fs::Permissions::from_mode(u32::from(*mode)))
                .map_err(|e| BuildError::setup(&path, e))?;
            debug!(path = %rel, mode = %format!("{mode:o}"), "chmod");
        }
        Ok(())
    }

    /// Copy a fetched object to `target`, creating parent directories. A
    /// symlink already at `target` is replaced, never written through.
    pub fn place_file(&self, object: &Path, target: &Path) -> BuildResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::setup(parent, e))?;
        }
        match fs::symlink_metadata(target) {
            Ok(meta) if meta.file_type().is_symlink() => {
                fs::remove_file(target).map_err(|e| BuildError::setup(target, e))?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::setup(target, e)),
        }
        let mut src = fs::File::open(object).map_err(|e| BuildError::setup(object, e))?;
        let mut dest = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .custom_flags(nix::libc::O_NOFOLLOW)
            .open(target)
            .map_err(|e| BuildError::setup(target, e))?;
        io::copy(&mut src, &mut dest).map_err(|e| BuildError::setup(target, e))?;
        Ok(())
    }
}
