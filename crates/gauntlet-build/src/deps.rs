//! Fetching dependency shards and explicit file objects from a store.
//!
//! Downloads run concurrently, bounded by a limit, in waves: the declared
//! roots first, then whatever their headers' `linked` lists name that has not
//! been seen yet. Install order is computed afterwards from the headers alone,
//! so it never depends on which download happened to finish first.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use gauntlet_crypto::ContentHasher;
use gauntlet_protocol::{Fetched, ObjectSource};
use gauntlet_shard::{ShardHeader, ShardReader};
use gauntlet_types::ContentHash;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{BuildError, BuildResult};

/// Fetch `hash` into a new file at `dest`, verifying the bytes against it.
///
/// Returns the object's size. A git redirect is an error here; so is any
/// content whose hash differs, in which case `dest` is removed.
pub async fn download(
    source: &dyn ObjectSource,
    hash: &ContentHash,
    dest: &Path,
) -> BuildResult<u64> {
    let mut body = match source.fetch(hash).await? {
        Fetched::Object { body, .. } => body,
        Fetched::Redirect(redirect) => return Err(BuildError::UnexpectedRedirect(redirect)),
    };

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| BuildError::setup(dest, e))?;
    let mut hasher = ContentHasher::new();
    let mut size = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| BuildError::setup(dest, e))?;
        size += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| BuildError::setup(dest, e))?;
    drop(file);

    let actual = hasher.finalize();
    if actual != *hash {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(BuildError::HashMismatch {
            expected: *hash,
            actual,
        });
    }
    debug!(%hash, size, dest = %dest.display(), "downloaded object");
    Ok(size)
}

/// Every shard reachable from a build's declared dependencies, downloaded
/// into one directory.
#[derive(Debug)]
pub struct ShardClosure {
    dir: PathBuf,
    headers: HashMap<ContentHash, ShardHeader>,
    order: Vec<ContentHash>,
}

impl ShardClosure {
    /// Hashes in the order they must be installed: each shard after its
    /// linked dependencies, linked roots before build-only roots, every hash
    /// once.
    pub fn install_order(&self) -> &[ContentHash] {
        &self.order
    }

    pub fn shard_path(&self, hash: &ContentHash) -> PathBuf {
        self.dir.join(hash.to_hex())
    }

    pub fn header(&self, hash: &ContentHash) -> Option<&ShardHeader> {
        self.headers.get(hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Download the transitive closure of `linked` and `build_only` into `dir`.
pub async fn fetch_closure(
    source: Arc<dyn ObjectSource>,
    linked: &[ContentHash],
    build_only: &[ContentHash],
    dir: &Path,
    concurrency: usize,
) -> BuildResult<ShardClosure> {
    let limit = concurrency.max(1);
    let mut seen: HashSet<ContentHash> = HashSet::new();
    let mut wave: Vec<ContentHash> = linked
        .iter()
        .chain(build_only)
        .filter(|h| seen.insert(**h))
        .copied()
        .collect();
    let mut headers = HashMap::new();
    let mut waves = 0;

    while !wave.is_empty() {
        waves += 1;
        let mut next = Vec::new();
        let mut pending = wave.into_iter();
        let mut tasks = JoinSet::new();
        loop {
            while tasks.len() < limit {
                let Some(hash) = pending.next() else { break };
                tasks.spawn(fetch_shard(Arc::clone(&source), hash, dir.to_path_buf()));
            }
            let Some(joined) = tasks.join_next().await else { break };
            let (hash, header) = joined??;
            for dep in &header.linked {
                if seen.insert(*dep) {
                    next.push(*dep);
                }
            }
            headers.insert(hash, header);
        }
        wave = next;
    }

    let order = install_order(&headers, linked, build_only);
    info!(shards = order.len(), waves, "fetched dependency closure");
    Ok(ShardClosure {
        dir: dir.to_path_buf(),
        headers,
        order,
    })
}

async fn fetch_shard(
    source: Arc<dyn ObjectSource>,
    hash: ContentHash,
    dir: PathBuf,
) -> BuildResult<(ContentHash, ShardHeader)> {
    let path = dir.join(hash.to_hex());
    download(source.as_ref(), &hash, &path).await?;
    let header = tokio::task::spawn_blocking(move || -> BuildResult<ShardHeader> {
        let file = File::open(&path).map_err(|e| BuildError::setup(&path, e))?;
        let reader = ShardReader::decode(BufReader::new(file))
            .map_err(|source| BuildError::InvalidShard { hash, source })?;
        Ok(reader.header().clone())
    })
    .await??;
    debug!(%hash, name = %header.name, deps = header.linked.len(), "fetched shard");
    Ok((hash, header))
}

/// Post-order walk over `linked` edges from each root in turn, with an
/// explicit stack so chain depth is bounded by memory, not the thread stack.
fn install_order(
    headers: &HashMap<ContentHash, ShardHeader>,
    linked: &[ContentHash],
    build_only: &[ContentHash],
) -> Vec<ContentHash> {
    let mut visited = HashSet::new();
    let mut order = Vec::with_capacity(headers.len());
    let mut stack: Vec<(ContentHash, usize)> = Vec::new();
    for root in linked.iter().chain(build_only) {
        if !visited.insert(*root) {
            continue;
        }
        stack.push((*root, 0));
        while let Some((hash, next)) = stack.last_mut() {
            let deps = headers.get(&*hash).map_or(&[][..], |h| h.linked.as_slice());
            match deps.get(*next) {
                Some(dep) => {
                    *next += 1;
                    if visited.insert(*dep) {
                        stack.push((*dep, 0));
                    }
                }
                None => {
                    order.push(*hash);
                    stack.pop();
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_protocol::{MemoryObjectSource, ProtocolError};
    use gauntlet_shard::{payload, Shard};

    fn publish(source: &MemoryObjectSource, header: ShardHeader) -> ContentHash {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join(&header.name), header.name.as_bytes()).unwrap();
        let archive = payload::pack_dir(src.path(), Vec::new()).unwrap();
        let (bytes, hash) = Shard::new(header, archive.as_slice()).encode(Vec::new()).unwrap();
        assert_eq!(source.insert(bytes), hash);
        hash
    }

    fn with_deps(name: &str, linked: &[ContentHash]) -> ShardHeader {
        ShardHeader::from_dependencies(name, linked.iter().copied(), [])
    }

    #[tokio::test]
    async fn download_verifies_content() {
        let source = MemoryObjectSource::new();
        let hash = source.insert(&b"object body"[..]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("obj");

        assert_eq!(download(&source, &hash, &dest).await.unwrap(), 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"object body");
    }

    #[tokio::test]
    async fn download_reports_missing_and_redirected() {
        let source = MemoryObjectSource::new();
        let dir = tempfile::tempdir().unwrap();
        let missing = ContentHash::from_digest([7; 20]);
        assert!(matches!(
            download(&source, &missing, &dir.path().join("a")).await,
            Err(BuildError::Protocol(ProtocolError::NotFound(h))) if h == missing
        ));

        let commit = ContentHash::from_digest([8; 20]);
        source.insert_redirect(commit, "https://example.com/r.git");
        assert!(matches!(
            download(&source, &commit, &dir.path().join("b")).await,
            Err(BuildError::UnexpectedRedirect(r)) if r.hash == commit
        ));
    }

    #[tokio::test]
    async fn closure_installs_dependencies_first() {
        let source = MemoryObjectSource::new();
        let base = publish(&source, ShardHeader::new("base"));
        let libc = publish(&source, with_deps("libc", &[base]));
        let tool = publish(&source, with_deps("tool", &[libc, base]));
        let cc = publish(&source, with_deps("cc", &[libc]));

        let dir = tempfile::tempdir().unwrap();
        let closure = fetch_closure(Arc::new(source), &[tool], &[cc], dir.path(), 2)
            .await
            .unwrap();

        assert_eq!(closure.install_order(), &[base, libc, tool, cc]);
        for hash in closure.install_order() {
            assert!(closure.shard_path(hash).is_file());
        }
        assert_eq!(closure.header(&tool).unwrap().linked, vec![libc, base]);
    }

    #[test]
    fn install_order_handles_deep_chains() {
        let depth = 200_000u32;
        let hash = |i: u32| {
            let mut digest = [0u8; 20];
            digest[..4].copy_from_slice(&i.to_be_bytes());
            ContentHash::from_digest(digest)
        };
        let headers: HashMap<_, _> = (0..depth)
            .map(|i| {
                let deps: Vec<_> = if i + 1 < depth { vec![hash(i + 1)] } else { vec![] };
                (hash(i), with_deps("link", &deps))
            })
            .collect();

        let order = install_order(&headers, &[hash(0)], &[]);
        assert_eq!(order.len(), depth as usize);
        assert_eq!(order.first(), Some(&hash(depth - 1)));
        assert_eq!(order.last(), Some(&hash(0)));
    }

    #[test]
    fn install_order_visits_shared_dependencies_once() {
        let a = ContentHash::from_digest([1; 20]);
        let b = ContentHash::from_digest([2; 20]);
        let c = ContentHash::from_digest([3; 20]);
        let headers = HashMap::from([
            (a, with_deps("a", &[b, c])),
            (b, with_deps("b", &[c])),
            (c, with_deps("c", &[])),
        ]);
        assert_eq!(install_order(&headers, &[a], &[c, b]), vec![c, b, a]);
    }

    #[tokio::test]
    async fn closure_keeps_declared_root_order() {
        let source = MemoryObjectSource::new();
        let d1 = publish(&source, ShardHeader::new("d1"));
        let d2 = publish(&source, ShardHeader::new("d2"));
        let d3 = publish(&source, ShardHeader::new("d3"));

        let dir = tempfile::tempdir().unwrap();
        let closure = fetch_closure(Arc::new(source), &[d3, d1, d2], &[], dir.path(), 1)
            .await
            .unwrap();
        assert_eq!(closure.install_order(), &[d3, d1, d2]);
    }

    #[tokio::test]
    async fn closure_fails_on_missing_dependency() {
        let source = MemoryObjectSource::new();
        let missing = ContentHash::from_digest([0xEE; 20]);
        let top = publish(&source, with_deps("top", &[missing]));

        let dir = tempfile::tempdir().unwrap();
        let err = fetch_closure(Arc::new(source), &[top], &[], dir.path(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Protocol(ProtocolError::NotFound(h)) if h == missing));
    }

    #[tokio::test]
    async fn closure_rejects_non_shard_objects() {
        let source = MemoryObjectSource::new();
        let junk = source.insert(&b"not a shard"[..]);

        let dir = tempfile::tempdir().unwrap();
        let err = fetch_closure(Arc::new(source), &[junk], &[], dir.path(), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidShard { hash, .. } if hash == junk));
    }
}
