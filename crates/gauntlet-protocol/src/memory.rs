use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use gauntlet_crypto::ContentHasher;
use gauntlet_types::{ContentHash, GitRedirect};

use crate::error::{ProtocolError, ProtocolResult};
use crate::source::{Fetched, ObjectSource};

/// In-memory object source.
///
/// Intended for tests and embedding. Objects and redirects are held behind
/// `RwLock`s; `register_git` records the URL and hands out sequential slot
/// ids without cloning anything. Every update is a single map or vector
/// operation, so a lock poisoned by a panicking holder is taken over as is.
#[derive(Default)]
pub struct MemoryObjectSource {
    objects: RwLock<HashMap<ContentHash, Bytes>>,
    redirects: RwLock<HashMap<ContentHash, String>>,
    git_urls: RwLock<Vec<String>>,
}

impl MemoryObjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` synchronously, returning its hash.
    pub fn insert(&self, data: impl Into<Bytes>) -> ContentHash {
        let data = data.into();
        let hash = ContentHasher::hash(&data);
        write(&self.objects)
            .entry(hash)
            .or_insert(data);
        hash
    }

    /// Make `hash` resolve to a commit in the repository at `url`.
    pub fn insert_redirect(&self, hash: ContentHash, url: impl Into<String>) {
        write(&self.redirects).insert(hash, url.into());
    }

    /// Raw bytes of a stored object.
    pub fn get(&self, hash: &ContentHash) -> Option<Bytes> {
        read(&self.objects).get(hash).cloned()
    }

    /// Number of raw objects held.
    pub fn len(&self) -> usize {
        read(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// URLs passed to `register_git`, in call order.
    pub fn registered_git_urls(&self) -> Vec<String> {
        read(&self.git_urls).clone()
    }

    fn redirect(&self, hash: &ContentHash) -> Option<GitRedirect> {
        read(&self.redirects)
            .get(hash)
            .map(|url| GitRedirect {
                hash: *hash,
                url: url.clone(),
            })
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ObjectSource for MemoryObjectSource {
    async fn fetch(&self, hash: &ContentHash) -> ProtocolResult<Fetched> {
        if let Some(redirect) = self.redirect(hash) {
            return Ok(Fetched::Redirect(redirect));
        }
        let data = self.get(hash).ok_or(ProtocolError::NotFound(*hash))?;
        Ok(Fetched::Object {
            size: Some(data.len() as u64),
            body: futures::stream::once(async move { Ok(data) }).boxed(),
        })
    }

    async fn fetch_size(&self, hash: &ContentHash) -> ProtocolResult<u64> {
        if let Some(redirect) = self.redirect(hash) {
            return Err(ProtocolError::Redirected(redirect));
        }
        self.get(hash)
            .map(|data| data.len() as u64)
            .ok_or(ProtocolError::NotFound(*hash))
    }

    async fn publish_bytes(&self, data: Bytes) -> ProtocolResult<ContentHash> {
        Ok(self.insert(data))
    }

    async fn publish_file(&self, path: &Path) -> ProtocolResult<ContentHash> {
        let data = tokio::fs::read(path).await?;
        Ok(self.insert(data))
    }

    async fn register_git(&self, url: &str) -> ProtocolResult<u64> {
        let mut urls = write(&self.git_urls);
        urls.push(url.to_string());
        Ok(urls.len() as u64 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FetchOutcome;

    #[tokio::test]
    async fn publish_is_idempotent() {
        let source = MemoryObjectSource::new();
        let a = source.publish_bytes(Bytes::from_static(b"abc")).await.unwrap();
        let b = source.publish_bytes(Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(source.len(), 1);
        assert_eq!(source.fetch_size(&a).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn fetch_to_writes_object() {
        let source = MemoryObjectSource::new();
        let hash = source.insert(&b"payload"[..]);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("obj");

        let outcome = source.fetch_to(&hash, &dest).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Stored { size: 7 });
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn redirect_is_a_result() {
        let source = MemoryObjectSource::new();
        let hash = ContentHash::from_digest([3; 20]);
        source.insert_redirect(hash, "https://example.com/r.git");

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("obj");
        match source.fetch_to(&hash, &dest).await.unwrap() {
            FetchOutcome::Redirect(r) => assert_eq!(r.url, "https://example.com/r.git"),
            other => panic!("expected redirect, got {other:?}"),
        }
        assert!(!dest.exists());
        assert!(matches!(
            source.fetch_size(&hash).await,
            Err(ProtocolError::Redirected(_))
        ));
    }

    #[tokio::test]
    async fn missing_hash_is_not_found() {
        let source = MemoryObjectSource::new();
        let hash = ContentHash::from_digest([4; 20]);
        assert!(matches!(source.fetch(&hash).await, Err(ProtocolError::NotFound(h)) if h == hash));
    }

    #[tokio::test]
    async fn git_slots_are_sequential() {
        let source = MemoryObjectSource::new();
        assert_eq!(source.register_git("a").await.unwrap(), 0);
        assert_eq!(source.register_git("b").await.unwrap(), 1);
        assert_eq!(source.registered_git_urls(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn poisoned_locks_keep_serving() {
        let source = std::sync::Arc::new(MemoryObjectSource::new());
        let hash = source.insert(&b"kept"[..]);

        let holder = std::sync::Arc::clone(&source);
        let joined = std::thread::spawn(move || {
            let _objects = holder.objects.write().unwrap();
            panic!("writer died holding the objects");
        })
        .join();
        assert!(joined.is_err());
        assert!(source.objects.is_poisoned());

        assert_eq!(source.fetch_size(&hash).await.unwrap(), 4);
        let other = source.publish_bytes(Bytes::from_static(b"added")).await.unwrap();
        assert_eq!(source.get(&other).unwrap(), "added");
        assert_eq!(source.len(), 2);
    }
}
