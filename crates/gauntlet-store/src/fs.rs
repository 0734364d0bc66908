use std::path::{Path, PathBuf};
use std::sync::Arc;

use gauntlet_crypto::ContentHasher;
use gauntlet_types::ContentHash;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::{GitRedirect, StoredObject};
use crate::redirect::RedirectIndex;

/// Prefix of in-flight upload files in the object directory root.
const INCOMING_PREFIX: &str = ".incoming-";

/// Content-addressed object directory.
///
/// Objects live at `<objects_dir>/<hash[0:2]>/<hash[2:]>`. Uploads are
/// spooled to a private temporary file in `objects_dir` and renamed into
/// place once their hash is known, so a reader sees either no object or a
/// complete one. Two uploads of the same content rename onto the same path
/// with identical bytes, so no cross-request lock is needed.
///
/// A hash may instead be registered in the [`RedirectIndex`] as a git
/// redirect; such hashes never occupy the object directory, and an upload
/// whose hash is already redirected is not renamed into place.
pub struct FsObjectStore {
    objects_dir: PathBuf,
    redirects: Arc<RedirectIndex>,
    max_object_size: Option<u64>,
}

impl FsObjectStore {
    /// Open a store rooted at `objects_dir`, with its git index in `git_dir`.
    pub fn open(objects_dir: impl Into<PathBuf>, git_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let objects_dir = objects_dir.into();
        std::fs::create_dir_all(&objects_dir)?;
        let redirects = Arc::new(RedirectIndex::open(git_dir)?);
        info!(objects_dir = %objects_dir.display(), "opened object store");
        Ok(Self {
            objects_dir,
            redirects,
            max_object_size: None,
        })
    }

    /// Reject uploads larger than `max` bytes.
    pub fn with_max_object_size(mut self, max: u64) -> Self {
        self.max_object_size = Some(max);
        self
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn redirects(&self) -> &RedirectIndex {
        &self.redirects
    }

    /// Location an object with `hash` occupies, whether or not it exists.
    pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
        self.objects_dir
            .join(hash.shard_prefix())
            .join(hash.shard_suffix())
    }

    /// Resolve a hash: git redirects take precedence, then the object
    /// directory.
    pub async fn lookup(&self, hash: &ContentHash) -> StoreResult<StoredObject> {
        if let Some(redirect) = self.redirects.get(hash)? {
            return Ok(StoredObject::Git(redirect));
        }
        let path = self.object_path(hash);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(StoredObject::Raw {
                path,
                size: meta.len(),
            }),
            Ok(_) => Err(StoreError::NotFound(*hash)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(*hash)),
            Err(e) => Err(e.into()),
        }
    }

    /// Open a raw object for streaming, returning the file and its length.
    pub async fn open_object(&self, hash: &ContentHash) -> StoreResult<(fs::File, u64)> {
        let path = self.object_path(hash);
        let file = fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(*hash),
            _ => StoreError::Io(e),
        })?;
        let size = file.metadata().await?.len();
        Ok((file, size))
    }

    /// Start a new upload.
    pub fn stage(&self) -> StoreResult<StagedObject> {
        let temp = tempfile::Builder::new()
            .prefix(INCOMING_PREFIX)
            .tempfile_in(&self.objects_dir)?;
        let (file, temp_path) = temp.into_parts();
        Ok(StagedObject {
            file: fs::File::from_std(file),
            temp_path,
            hasher: ContentHasher::new(),
            size: 0,
            max_size: self.max_object_size,
            objects_dir: self.objects_dir.clone(),
            redirects: Arc::clone(&self.redirects),
        })
    }

    /// Store a complete in-memory object.
    pub async fn put_bytes(&self, data: &[u8]) -> StoreResult<ContentHash> {
        let mut staged = self.stage()?;
        staged.write(data).await?;
        staged.commit().await
    }

    /// Register `commits` as redirects into the repository at `url`.
    ///
    /// Hashes already present as raw objects keep their raw resolution.
    pub async fn register_git(&self, url: &str, commits: &[ContentHash]) -> StoreResult<usize> {
        let mut accepted = Vec::with_capacity(commits.len());
        for hash in commits {
            if fs::try_exists(self.object_path(hash)).await? {
                warn!(%hash, url, "hash already stored as a raw object, not redirecting");
                continue;
            }
            accepted.push(*hash);
        }
        let redirects = Arc::clone(&self.redirects);
        let url = url.to_string();
        blocking(move || redirects.register(&url, &accepted)).await
    }

    /// Reserve a numbered clone directory for a new git repository.
    pub async fn allocate_git_slot(&self) -> StoreResult<(u64, PathBuf)> {
        let redirects = Arc::clone(&self.redirects);
        blocking(move || redirects.allocate_slot()).await
    }

    /// Look up only the redirect table.
    pub fn git_redirect(&self, hash: &ContentHash) -> StoreResult<Option<GitRedirect>> {
        self.redirects.get(hash)
    }
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))?
}

impl std::fmt::Debug for FsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsObjectStore")
            .field("objects_dir", &self.objects_dir)
            .field("redirects", &self.redirects)
            .finish()
    }
}

/// An upload in progress. Bytes are hashed as they are spooled; dropping
/// without [`commit`](Self::commit) removes the temporary file.
pub struct StagedObject {
    file: fs::File,
    temp_path: TempPath,
    hasher: ContentHasher,
    size: u64,
    max_size: Option<u64>,
    objects_dir: PathBuf,
    redirects: Arc<RedirectIndex>,
}

impl StagedObject {
    /// Append a chunk.
    pub async fn write(&mut self, chunk: &[u8]) -> StoreResult<()> {
        let size = self.size + chunk.len() as u64;
        if let Some(max) = self.max_size {
            if size > max {
                return Err(StoreError::TooLarge { max });
            }
        }
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.size = size;
        Ok(())
    }

    /// Bytes spooled so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flush the upload and rename it into its content-addressed path.
    ///
    /// A hash already registered as a git redirect keeps resolving to the
    /// redirect; the upload is discarded and its hash still returned.
    pub async fn commit(mut self) -> StoreResult<ContentHash> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        let hash = self.hasher.finalize();
        if let Some(redirect) = self.redirects.get(&hash)? {
            warn!(%hash, url = %redirect.url, "upload matches a git redirect, not storing raw copy");
            return Ok(hash);
        }
        let dir = self.objects_dir.join(hash.shard_prefix());
        fs::create_dir_all(&dir).await?;
        let path = dir.join(hash.shard_suffix());

        let temp_path = self.temp_path;
        let target = path.clone();
        blocking(move || temp_path.persist(&target).map_err(|e| StoreError::Io(e.error))).await?;

        debug!(%hash, size = self.size, path = %path.display(), "object stored");
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &Path) -> FsObjectStore {
        FsObjectStore::open(dir.join("objects"), dir.join("objects/git")).unwrap()
    }

    #[tokio::test]
    async fn put_places_object_in_sharded_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let hash = store.put_bytes(b"hello world").await.unwrap();
        assert_eq!(hash.to_hex(), "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");

        let path = dir.path().join("objects/2a/ae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        match store.lookup(&hash).await.unwrap() {
            StoredObject::Raw { path: found, size } => {
                assert_eq!(found, path);
                assert_eq!(size, 11);
            }
            other => panic!("expected raw object, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identical_content_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let h1 = store.put_bytes(b"same").await.unwrap();
        let h2 = store.put_bytes(b"same").await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(std::fs::read(store.object_path(&h1)).unwrap(), b"same");
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.put_bytes(b"one").await.unwrap();
        {
            let mut abandoned = store.stage().unwrap();
            abandoned.write(b"partial").await.unwrap();
        }
        let leftovers: Vec<_> = std::fs::read_dir(store.objects_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(INCOMING_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let hash = ContentHash::from_digest([5; 20]);
        assert!(matches!(store.lookup(&hash).await, Err(StoreError::NotFound(h)) if h == hash));
        assert!(matches!(store.open_object(&hash).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn size_limit_is_enforced_while_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).with_max_object_size(4);
        let mut staged = store.stage().unwrap();
        staged.write(b"abc").await.unwrap();
        let err = staged.write(b"de").await.unwrap_err();
        assert!(matches!(err, StoreError::TooLarge { max: 4 }));
    }

    #[tokio::test]
    async fn git_redirect_shadows_nothing_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let commit = ContentHash::from_digest([0xC0; 20]);

        store
            .register_git("https://example.com/repo.git", &[commit])
            .await
            .unwrap();

        match store.lookup(&commit).await.unwrap() {
            StoredObject::Git(redirect) => {
                assert_eq!(redirect.hash, commit);
                assert_eq!(redirect.url, "https://example.com/repo.git");
            }
            other => panic!("expected git redirect, got {other:?}"),
        }
        assert!(!store.object_path(&commit).exists());
    }

    #[tokio::test]
    async fn raw_objects_are_not_redirected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let hash = store.put_bytes(b"raw").await.unwrap();
        let added = store.register_git("https://example.com/r.git", &[hash]).await.unwrap();
        assert_eq!(added, 0);
        assert!(matches!(store.lookup(&hash).await.unwrap(), StoredObject::Raw { .. }));
    }

    #[tokio::test]
    async fn upload_of_redirected_hash_stays_a_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let hash = ContentHasher::hash(b"commit bytes");
        store
            .register_git("https://example.com/repo.git", &[hash])
            .await
            .unwrap();

        assert_eq!(store.put_bytes(b"commit bytes").await.unwrap(), hash);
        assert!(!store.object_path(&hash).exists());
        assert!(matches!(store.lookup(&hash).await.unwrap(), StoredObject::Git(_)));

        let leftovers = std::fs::read_dir(store.objects_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(INCOMING_PREFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn git_slots_are_allocated_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(dir.path()));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.spawn(async move { store.allocate_git_slot().await.unwrap() });
        }
        let mut slots = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (slot, path) = joined.unwrap();
            assert!(path.is_dir());
            slots.push(slot);
        }
        slots.sort_unstable();
        assert_eq!(slots, (0..8).collect::<Vec<u64>>());
    }
}
