use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use gauntlet_types::{ContentHash, GitRedirect};
use tokio::io::AsyncWriteExt;

use crate::error::ProtocolResult;

/// Object bytes as they arrive from a source.
pub type ByteStream = BoxStream<'static, ProtocolResult<Bytes>>;

/// Result of asking a source for a hash.
pub enum Fetched {
    /// The object's bytes, with their length when the source knows it.
    Object { size: Option<u64>, body: ByteStream },
    /// The hash names a commit in an external repository.
    Redirect(GitRedirect),
}

impl std::fmt::Debug for Fetched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Object { size, .. } => f.debug_struct("Object").field("size", size).finish(),
            Self::Redirect(r) => f.debug_tuple("Redirect").field(r).finish(),
        }
    }
}

/// Result of [`ObjectSource::fetch_to`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The object was written to the destination file.
    Stored { size: u64 },
    /// Nothing was written; the hash is a git redirect.
    Redirect(GitRedirect),
}

/// Anything that hands out objects by hash and accepts new ones.
///
/// Implementations never retry; a transient failure is returned as-is so
/// the caller can choose its own policy.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Fetch an object as a byte stream, or its git redirect.
    async fn fetch(&self, hash: &ContentHash) -> ProtocolResult<Fetched>;

    /// Size of an object in bytes.
    async fn fetch_size(&self, hash: &ContentHash) -> ProtocolResult<u64>;

    /// Store `data` and return its hash.
    async fn publish_bytes(&self, data: Bytes) -> ProtocolResult<ContentHash>;

    /// Store the contents of the file at `path` and return its hash.
    async fn publish_file(&self, path: &Path) -> ProtocolResult<ContentHash>;

    /// Ask the store to index the git repository at `url`; returns the slot id.
    async fn register_git(&self, url: &str) -> ProtocolResult<u64>;

    /// Fetch an object straight into a file at `dest`.
    async fn fetch_to(&self, hash: &ContentHash, dest: &Path) -> ProtocolResult<FetchOutcome> {
        match self.fetch(hash).await? {
            Fetched::Redirect(redirect) => Ok(FetchOutcome::Redirect(redirect)),
            Fetched::Object { mut body, .. } => {
                let mut file = tokio::fs::File::create(dest).await?;
                let mut size = 0u64;
                while let Some(chunk) = body.next().await {
                    let chunk = chunk?;
                    file.write_all(&chunk).await?;
                    size += chunk.len() as u64;
                }
                file.flush().await?;
                Ok(FetchOutcome::Stored { size })
            }
        }
    }
}
