use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use gauntlet_crypto::HashingWriter;
use gauntlet_types::ContentHash;
use tracing::debug;

use crate::error::ShardResult;
use crate::header::ShardHeader;

/// A shard ready to be serialized: its header plus a payload stream that is
/// consumed exactly once while encoding.
pub struct Shard<P> {
    pub header: ShardHeader,
    pub payload: P,
}

impl<P: Read> Shard<P> {
    pub fn new(header: ShardHeader, payload: P) -> Self {
        Self { header, payload }
    }

    /// Encode the shard into `sink`, returning the sink together with the
    /// hash of every byte written (header and payload).
    ///
    /// The payload is copied through in fixed-size chunks; it is never held
    /// in memory as a whole.
    pub fn encode<W: Write>(mut self, sink: W) -> ShardResult<(W, ContentHash)> {
        let mut out = HashingWriter::new(sink);
        self.header.write_to(&mut out)?;
        let payload_len = io::copy(&mut self.payload, &mut out)?;
        let total = out.bytes_written();
        let (sink, hash) = out.finish()?;
        debug!(
            name = %self.header.name,
            %hash,
            payload_len,
            total,
            "encoded shard"
        );
        Ok((sink, hash))
    }

    /// Encode the shard to a file at `path`.
    pub fn write_out(self, path: &Path) -> ShardResult<ContentHash> {
        let file = BufWriter::new(File::create(path)?);
        let (file, hash) = self.encode(file)?;
        file.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_crypto::ContentHasher;

    #[test]
    fn hash_covers_header_and_payload() {
        let shard = Shard::new(ShardHeader::new("hello"), &b"payload bytes"[..]);
        let (bytes, hash) = shard.encode(Vec::new()).unwrap();
        assert!(bytes.starts_with(b"gauntsh\x01\x05hello"));
        assert!(bytes.ends_with(b"payload bytes"));
        assert_eq!(hash, ContentHasher::hash(&bytes));
    }

    #[test]
    fn identical_shards_hash_identically() {
        let mut header = ShardHeader::new("same");
        header.chmod_list.insert("b".into(), 0o600);
        header.chmod_list.insert("a".into(), 0o644);
        let (_, h1) = Shard::new(header.clone(), &b"x"[..]).encode(Vec::new()).unwrap();
        let (_, h2) = Shard::new(header, &b"x"[..]).encode(Vec::new()).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn write_out_matches_in_memory_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.shard");
        let hash = Shard::new(ShardHeader::new("disk"), &b"abc"[..])
            .write_out(&path)
            .unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(hash, ContentHasher::hash(&on_disk));
    }
}
