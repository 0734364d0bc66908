//! Shard file format for Gauntlet.
//!
//! A shard is one composable piece of a filesystem image: a fixed
//! big-endian header naming the shard and its dependencies, followed by a
//! gzip-compressed tar payload holding the shard's own files.
//!
//! # Layout
//!
//! ```text
//! magic "gauntsh" | version u8 | nameLen u8 | name
//! linkedCount u16 | buildOnlyCount u16 | dropCount u16 | chmodCount u16
//! (linked ++ buildOnly) × 20-byte digest
//! dropCount × (pathLen u16, path)
//! chmodCount × (pathLen u16, mode u16, path)
//! payload to end of stream
//! ```
//!
//! - [`Shard`]: encodes a header plus a payload stream into any `Write`
//! - [`ShardReader`]: decodes the header and exposes the payload as a `Read`
//!
//! Both directions hash the full byte stream as it passes through, so a
//! shard's [`ContentHash`](gauntlet_types::ContentHash) is known the moment
//! the last byte has been written or read.

pub mod error;
pub mod header;
pub mod payload;
pub mod reader;
pub mod writer;

pub use error::{ShardError, ShardResult};
pub use header::{ShardHeader, SHARD_MAGIC, SHARD_VERSION};
pub use reader::ShardReader;
pub use writer::Shard;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    use gauntlet_crypto::ContentHasher;
    use gauntlet_types::ContentHash;
    use proptest::prelude::*;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_digest([byte; 20])
    }

    #[test]
    fn roundtrip_with_raw_payload() {
        let mut header = ShardHeader::new("coreutils");
        header.linked = vec![hash(1), hash(2)];
        header.build_only = vec![hash(3)];
        header.drop_list = vec!["usr/share/doc".into()];
        header.chmod_list.insert("usr/bin/su".into(), 0o4755);

        let (bytes, written_hash) = Shard::new(header.clone(), &b"opaque"[..])
            .encode(Vec::new())
            .unwrap();

        let mut reader = ShardReader::decode(bytes.as_slice()).unwrap();
        assert_eq!(reader.header(), &header);
        let mut payload = Vec::new();
        reader.read_to_end(&mut payload).unwrap();
        assert_eq!(payload, b"opaque");

        let (decoded, read_hash) = reader.finish().unwrap();
        assert_eq!(decoded, header);
        assert_eq!(read_hash, written_hash);
    }

    #[test]
    fn finish_without_reading_payload_still_hashes_everything() {
        let (bytes, written_hash) = Shard::new(ShardHeader::new("lazy"), &[7u8; 10_000][..])
            .encode(Vec::new())
            .unwrap();
        let reader = ShardReader::decode(bytes.as_slice()).unwrap();
        let (_, read_hash) = reader.finish().unwrap();
        assert_eq!(read_hash, written_hash);
        assert_eq!(read_hash, ContentHasher::hash(&bytes));
    }

    #[test]
    fn roundtrip_with_directory_payload() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("payload.txt"), b"hello").unwrap();
        let archive = payload::pack_dir(src.path(), Vec::new()).unwrap();

        let (bytes, _) = Shard::new(ShardHeader::new("hello"), archive.as_slice())
            .encode(Vec::new())
            .unwrap();

        let dst = tempfile::tempdir().unwrap();
        let mut reader = ShardReader::decode(bytes.as_slice()).unwrap();
        reader.unpack_payload(dst.path()).unwrap();
        let (_, read_hash) = reader.finish().unwrap();

        assert_eq!(read_hash, ContentHasher::hash(&bytes));
        assert_eq!(std::fs::read(dst.path().join("payload.txt")).unwrap(), b"hello");
    }

    #[test]
    fn decode_empty_stream() {
        let err = ShardReader::decode(&b""[..]).err().unwrap();
        assert!(matches!(err, ShardError::Truncated { field: "magic" }));
    }

    fn arb_hash() -> impl Strategy<Value = ContentHash> {
        any::<[u8; 20]>().prop_map(ContentHash::from_digest)
    }

    fn arb_header() -> impl Strategy<Value = ShardHeader> {
        (
            "[a-z0-9_-]{0,40}",
            prop::collection::vec(arb_hash(), 0..6),
            prop::collection::vec(arb_hash(), 0..6),
            prop::collection::vec("[a-z/._]{1,30}", 0..6),
            prop::collection::btree_map("[a-z/._]{1,30}", any::<u16>(), 0..6),
        )
            .prop_map(|(name, linked, build_only, drop_list, chmod_list)| ShardHeader {
                name,
                linked,
                build_only,
                drop_list,
                chmod_list,
            })
    }

    proptest! {
        #[test]
        fn decode_reproduces_encode(
            header in arb_header(),
            payload in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let (bytes, written_hash) = Shard::new(header.clone(), payload.as_slice())
                .encode(Vec::new())
                .unwrap();
            let mut reader = ShardReader::decode(bytes.as_slice()).unwrap();
            let mut read_payload = Vec::new();
            reader.read_to_end(&mut read_payload).unwrap();
            let (decoded, read_hash) = reader.finish().unwrap();

            prop_assert_eq!(decoded, header);
            prop_assert_eq!(read_payload, payload);
            prop_assert_eq!(read_hash, written_hash);
        }
    }
}
