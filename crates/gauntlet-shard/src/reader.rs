use std::io::{self, Read};
use std::path::Path;

use gauntlet_crypto::HashingReader;
use gauntlet_types::ContentHash;

use crate::error::ShardResult;
use crate::header::ShardHeader;
use crate::payload;

/// A decoded shard: the parsed header, with the payload left in the
/// underlying stream to be read on demand.
///
/// Every byte pulled through the reader, header included, feeds the content
/// hash returned by [`finish`](Self::finish).
pub struct ShardReader<R> {
    header: ShardHeader,
    stream: HashingReader<R>,
}

impl<R: Read> ShardReader<R> {
    /// Parse the header from `source`.
    pub fn decode(source: R) -> ShardResult<Self> {
        let mut stream = HashingReader::new(source);
        let header = ShardHeader::read_from(&mut stream)?;
        Ok(Self { header, stream })
    }

    pub fn header(&self) -> &ShardHeader {
        &self.header
    }

    /// Extract the payload archive beneath `root`.
    pub fn unpack_payload(&mut self, root: &Path) -> ShardResult<()> {
        payload::unpack(&mut self.stream, root)?;
        Ok(())
    }

    /// Drain whatever payload remains and return the header together with
    /// the hash of the complete shard.
    pub fn finish(self) -> ShardResult<(ShardHeader, ContentHash)> {
        let hash = self.stream.finish()?;
        Ok((self.header, hash))
    }
}

impl<R: Read> Read for ShardReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
