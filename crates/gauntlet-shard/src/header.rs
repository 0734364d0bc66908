use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use gauntlet_types::{ContentHash, HASH_LEN};

use crate::error::{ShardError, ShardResult};

/// ASCII magic at the start of every shard.
pub const SHARD_MAGIC: &[u8; 7] = b"gauntsh";

/// Current shard format version.
pub const SHARD_VERSION: u8 = 1;

/// Everything in a shard except its payload.
///
/// Compose dependencies are carried as bare hashes: the wire format stores
/// one 20-byte digest per entry, `linked` entries first. Package names live
/// in the build configuration, not in the shard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardHeader {
    /// Human-readable label.
    pub name: String,
    /// Dependencies that are part of the resulting image.
    pub linked: Vec<ContentHash>,
    /// Dependencies present only while the build task runs.
    pub build_only: Vec<ContentHash>,
    /// Paths removed from the composed root after dependencies are laid down.
    pub drop_list: Vec<String>,
    /// Mode overrides applied after extraction.
    pub chmod_list: BTreeMap<String, u16>,
}

impl ShardHeader {
    /// Create an empty header with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Header for a shard built on top of already-resolved dependencies.
    pub fn from_dependencies(
        name: impl Into<String>,
        linked: impl IntoIterator<Item = ContentHash>,
        build_only: impl IntoIterator<Item = ContentHash>,
    ) -> Self {
        Self {
            name: name.into(),
            linked: linked.into_iter().collect(),
            build_only: build_only.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Check that every field fits the fixed-width length prefixes.
    pub fn validate(&self) -> ShardResult<()> {
        check_len("name", self.name.len(), u8::MAX as usize)?;
        let max_count = u16::MAX as usize;
        check_len("linked list", self.linked.len(), max_count)?;
        check_len("build-only list", self.build_only.len(), max_count)?;
        check_len("drop list", self.drop_list.len(), max_count)?;
        check_len("chmod list", self.chmod_list.len(), max_count)?;
        for path in self.drop_list.iter().chain(self.chmod_list.keys()) {
            check_len("path", path.len(), max_count)?;
        }
        Ok(())
    }

    /// Serialize the header. Nothing is written if the header fails
    /// [`validate`](Self::validate).
    pub fn write_to<W: Write>(&self, w: &mut W) -> ShardResult<()> {
        self.validate()?;

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(SHARD_MAGIC);
        buf.push(SHARD_VERSION);
        buf.push(self.name.len() as u8);
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&(self.linked.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.build_only.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.drop_list.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.chmod_list.len() as u16).to_be_bytes());

        for hash in self.linked.iter().chain(&self.build_only) {
            buf.extend_from_slice(hash.as_bytes());
        }
        for path in &self.drop_list {
            buf.extend_from_slice(&(path.len() as u16).to_be_bytes());
            buf.extend_from_slice(path.as_bytes());
        }
        for (path, mode) in &self.chmod_list {
            buf.extend_from_slice(&(path.len() as u16).to_be_bytes());
            buf.extend_from_slice(&mode.to_be_bytes());
            buf.extend_from_slice(path.as_bytes());
        }

        w.write_all(&buf)?;
        Ok(())
    }

    /// Parse a header from the front of a stream, leaving the stream
    /// positioned at the first payload byte.
    pub fn read_from<R: Read>(r: &mut R) -> ShardResult<Self> {
        let mut magic = [0u8; 7];
        read_field(r, &mut magic, "magic")?;
        if &magic != SHARD_MAGIC {
            return Err(ShardError::InvalidMagic {
                expected: String::from_utf8_lossy(SHARD_MAGIC).into(),
                actual: String::from_utf8_lossy(&magic).into(),
            });
        }

        let version = read_u8(r, "version")?;
        if version != SHARD_VERSION {
            return Err(ShardError::UnsupportedVersion(version));
        }

        let name_len = read_u8(r, "name length")? as usize;
        let name = read_string(r, name_len, "name")?;

        let linked_count = read_u16(r, "linked count")? as usize;
        let build_only_count = read_u16(r, "build-only count")? as usize;
        let drop_count = read_u16(r, "drop count")? as usize;
        let chmod_count = read_u16(r, "chmod count")? as usize;

        let mut linked = Vec::with_capacity(linked_count);
        for _ in 0..linked_count {
            linked.push(read_hash(r)?);
        }
        let mut build_only = Vec::with_capacity(build_only_count);
        for _ in 0..build_only_count {
            build_only.push(read_hash(r)?);
        }

        let mut drop_list = Vec::with_capacity(drop_count);
        for _ in 0..drop_count {
            let len = read_u16(r, "drop path length")? as usize;
            drop_list.push(read_string(r, len, "drop path")?);
        }

        let mut chmod_list = BTreeMap::new();
        for _ in 0..chmod_count {
            let len = read_u16(r, "chmod path length")? as usize;
            let mode = read_u16(r, "chmod mode")?;
            chmod_list.insert(read_string(r, len, "chmod path")?, mode);
        }

        Ok(Self {
            name,
            linked,
            build_only,
            drop_list,
            chmod_list,
        })
    }

    /// Size of the serialized header in bytes.
    pub fn encoded_len(&self) -> usize {
        let fixed = SHARD_MAGIC.len() + 1 + 1 + self.name.len() + 4 * 2;
        let hashes = (self.linked.len() + self.build_only.len()) * HASH_LEN;
        let drops: usize = self.drop_list.iter().map(|p| 2 + p.len()).sum();
        let chmods: usize = self.chmod_list.keys().map(|p| 4 + p.len()).sum();
        fixed + hashes + drops + chmods
    }
}

fn check_len(field: &'static str, len: usize, max: usize) -> ShardResult<()> {
    if len > max {
        return Err(ShardError::FieldTooLong { field, len, max });
    }
    Ok(())
}

fn read_field<R: Read>(r: &mut R, buf: &mut [u8], field: &'static str) -> ShardResult<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => ShardError::Truncated { field },
        _ => ShardError::Io(e),
    })
}

fn read_u8<R: Read>(r: &mut R, field: &'static str) -> ShardResult<u8> {
    let mut buf = [0u8; 1];
    read_field(r, &mut buf, field)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(r: &mut R, field: &'static str) -> ShardResult<u16> {
    let mut buf = [0u8; 2];
    read_field(r, &mut buf, field)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_hash<R: Read>(r: &mut R) -> ShardResult<ContentHash> {
    let mut digest = [0u8; HASH_LEN];
    read_field(r, &mut digest, "compose hash")?;
    Ok(ContentHash::from_digest(digest))
}

fn read_string<R: Read>(r: &mut R, len: usize, field: &'static str) -> ShardResult<String> {
    let mut buf = vec![0u8; len];
    read_field(r, &mut buf, field)?;
    String::from_utf8(buf).map_err(|_| ShardError::InvalidUtf8 { field })
}
