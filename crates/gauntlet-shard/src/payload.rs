//! The shard payload: a gzip-compressed tar stream.

use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};
use tracing::debug;

/// Archive the contents of `dir` (not the directory itself) into `sink`.
pub fn pack_dir<W: Write>(dir: &Path, sink: W) -> io::Result<W> {
    let encoder = GzEncoder::new(sink, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    let encoder = builder.into_inner()?;
    let sink = encoder.finish()?;
    debug!(dir = %dir.display(), "packed payload");
    Ok(sink)
}

/// Extract a payload stream beneath `root`, overwriting files already there.
///
/// Entries that would land outside `root` are skipped by the archive reader.
pub fn unpack<R: Read>(source: R, root: &Path) -> io::Result<()> {
    let mut archive = Archive::new(GzDecoder::new(source));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.unpack(root)?;
    debug!(root = %root.display(), "unpacked payload");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn directory_survives_pack_and_unpack() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("etc")).unwrap();
        fs::write(src.path().join("etc/hostname"), b"gauntlet\n").unwrap();
        fs::write(src.path().join("top.txt"), b"top").unwrap();

        let archive = pack_dir(src.path(), Vec::new()).unwrap();

        let dst = tempfile::tempdir().unwrap();
        unpack(archive.as_slice(), dst.path()).unwrap();
        assert_eq!(fs::read(dst.path().join("etc/hostname")).unwrap(), b"gauntlet\n");
        assert_eq!(fs::read(dst.path().join("top.txt")).unwrap(), b"top");
    }

    #[cfg(unix)]
    #[test]
    fn permissions_are_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let archive = pack_dir(src.path(), Vec::new()).unwrap();
        let dst = tempfile::tempdir().unwrap();
        unpack(archive.as_slice(), dst.path()).unwrap();

        let mode = fs::metadata(dst.path().join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn garbage_is_rejected() {
        let dst = tempfile::tempdir().unwrap();
        assert!(unpack(&b"not a gzip stream"[..], dst.path()).is_err());
    }
}
