use std::io::{BufReader, BufWriter, Seek};

use gauntlet_compose::DependencySet;
use gauntlet_protocol::ObjectSource;
use gauntlet_shard::{payload, Shard, ShardHeader};
use gauntlet_types::ContentHash;
use tracing::info;

use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};
use crate::root::BuildRoot;

/// Header of the shard a finished build publishes.
pub fn output_header(config: &BuildConfig, deps: &DependencySet) -> ShardHeader {
    let mut header =
        ShardHeader::from_dependencies(&config.name, deps.linked_hashes(), deps.build_only_hashes());
    header.drop_list = config.drop.clone();
    header.chmod_list = config.chmod.clone();
    header
}

/// Pack `output_path` from the root into a shard, publish it and return the
/// hash the store agreed on.
pub async fn package_output(
    source: &dyn ObjectSource,
    root: &BuildRoot,
    output_path: &str,
    header: ShardHeader,
) -> BuildResult<ContentHash> {
    let dir = root.resolve(output_path)?;
    let scratch = tempfile::tempdir()?;
    let shard_path = scratch.path().join("output.shard");

    let local = {
        let shard_path = shard_path.clone();
        tokio::task::spawn_blocking(move || -> BuildResult<ContentHash> {
            let archive = tempfile::tempfile()?;
            let mut archive = payload::pack_dir(&dir, BufWriter::new(archive))
                .and_then(|w| w.into_inner().map_err(|e| e.into_error()))
                .map_err(|e| BuildError::setup(&dir, e))?;
            archive.rewind()?;
            Ok(Shard::new(header, BufReader::new(archive)).write_out(&shard_path)?)
        })
        .await??
    };

    let published = source.publish_file(&shard_path).await?;
    if published != local {
        return Err(BuildError::HashMismatch {
            expected: local,
            actual: published,
        });
    }
    info!(hash = %published, path = output_path, "published output shard");
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gauntlet_protocol::MemoryObjectSource;
    use gauntlet_shard::ShardReader;
    use gauntlet_types::ComposeEntry;

    #[test]
    fn header_carries_dependencies_and_lists() {
        let lib = ContentHash::from_digest([1; 20]);
        let cc = ContentHash::from_digest([2; 20]);
        let deps = DependencySet {
            linked: vec![ComposeEntry::new("lib", lib).unwrap()],
            build_only: vec![ComposeEntry::new("cc", cc).unwrap()],
        };
        let mut config = BuildConfig {
            name: "app".into(),
            drop: vec!["/usr/share/doc".into()],
            ..BuildConfig::default()
        };
        config.chmod.insert("/bin/app".into(), 0o755);

        let header = output_header(&config, &deps);
        assert_eq!(header.name, "app");
        assert_eq!(header.linked, vec![lib]);
        assert_eq!(header.build_only, vec![cc]);
        assert_eq!(header.drop_list, config.drop);
        assert_eq!(header.chmod_list, config.chmod);
    }

    #[tokio::test]
    async fn output_is_published_as_a_shard() {
        let dir = tempfile::tempdir().unwrap();
        let root = BuildRoot::new(dir.path());
        std::fs::create_dir_all(dir.path().join("out/bin")).unwrap();
        std::fs::write(dir.path().join("out/bin/app"), b"binary").unwrap();

        let source = MemoryObjectSource::new();
        let hash = package_output(&source, &root, "/out", ShardHeader::new("app"))
            .await
            .unwrap();

        let bytes = source.get(&hash).unwrap();
        let mut reader = ShardReader::decode(&bytes[..]).unwrap();
        assert_eq!(reader.header().name, "app");
        let unpacked = tempfile::tempdir().unwrap();
        reader.unpack_payload(unpacked.path()).unwrap();
        assert_eq!(reader.finish().unwrap().1, hash);
        assert_eq!(std::fs::read(unpacked.path().join("bin/app")).unwrap(), b"binary");
    }

    #[tokio::test]
    async fn missing_output_directory_is_a_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = BuildRoot::new(dir.path());
        let source = MemoryObjectSource::new();
        let err = package_output(&source, &root, "absent", ShardHeader::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Setup { .. }));
        assert!(source.is_empty());
    }
}
