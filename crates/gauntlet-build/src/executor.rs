//! The build state machine.
//!
//! One [`Builder`] drives one build through
//! `Fresh -> RootPrepared -> Populated -> Executing -> Succeeded | Failed`.
//! Each step checks the state it starts from and any error moves the build
//! to `Failed`; a failed build cannot be resumed.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use gauntlet_compose::{resolve, DependencySet};
use gauntlet_protocol::ObjectSource;
use gauntlet_shard::ShardReader;
use gauntlet_types::ContentHash;
use tracing::{info, warn};

use crate::chroot::{TaskRunner, TaskStatus};
use crate::config::BuildConfig;
use crate::deps::{download, fetch_closure};
use crate::error::{BuildError, BuildResult};
use crate::package::{output_header, package_output};
use crate::root::BuildRoot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Fresh,
    RootPrepared,
    Populated,
    Executing,
    Succeeded,
    Failed,
}

/// What a completed build produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOutcome {
    pub status: TaskStatus,
    /// Hash of the published output shard, when an output path is configured.
    pub output: Option<ContentHash>,
}

pub struct Builder {
    config: BuildConfig,
    root: BuildRoot,
    source: Arc<dyn ObjectSource>,
    state: BuildState,
    deps: DependencySet,
}

impl Builder {
    /// A fresh build that will assemble its root at `root`.
    ///
    /// Whatever already exists at `root` is deleted by [`prepare`](Self::prepare).
    pub fn new(config: BuildConfig, root: impl Into<PathBuf>, source: Arc<dyn ObjectSource>) -> Self {
        Self {
            config,
            root: BuildRoot::new(root),
            source,
            state: BuildState::Fresh,
            deps: DependencySet::default(),
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn root(&self) -> &BuildRoot {
        &self.root
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run every step in order.
    pub async fn run(&mut self) -> BuildResult<BuildOutcome> {
        self.prepare().await?;
        self.populate().await?;
        let status = self.execute().await?;
        let output = self.package().await?;
        Ok(BuildOutcome { status, output })
    }

    /// Recreate the root empty and copy the build-init tree into it.
    pub async fn prepare(&mut self) -> BuildResult<()> {
        self.require(BuildState::Fresh, "prepare")?;
        let root = self.root.clone();
        let init = self.config.build_init.clone();
        let build_path = self.config.build_path.clone();
        let result = tokio::task::spawn_blocking(move || -> BuildResult<u64> {
            root.reset()?;
            match init {
                Some(init) => root.copy_tree(&init, &build_path),
                None => Ok(0),
            }
        })
        .await
        .map_err(BuildError::from)
        .and_then(|r| r);
        let files = self.track(result)?;

        self.state = BuildState::RootPrepared;
        info!(root = %self.root.path().display(), files, "build root prepared");
        Ok(())
    }

    /// Fetch and install every dependency shard, then place explicit files.
    pub async fn populate(&mut self) -> BuildResult<()> {
        self.require(BuildState::RootPrepared, "populate")?;
        let result = self.populate_root().await;
        self.track(result)?;
        self.state = BuildState::Populated;
        info!(
            root = %self.root.path().display(),
            deps = self.deps.len(),
            files = self.config.files.len(),
            "build root populated"
        );
        Ok(())
    }

    async fn populate_root(&mut self) -> BuildResult<()> {
        self.deps = resolve(&self.config.compose, &self.config.compose_buildonly)?;

        for url in &self.config.git_hint {
            match self.source.register_git(url).await {
                Ok(slot) => info!(%url, slot, "registered git hint"),
                Err(e) => warn!(%url, error = %e, "git hint registration failed"),
            }
        }

        let scratch = tempfile::tempdir()?;
        let closure = fetch_closure(
            Arc::clone(&self.source),
            &self.deps.linked_hashes(),
            &self.deps.build_only_hashes(),
            scratch.path(),
            self.config.fetch_concurrency,
        )
        .await?;

        for hash in closure.install_order() {
            let hash = *hash;
            let path = closure.shard_path(&hash);
            let root = self.root.clone();
            tokio::task::spawn_blocking(move || -> BuildResult<()> {
                let file = File::open(&path).map_err(|e| BuildError::setup(&path, e))?;
                let reader = ShardReader::decode(BufReader::new(file))
                    .map_err(|source| BuildError::InvalidShard { hash, source })?;
                root.install_shard(&hash, reader)
            })
            .await??;
        }

        for (path, hash) in &self.config.files {
            let target = self.root.file_target(path, &self.config.build_path)?;
            let object = scratch.path().join(format!("file-{}", hash.to_hex()));
            if !object.exists() {
                download(self.source.as_ref(), hash, &object).await?;
            }
            let root = self.root.clone();
            tokio::task::spawn_blocking(move || root.place_file(&object, &target)).await??;
            info!(%path, %hash, "placed file");
        }
        Ok(())
    }

    /// Run the task inside the root and wait for it.
    ///
    /// A task that exits non-zero, is killed or times out fails the build
    /// with [`BuildError::TaskFailed`] carrying its status.
    pub async fn execute(&mut self) -> BuildResult<TaskStatus> {
        self.require(BuildState::Populated, "execute")?;
        self.state = BuildState::Executing;
        info!(task = %self.config.task, "executing task");

        let runner = TaskRunner::chrooted(self.root.path(), self.config.task.clone())
            .with_timeout(self.config.timeout());
        let result = tokio::task::spawn_blocking(move || runner.run())
            .await
            .map_err(BuildError::from)
            .and_then(|r| r);
        let status = self.track(result)?;
        self.conclude(status)
    }

    /// Settle an executing build from the task's status.
    fn conclude(&mut self, status: TaskStatus) -> BuildResult<TaskStatus> {
        if !status.success() {
            self.state = BuildState::Failed;
            return Err(BuildError::TaskFailed {
                task: self.config.task.clone(),
                status,
            });
        }
        self.state = BuildState::Succeeded;
        Ok(status)
    }

    /// Publish the output directory as a shard. Returns `None` when no output
    /// path is configured.
    pub async fn package(&mut self) -> BuildResult<Option<ContentHash>> {
        self.require(BuildState::Succeeded, "package")?;
        let Some(output_path) = self.config.output_path.clone() else {
            return Ok(None);
        };
        let header = output_header(&self.config, &self.deps);
        let result = package_output(self.source.as_ref(), &self.root, &output_path, header).await;
        self.track(result).map(Some)
    }

    fn require(&self, expected: BuildState, action: &'static str) -> BuildResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BuildError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    fn track<T>(&mut self, result: BuildResult<T>) -> BuildResult<T> {
        if let Err(e) = &result {
            warn!(state = ?self.state, error = %e, "build failed");
            self.state = BuildState::Failed;
        }
        result
    }
}
