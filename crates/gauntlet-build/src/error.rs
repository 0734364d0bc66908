use std::path::PathBuf;

use gauntlet_compose::ComposeError;
use gauntlet_protocol::ProtocolError;
use gauntlet_shard::ShardError;
use gauntlet_types::{ContentHash, GitRedirect};
use nix::errno::Errno;
use thiserror::Error;

use crate::chroot::{ExecStage, TaskStatus};
use crate::executor::BuildState;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown directive '{0}'")]
    UnknownDirective(String),

    #[error("invalid '{directive}' directive: {reason}")]
    Directive { directive: String, reason: String },

    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// Preparing or populating the build root failed at `path`.
    #[error("build setup failed at {}: {source}", path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path '{0}' escapes the build root")]
    InvalidPath(String),

    /// The forked child could not enter the root or start the task.
    #[error("task could not start: {stage} failed: {errno}")]
    Exec { stage: ExecStage, errno: Errno },

    #[error("task '{task}' failed: {status}")]
    TaskFailed { task: String, status: TaskStatus },

    #[error("shard {hash} is malformed: {source}")]
    InvalidShard {
        hash: ContentHash,
        #[source]
        source: ShardError,
    },

    #[error(transparent)]
    Shard(#[from] ShardError),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    /// A dependency or file resolved to a git commit rather than bytes.
    #[error("expected an object but {0} is a git redirect")]
    UnexpectedRedirect(GitRedirect),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("cannot {action} in state {state:?}")]
    InvalidState {
        action: &'static str,
        state: BuildState,
    },

    #[error("process control failed: {0}")]
    Process(Errno),

    #[error("background task failed: {0}")]
    Join(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub(crate) fn setup(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Setup {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn directive(directive: &str, reason: impl Into<String>) -> Self {
        Self::Directive {
            directive: directive.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<tokio::task::JoinError> for BuildError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Join(e.to_string())
    }
}

pub type BuildResult<T> = Result<T, BuildError>;
