use std::path::Path;

use async_trait::async_trait;
use gauntlet_types::ContentHash;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ServerError, ServerResult};

/// Clones a repository and lists the commits reachable from it.
#[async_trait]
pub trait GitIndexer: Send + Sync {
    /// Bare-clone `url` into the empty directory `dest` and return every
    /// commit hash reachable from any ref.
    async fn index(&self, url: &str, dest: &Path) -> ServerResult<Vec<ContentHash>>;
}

/// [`GitIndexer`] backed by the `git` executable.
#[derive(Clone, Debug)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific `git` binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> ServerResult<String> {
        debug!(program = %self.program, ?args, "running git");
        let output = Command::new(&self.program)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| ServerError::Git(format!("failed to run {}: {e}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServerError::Git(format!(
                "git {} exited with {}: {}",
                args.first().unwrap_or(&""),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitIndexer for GitCli {
    async fn index(&self, url: &str, dest: &Path) -> ServerResult<Vec<ContentHash>> {
        let dest_str = dest.to_string_lossy();
        self.run(&["clone", "--bare", "--quiet", "--", url, &dest_str])
            .await?;
        let listing = self
            .run(&["--git-dir", &dest_str, "rev-list", "--all"])
            .await?;
        let commits = parse_rev_list(&listing)?;
        info!(url, commits = commits.len(), "indexed git repository");
        Ok(commits)
    }
}

/// Parse `git rev-list` output, one 40-hex hash per line.
pub fn parse_rev_list(listing: &str) -> ServerResult<Vec<ContentHash>> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            ContentHash::from_hex(line)
                .map_err(|e| ServerError::Git(format!("unexpected rev-list line {line:?}: {e}")))
        })
        .collect()
}
