use tokio::net::TcpListener;
use tracing::info;

use gauntlet_store::FsObjectStore;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::git::{GitCli, GitIndexer};
use crate::router::{build_router, AppState};

/// Gauntlet object store server.
pub struct GauntletServer {
    config: ServerConfig,
    state: AppState,
}

impl GauntletServer {
    /// Open the object directory named by `config`, indexing git
    /// repositories with the system `git`.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        Self::with_git_indexer(config, GitCli::new())
    }

    pub fn with_git_indexer(
        config: ServerConfig,
        git: impl GitIndexer + 'static,
    ) -> ServerResult<Self> {
        let store = FsObjectStore::open(&config.objects_dir, config.git_dir())?
            .with_max_object_size(config.max_object_size);
        Ok(Self {
            state: AppState::new(store, git),
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        info!(%addr, objects_dir = %self.config.objects_dir.display(), "gauntlet server listening");
        axum::serve(listener, self.router())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_construction_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            objects_dir: dir.path().join("objects"),
            ..ServerConfig::default()
        };
        let server = GauntletServer::new(config).unwrap();
        assert!(dir.path().join("objects").is_dir());
        assert!(dir.path().join("objects/git").is_dir());
        assert_eq!(server.config().bind_addr.port(), 8000);
        let _router = server.router();
    }
}
