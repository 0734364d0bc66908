use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Environment variable naming the server's TOML configuration file.
pub const CONFIG_ENV: &str = "GAUNTLET_SERVER_CONFIG";

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MAX_OBJECT_SIZE: u64 = 1024 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Root of the two-level object directory.
    pub objects_dir: PathBuf,
    /// Where git clones and the redirect index live. Defaults to
    /// `<objects_dir>/git`.
    pub git_dir: Option<PathBuf>,
    /// Largest accepted upload, in bytes.
    pub max_object_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            objects_dir: PathBuf::from("objects"),
            git_dir: None,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn git_dir(&self) -> PathBuf {
        self.git_dir
            .clone()
            .unwrap_or_else(|| self.objects_dir.join("git"))
    }

    pub fn from_toml(text: &str) -> ServerResult<Self> {
        toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Load from the file named by [`CONFIG_ENV`], or fall back to defaults.
    pub fn from_env() -> ServerResult<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }
}
