//! HTTP object store server for Gauntlet.
//!
//! Serves raw objects out of a two-level content-addressed directory and
//! answers for hashes registered as git redirects. All state lives in an
//! explicit [`AppState`] handed to each handler; there are no process-wide
//! globals.

pub mod config;
pub mod error;
pub mod git;
pub mod handler;
pub mod router;
pub mod server;

pub use config::{ServerConfig, CONFIG_ENV};
pub use error::{ErrorResponse, ServerError, ServerResult};
pub use git::{GitCli, GitIndexer};
pub use router::{build_router, AppState};
pub use server::GauntletServer;
