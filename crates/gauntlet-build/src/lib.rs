//! Build executor for Gauntlet.
//!
//! A build starts from a [`BuildConfig`], assembles a fresh directory tree
//! out of a build-init tree, dependency shards and individual objects, runs
//! one task inside that tree as its root, and optionally publishes a
//! directory of the result as a new shard.
//!
//! ```text
//! Fresh -> RootPrepared -> Populated -> Executing -> Succeeded | Failed
//! ```
//!
//! Dependency shards are fetched concurrently but installed strictly in
//! order, because a later shard's drop list may remove what an earlier one
//! provided.

pub mod chroot;
pub mod config;
pub mod deps;
pub mod error;
pub mod executor;
pub mod package;
pub mod root;

pub use chroot::{ExecStage, TaskRunner, TaskStatus};
pub use config::{BuildConfig, DirectiveParser, DIRECTIVES};
pub use deps::{download, fetch_closure, ShardClosure};
pub use error::{BuildError, BuildResult};
pub use executor::{BuildOutcome, BuildState, Builder};
pub use package::{output_header, package_output};
pub use root::BuildRoot;
