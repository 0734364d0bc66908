//! Compose resolver for Gauntlet.
//!
//! A shard declares two independent lists of `(package, hash)` entries:
//! `linked` dependencies that become part of the resulting image, and
//! `build_only` dependencies present only while the build task runs. Each
//! list is deduplicated and checked for collisions on its own.
//!
//! Transitive resolution is not done here; the build executor walks
//! fetched shards and calls back into this crate one level at a time.

pub mod error;
pub mod resolver;

pub use error::{ComposeError, ComposeResult, Namespace};
pub use resolver::{resolve, resolve_namespace, DependencySet};
