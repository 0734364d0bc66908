//! Object storage for the Gauntlet store server.
//!
//! Objects are opaque byte strings named by the SHA-1 of their contents and
//! kept in a two-level directory tree, `<objects>/<hash[0:2]>/<hash[2:]>`.
//! A hash may alternatively resolve to a commit inside an external git
//! repository; those redirects are tracked by a persistent [`RedirectIndex`].
//!
//! # Rules
//!
//! 1. An object path only ever holds the complete bytes for its hash.
//! 2. Uploads are hashed while spooling and renamed into place afterwards.
//! 3. The store never interprets object contents.
//! 4. A hash is either raw or a redirect, never both.

pub mod error;
pub mod fs;
pub mod object;
pub mod redirect;

pub use error::{StoreError, StoreResult};
pub use fs::{FsObjectStore, StagedObject};
pub use object::{GitRedirect, ObjectKind, StoredObject};
pub use redirect::RedirectIndex;
