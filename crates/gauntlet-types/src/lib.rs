//! Foundation types for Gauntlet.
//!
//! Every other Gauntlet crate depends on `gauntlet-types`.
//!
//! # Key Types
//!
//! - [`ContentHash`]: 160-bit content digest, the key of every stored object
//! - [`ComposeEntry`]: a `(package, hash)` dependency declaration
//! - [`GitRedirect`]: a hash that resolves to a commit in an external repository

pub mod compose;
pub mod error;
pub mod hash;
pub mod object;

pub use compose::{validate_package_name, ComposeEntry};
pub use error::TypeError;
pub use hash::{ContentHash, HASH_HEX_LEN, HASH_LEN};
pub use object::{GitRedirect, ObjectKind};
