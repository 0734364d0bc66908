//! Content hashing for Gauntlet.
//!
//! Every object key is the SHA-1 of the object's bytes. Hashing is always
//! incremental: the adapters here fold bytes into the digest as they pass
//! through a reader or writer, so no caller ever needs a second pass.

pub mod hasher;

pub use hasher::{ContentHasher, HashingReader, HashingWriter};
