//! Object store wire protocol for Gauntlet.
//!
//! The store speaks plain HTTP:
//!
//! | request        | response                                                   |
//! |----------------|------------------------------------------------------------|
//! | `GET /<hash>`  | object bytes (`X-Gauntlet-Type: raw`) or `301` to a git URL (`X-Gauntlet-Type: git`) |
//! | `HEAD /<hash>` | `Content-Length` only, same resolution                     |
//! | `POST /`       | body is stored; response is the 40-hex SHA-1 as text       |
//! | `POST /git`    | body is a repository URL; response is the numeric slot id  |
//!
//! Consumers program against [`ObjectSource`]; [`StoreClient`] is the HTTP
//! implementation and [`MemoryObjectSource`] an in-process one.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod source;

pub use client::StoreClient;
pub use endpoint::{endpoints, object_path, TYPE_HEADER};
pub use error::{ProtocolError, ProtocolResult};
pub use memory::MemoryObjectSource;
pub use source::{ByteStream, FetchOutcome, Fetched, ObjectSource};
