//! quipsync - mirror a local markdown tree into Quip
//!
//! Walks a directory of markdown files and keeps a Quip folder tree in
//! step with it: one remote folder per directory, one document per file,
//! with inline images uploaded as document blobs. A content fingerprint
//! cache next to the files keeps repeat runs free of remote writes.

pub mod cache;
pub mod config;
pub mod destination;
pub mod error;
pub mod remote;
pub mod sync;
pub mod types;

pub use config::SyncConfig;
pub use destination::Destination;
pub use error::{Result, SyncError};
pub use remote::{MemoryStore, QuipClient, RemoteStore, Resilient, RetryPolicy};
pub use sync::Mirror;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
