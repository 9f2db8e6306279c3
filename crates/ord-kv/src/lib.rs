//! Key-value backends for the order service.
//!
//! This crate defines the capability contract the order store is written
//! against: byte values under string keys, set containers with cursor-based
//! scans, and atomic write batches that commit together or not at all.
//!
//! # Backends
//!
//! All backends implement the [`KvBackend`] trait:
//!
//! - [`InMemoryKv`] -- `HashMap`-based keyspace for tests and embedding
//! - [`LogKv`] -- durable keyspace replayed from an append-only log
//!
//! # Design Rules
//!
//! 1. One namespace: a key holds either a byte value or a set, never both.
//! 2. A batch checks every precondition before applying any write.
//! 3. A set scan returns cursor `0` only when no members remain.
//! 4. An emptied set disappears from the keyspace.
//! 5. After `close`, every operation fails with [`KvError::Closed`].

pub mod batch;
pub mod error;
pub mod keyspace;
pub mod log;
pub mod memory;
pub mod traits;

pub use batch::{WriteBatch, WriteOp};
pub use error::{KvError, KvResult};
pub use keyspace::{glob_match, DEFAULT_SCAN_COUNT};
pub use log::{LogConfig, LogKv, SyncMode};
pub use memory::InMemoryKv;
pub use traits::{KvBackend, ScanPage};
