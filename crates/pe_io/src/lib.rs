//! pe_io — Filesystem layer for the proposal ranking engine.
//!
//! - `canonical_json`: canonical compact bytes (sorted keys) for hashing, a
//!   deterministic pretty printer for checkpoints, and the atomic
//!   write-tmp-fsync-rename primitive
//! - `hasher`: SHA-256 helpers over raw and canonical bytes
//! - `source_table`: CSV loader for the proposal source table, collecting
//!   per-row errors without aborting the load
//! - `checkpoint`: the session checkpoint document and its on-disk store
//!   (atomic replace, optional bounded backups)
//! - `audit`: the append-only, hash-chained audit journal with offline
//!   integrity verification and filtered queries
//!
//! Shared error type (`IoError`) with `From` conversions used across modules;
//! the source table and the audit journal carry their own error enums because
//! their failure kinds map to distinct CLI exit codes.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

pub mod audit;
pub mod canonical_json;
pub mod checkpoint;
pub mod hasher;
pub mod source_table;

pub use audit::{AuditEntry, AuditError, AuditEventType, AuditJournal, AuditQuery};
pub use checkpoint::{CheckpointDoc, CheckpointStore, CHECKPOINT_SCHEMA_VERSION};
pub use source_table::{load_source_table, RowError, TableError, TableLoad};

/// Unified error for canonical_json/checkpoint plumbing.
#[derive(Debug, Error)]
pub enum IoError {
    /// Filesystem / path errors (open, create_dir_all, read).
    #[error("file error at {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The write-tmp-fsync-rename sequence failed; the prior file is intact.
    #[error("atomic write failed for {path}: {reason}")]
    AtomicWrite { path: PathBuf, reason: String },

    /// JSON serialization/deserialization errors.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Checkpoint present but missing required fields.
    #[error("checkpoint corrupted: {0}")]
    CorruptCheckpoint(String),

    /// Referenced session has no checkpoint on disk.
    #[error("session {0:?} not found")]
    SessionNotFound(String),
}

pub type IoResult<T> = Result<T, IoError>;
