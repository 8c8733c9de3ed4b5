//! pe_session — Session lifecycle over the rating engine, selector,
//! checkpoint store, and audit journal.
//!
//! - `session`: the state machine (created → active → paused → complete),
//!   comparison rounds, and the audit/checkpoint ordering contract
//! - `manager`: create/resume/list over a sessions directory
//!
//! Concurrency contract: a `Session` serializes its own mutations through
//! `&mut self`; embedders that share one session across threads wrap it in
//! [`SharedSession`] (read-only queries may then proceed concurrently, and
//! block against mutations). Two sessions on disjoint files are independent.

#![forbid(unsafe_code)]

use std::sync::{Arc, RwLock};

use thiserror::Error;

pub mod manager;
pub mod session;

pub use manager::SessionManager;
pub use session::{ComparisonOutcome, Session};

/// One writer, many readers.
pub type SharedSession = Arc<RwLock<Session>>;

/// Comparison-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComparisonError {
    #[error("no active comparison")]
    NoActiveComparison,

    #[error("a comparison is already in progress")]
    ComparisonInProgress,

    #[error("{method} comparison needs {expected} proposals, got {got}")]
    ParticipantCount {
        method: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("unknown proposal id {0:?}")]
    UnknownProposal(String),

    #[error("proposal {0:?} appears more than once in the comparison")]
    DuplicateParticipant(String),

    #[error("a {0} comparison must be completed with full rankings")]
    RankingsRequired(&'static str),

    #[error("winner {0:?} is not part of the active comparison")]
    WinnerNotInComparison(String),

    #[error("rankings must be a permutation of the compared proposal ids")]
    RankingsNotPermutation,
}

/// Aggregated error surface of this crate.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] pe_core::ConfigError),

    #[error(transparent)]
    Core(#[from] pe_core::CoreError),

    #[error(transparent)]
    Io(#[from] pe_io::IoError),

    #[error(transparent)]
    Audit(#[from] pe_io::AuditError),

    #[error(transparent)]
    Table(#[from] pe_io::TableError),

    #[error(transparent)]
    Comparison(#[from] ComparisonError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("session {0:?} already exists")]
    AlreadyExists(String),
}
