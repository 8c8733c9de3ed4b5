//! pe_core — Core types for the proposal ranking engine.
//!
//! This crate is **I/O-free**. It defines the stable types shared across the
//! workspace (`pe_algo`, `pe_io`, `pe_session`, `pe_export`, `pe_cli`):
//!
//! - `Config` and its validated sub-records (rating, source columns,
//!   comparison mode, convergence)
//! - `Proposal` and conflict-tag normalization
//! - Comparison model: `ComparisonMethod`, `ComparisonState`, `Comparison`,
//!   `EloUpdate`, `SessionStatus`
//! - Session-name rules (forbidden characters, reserved device names,
//!   filesystem sanitization)
//! - Injected `Clock` (UTC, RFC3339) and seeded `OrderRng` for presentation
//!   order only

#![forbid(unsafe_code)]

use core::fmt;

pub mod clock;
pub mod comparison;
pub mod config;
pub mod names;
pub mod proposal;
pub mod rng;

pub use clock::{Clock, FixedClock, SystemClock};
pub use comparison::{Comparison, ComparisonMethod, ComparisonState, EloUpdate, SessionStatus};
pub use config::{Config, ConfigError, ConvergenceConfig, Delimiter, RatingConfig, SourceColumns};
pub use proposal::Proposal;
pub use rng::{order_rng_from_seed, OrderRng};

/// Minimal error set for core-domain validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CoreError {
    EmptySessionName,
    ForbiddenNameChar(char),
    ReservedDeviceName(String),
    EmptyProposalId,
    EmptyProposalTitle,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::EmptySessionName => write!(f, "session name must not be empty"),
            CoreError::ForbiddenNameChar(c) => {
                write!(f, "session name contains forbidden character {c:?}")
            }
            CoreError::ReservedDeviceName(n) => {
                write!(f, "session name {n:?} is a reserved device name")
            }
            CoreError::EmptyProposalId => write!(f, "proposal id must not be empty"),
            CoreError::EmptyProposalTitle => write!(f, "proposal title must not be empty"),
        }
    }
}

impl std::error::Error for CoreError {}
