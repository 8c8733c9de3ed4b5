//! pe_algo — Pure algorithm layer over `pe_core`.
//!
//! - `rating`: Elo pairwise/multiway updates, clamping, bidirectional scale
//!   conversion between ratings and the user-facing output scale
//! - `matchup`: priority-scored pair selection and canonical pair history
//! - `convergence`: rating-change window statistics, pair coverage, top-T
//!   stability, and the stop recommendation
//!
//! No I/O, no RNG, no wall clock: callers pass `DateTime<Utc>` in where time
//! matters, so results are a function of their arguments.

#![forbid(unsafe_code)]

pub mod convergence;
pub mod matchup;
pub mod rating;

pub use convergence::{ConvergenceMetrics, ConvergenceTracker, StopRecommendation};
pub use matchup::{
    canonical_pair, MatchupEntry, MatchupSelector, MatchupTracker, MatchupWeights,
};
pub use rating::RatingEngine;
