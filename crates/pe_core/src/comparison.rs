//! Comparison model and session status.
//!
//! `ComparisonState` is transient (never persisted). A finished `Comparison`
//! is recorded only in the audit journal, never in the checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many proposals a comparison round shows at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMethod {
    Pairwise,
    Trio,
    Quartet,
}

impl ComparisonMethod {
    pub fn group_size(self) -> usize {
        match self {
            ComparisonMethod::Pairwise => 2,
            ComparisonMethod::Trio => 3,
            ComparisonMethod::Quartet => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonMethod::Pairwise => "pairwise",
            ComparisonMethod::Trio => "trio",
            ComparisonMethod::Quartet => "quartet",
        }
    }
}

impl Default for ComparisonMethod {
    fn default() -> Self {
        ComparisonMethod::Pairwise
    }
}

/// Session lifecycle states. `Complete` rejects every mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Paused,
    Complete,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Complete => "complete",
        }
    }
}

/// The in-flight comparison. At most one exists per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonState {
    pub id: String,
    /// Internal order: the order the caller supplied at start.
    pub proposal_ids: Vec<String>,
    pub method: ComparisonMethod,
    pub started_at: DateTime<Utc>,
    /// The order shown to the reviewer; a seeded permutation of
    /// `proposal_ids` to reduce position bias.
    pub presented_order: Vec<String>,
}

/// One proposal's rating movement within a completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EloUpdate {
    pub proposal_id: String,
    pub old_rating: f64,
    pub new_rating: f64,
    pub k_factor: f64,
    pub delta: f64,
}

/// A completed (or skipped) comparison as written to the audit journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub id: String,
    pub proposal_ids: Vec<String>,
    pub method: ComparisonMethod,
    pub started_at: DateTime<Utc>,
    pub presented_order: Vec<String>,
    /// Empty iff the round was skipped.
    pub winner_id: String,
    /// Multi-way rounds carry the full permutation, best first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rankings: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub updates: Vec<EloUpdate>,
}
