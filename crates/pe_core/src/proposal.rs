//! Proposal model.
//!
//! Proposals are owned by the session for its lifetime and are **never**
//! written to the checkpoint; the source table is the sole ground truth for
//! identity and metadata, reloaded on every resume. Only the score map
//! travels through persistence.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Current rating, kept within the configured `[min_rating, max_rating]`.
    pub score: f64,
    /// Score read from the source table on first load, on the output scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_score: Option<f64>,
    /// Ordered, dedup'd, trimmed.
    pub conflict_tags: Vec<String>,
    /// Every column read from the source table, keyed by column name.
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Construct with identity checks; everything optional starts empty.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        let id = id.into();
        let title = title.into();
        if id.trim().is_empty() {
            return Err(CoreError::EmptyProposalId);
        }
        if title.trim().is_empty() {
            return Err(CoreError::EmptyProposalTitle);
        }
        Ok(Self {
            id,
            title,
            abstract_text: None,
            speaker: None,
            score,
            original_score: None,
            conflict_tags: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the conflict tags with a normalized set (see
    /// [`normalize_conflict_tags`]).
    pub fn set_conflict_tags<'a, I: IntoIterator<Item = &'a str>>(&mut self, raw: I) {
        self.conflict_tags = normalize_conflict_tags(raw);
    }
}

/// Trim each tag, drop empties, and dedup while keeping first-seen order.
pub fn normalize_conflict_tags<'a, I: IntoIterator<Item = &'a str>>(raw: I) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in raw {
        let t = tag.trim();
        if t.is_empty() {
            continue;
        }
        if !out.iter().any(|seen| seen == t) {
            out.push(t.to_string());
        }
    }
    out
}
