//! Matchup selection and canonical pair history.
//!
//! A matchup is an unordered pair of proposal ids, canonicalized as
//! `(min_id, max_id)`. The selector scores every candidate pair with three
//! weighted components and returns the best:
//!
//! 1. proximity bonus `100 / (1 + |R_a − R_b| / 100)` — close ratings are
//!    more informative
//! 2. novelty bonus `50 / (1 + prior_count)` — rarely-compared pairs first
//! 3. recency bonus — `25` if never compared, else
//!    `min(hours_since_last / 24 · 10, 25)`
//!
//! Ties break by canonical pair order, so selection is deterministic for a
//! given state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pe_core::ComparisonMethod;

/// Canonicalize an unordered pair by id order.
pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Per-pair history, persisted in the checkpoint. Created lazily on first
/// appearance of the pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchupEntry {
    /// Canonical `(min_id, max_id)`.
    pub pair: (String, String),
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_compared: Option<DateTime<Utc>>,
    /// Rating gap at each time the pair was compared.
    pub rating_difference_history: Vec<f64>,
    /// Running Σ|Δ| across this pair's updates; feeds `information_gain`.
    pub abs_delta_sum: f64,
    /// `min(Σ|Δ| / 64, 1)`.
    pub information_gain: f64,
}

impl MatchupEntry {
    fn new(pair: (String, String)) -> Self {
        Self {
            pair,
            count: 0,
            last_compared: None,
            rating_difference_history: Vec::new(),
            abs_delta_sum: 0.0,
            information_gain: 0.0,
        }
    }
}

/// All pair history for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchupTracker {
    entries: BTreeMap<(String, String), MatchupEntry>,
}

impl MatchupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one compared pair: bump the count, stamp the time, append the
    /// current rating gap, and fold the round's |Δ| into the gain.
    pub fn record(
        &mut self,
        a: &str,
        b: &str,
        rating_gap: f64,
        abs_delta: f64,
        now: DateTime<Utc>,
    ) {
        let key = canonical_pair(a, b);
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| MatchupEntry::new(key));
        entry.count += 1;
        entry.last_compared = Some(now);
        entry.rating_difference_history.push(rating_gap.abs());
        entry.abs_delta_sum += abs_delta;
        entry.information_gain = (entry.abs_delta_sum / 64.0).min(1.0);
    }

    pub fn get(&self, a: &str, b: &str) -> Option<&MatchupEntry> {
        self.entries.get(&canonical_pair(a, b))
    }

    pub fn pair_count(&self, a: &str, b: &str) -> u64 {
        self.get(a, b).map_or(0, |e| e.count)
    }

    /// Number of distinct pairs ever compared.
    pub fn unique_pairs(&self) -> usize {
        self.entries.len()
    }

    /// Checkpoint representation: entries in canonical pair order.
    pub fn to_history(&self) -> Vec<MatchupEntry> {
        self.entries.values().cloned().collect()
    }

    /// Rebuild from a checkpoint. Later duplicates overwrite earlier ones.
    pub fn from_history(history: Vec<MatchupEntry>) -> Self {
        let mut entries = BTreeMap::new();
        for e in history {
            entries.insert(e.pair.clone(), e);
        }
        Self { entries }
    }
}

/// Component weights, each defaulting to 1.0 (the documented bonuses).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchupWeights {
    pub proximity: f64,
    pub novelty: f64,
    pub recency: f64,
}

impl Default for MatchupWeights {
    fn default() -> Self {
        Self {
            proximity: 1.0,
            novelty: 1.0,
            recency: 1.0,
        }
    }
}

/// Scores candidate pairs over a rating snapshot.
#[derive(Debug, Clone)]
pub struct MatchupSelector {
    weights: MatchupWeights,
}

impl Default for MatchupSelector {
    fn default() -> Self {
        Self::new(MatchupWeights::default())
    }
}

impl MatchupSelector {
    pub fn new(weights: MatchupWeights) -> Self {
        Self { weights }
    }

    /// Priority score for one candidate pair (higher = better next pick).
    pub fn priority(
        &self,
        rating_a: f64,
        rating_b: f64,
        entry: Option<&MatchupEntry>,
        now: DateTime<Utc>,
    ) -> f64 {
        let proximity = 100.0 / (1.0 + (rating_a - rating_b).abs() / 100.0);
        let prior = entry.map_or(0, |e| e.count);
        let novelty = 50.0 / (1.0 + prior as f64);
        let recency = match entry.and_then(|e| e.last_compared) {
            None => 25.0,
            Some(last) => {
                let hours = (now - last).num_seconds().max(0) as f64 / 3600.0;
                (hours / 24.0 * 10.0).min(25.0)
            }
        };
        self.weights.proximity * proximity
            + self.weights.novelty * novelty
            + self.weights.recency * recency
    }

    /// Enumerate all `C(n, 2)` pairs over `ratings` (id → rating), rank by
    /// priority with canonical-pair tie-breaks, and return the top `n`.
    /// Never returns a pair whose elements are equal.
    pub fn optimal_matchups(
        &self,
        ratings: &BTreeMap<String, f64>,
        tracker: &MatchupTracker,
        now: DateTime<Utc>,
        n: usize,
    ) -> Vec<(String, String)> {
        let ids: Vec<&String> = ratings.keys().collect();
        let mut scored: Vec<(f64, (String, String))> = Vec::new();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a, b) = (ids[i], ids[j]);
                let pair = canonical_pair(a, b);
                let score = self.priority(
                    ratings[a.as_str()],
                    ratings[b.as_str()],
                    tracker.get(a, b),
                    now,
                );
                scored.push((score, pair));
            }
        }
        scored.sort_by(|(sa, pa), (sb, pb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pa.cmp(pb))
        });
        scored.into_iter().take(n).map(|(_, p)| p).collect()
    }

    /// Pick the next group to present: the best pair, plus (for trio/quartet)
    /// the `group_size − 2` next-best candidates not already in the group,
    /// drawn from subsequent ranked pairs.
    pub fn suggest_group(
        &self,
        ratings: &BTreeMap<String, f64>,
        tracker: &MatchupTracker,
        now: DateTime<Utc>,
        method: ComparisonMethod,
    ) -> Option<Vec<String>> {
        let want = method.group_size();
        if ratings.len() < want {
            return None;
        }
        let ranked = self.optimal_matchups(ratings, tracker, now, usize::MAX);
        let (first_a, first_b) = ranked.first()?.clone();
        let mut group = vec![first_a, first_b];
        for (a, b) in ranked.iter().skip(1) {
            if group.len() == want {
                break;
            }
            for candidate in [a, b] {
                if group.len() < want && !group.contains(candidate) {
                    group.push(candidate.clone());
                }
            }
        }
        (group.len() == want).then_some(group)
    }
}
