//! The session state machine.
//!
//! | From | Event | To | Side effect |
//! |---|---|---|---|
//! | created | start_comparison | active | comparison set |
//! | active | start_comparison (none in progress) | active | comparison set |
//! | active | complete_comparison | active | audit batch, scores update, checkpoint |
//! | active | cancel_comparison | active | comparison cleared, no rating change |
//! | active | pause | paused | comparison cleared, checkpoint forced |
//! | paused | resume | active | — |
//! | created/active/paused | finish | complete | comparison cleared, checkpoint forced |
//! | complete | any mutation | — | fails |
//!
//! Ordering contract for one completed comparison: the audit events are
//! appended consecutively as `comparison_completed` (or
//! `comparison_skipped`) followed by one `rating_updated` per participant in
//! participant order; the checkpoint write follows the audit batch. A crash
//! between the two leaves the journal ahead of the checkpoint, which resume
//! detects and reports without replaying — the checkpoint is the authority
//! for scores, the journal for event history.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use pe_algo::{
    ConvergenceTracker, MatchupSelector, MatchupTracker, RatingEngine, StopRecommendation,
};
use pe_core::{
    Clock, Comparison, ComparisonMethod, ComparisonState, Config, EloUpdate, OrderRng, Proposal,
    SessionStatus,
};
use pe_io::{
    hasher, AuditEventType, AuditJournal, CheckpointDoc, CheckpointStore,
    CHECKPOINT_SCHEMA_VERSION,
};

use crate::{ComparisonError, SessionError};

/// How a comparison round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparisonOutcome {
    /// Pairwise only: the id that won.
    Winner(String),
    /// Any method: full permutation of the compared ids, best first.
    Rankings(Vec<String>),
    /// No rating change; optionally why.
    Skipped { reason: Option<String> },
}

#[derive(Debug)]
pub struct Session {
    name: String,
    status: SessionStatus,
    input_source_path: PathBuf,
    config: Config,
    proposals: Vec<Proposal>,
    /// id → index into `proposals`; rebuilt on every (re)load.
    index: BTreeMap<String, usize>,
    comparison_state: Option<ComparisonState>,
    comparison_counts: BTreeMap<String, u64>,
    total_comparisons: u64,
    engine: RatingEngine,
    selector: MatchupSelector,
    matchups: MatchupTracker,
    convergence: ConvergenceTracker,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    store: CheckpointStore,
    journal: AuditJournal,
    clock: Arc<dyn Clock>,
    rng: OrderRng,
    /// Monotonic per-process counter feeding comparison-id derivation.
    started_counter: u64,
}

#[allow(clippy::too_many_arguments)]
impl Session {
    /// Assemble a session from already-validated parts (manager only).
    pub(crate) fn from_parts(
        name: String,
        status: SessionStatus,
        input_source_path: PathBuf,
        config: Config,
        proposals: Vec<Proposal>,
        comparison_counts: BTreeMap<String, u64>,
        total_comparisons: u64,
        engine: RatingEngine,
        matchups: MatchupTracker,
        convergence: ConvergenceTracker,
        created_at: DateTime<Utc>,
        store: CheckpointStore,
        journal: AuditJournal,
        clock: Arc<dyn Clock>,
        rng: OrderRng,
    ) -> Self {
        let index = proposals
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        let updated_at = clock.now();
        Self {
            name,
            status,
            input_source_path,
            config,
            proposals,
            index,
            comparison_state: None,
            comparison_counts,
            total_comparisons,
            engine,
            selector: MatchupSelector::default(),
            matchups,
            convergence,
            created_at,
            updated_at,
            store,
            journal,
            clock,
            rng,
            started_counter: 0,
        }
    }

    // ----------------------------- Read-only queries -----------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn input_source_path(&self) -> &PathBuf {
        &self.input_source_path
    }

    pub fn total_comparisons(&self) -> u64 {
        self.total_comparisons
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn proposal(&self, id: &str) -> Option<&Proposal> {
        self.index.get(id).map(|&i| &self.proposals[i])
    }

    pub fn current_comparison(&self) -> Option<&ComparisonState> {
        self.comparison_state.as_ref()
    }

    pub fn comparison_counts(&self) -> &BTreeMap<String, u64> {
        &self.comparison_counts
    }

    pub fn engine(&self) -> &RatingEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &pe_algo::ConvergenceMetrics {
        self.convergence.metrics()
    }

    pub fn audit_path(&self) -> &std::path::Path {
        self.journal.path()
    }

    /// Current id → rating map (what the checkpoint persists).
    pub fn proposal_scores(&self) -> BTreeMap<String, f64> {
        self.proposals
            .iter()
            .map(|p| (p.id.clone(), p.score))
            .collect()
    }

    /// Proposals ranked by rating descending, ties by id ascending.
    pub fn rankings(&self) -> Vec<&Proposal> {
        let mut out: Vec<&Proposal> = self.proposals.iter().collect();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    /// Stop check against the configured convergence thresholds.
    pub fn should_stop(&self) -> StopRecommendation {
        self.convergence
            .should_stop(&self.config.convergence, self.total_comparisons)
    }

    /// Top-n candidate pairs for the next comparison.
    pub fn optimal_matchups(&self, n: usize) -> Vec<(String, String)> {
        self.selector
            .optimal_matchups(&self.proposal_scores(), &self.matchups, self.clock.now(), n)
    }

    /// Next group to present, sized by the configured comparison mode.
    pub fn suggest_next_group(&self) -> Option<Vec<String>> {
        self.selector.suggest_group(
            &self.proposal_scores(),
            &self.matchups,
            self.clock.now(),
            self.config.comparison_mode,
        )
    }

    // ----------------------------- Lifecycle -----------------------------

    fn ensure_mutable(&self) -> Result<(), SessionError> {
        if self.status == SessionStatus::Complete {
            return Err(SessionError::InvalidState(
                "session is complete; no further changes are accepted".into(),
            ));
        }
        Ok(())
    }

    /// Begin a comparison over `ids`. The presented order is a seeded
    /// permutation of `ids`.
    pub fn start_comparison(
        &mut self,
        ids: &[String],
        method: ComparisonMethod,
    ) -> Result<ComparisonState, SessionError> {
        self.ensure_mutable()?;
        if self.status == SessionStatus::Paused {
            return Err(SessionError::InvalidState(
                "paused session must be resumed before comparing".into(),
            ));
        }
        if self.comparison_state.is_some() {
            return Err(ComparisonError::ComparisonInProgress.into());
        }
        if ids.len() != method.group_size() {
            return Err(ComparisonError::ParticipantCount {
                method: method.as_str(),
                expected: method.group_size(),
                got: ids.len(),
            }
            .into());
        }
        let mut seen = BTreeSet::new();
        for id in ids {
            if !self.index.contains_key(id) {
                return Err(ComparisonError::UnknownProposal(id.clone()).into());
            }
            if !seen.insert(id) {
                return Err(ComparisonError::DuplicateParticipant(id.clone()).into());
            }
        }

        let now = self.clock.now();
        let basis = format!(
            "{}|{}|{}|{}",
            self.name,
            self.started_counter,
            now.timestamp_nanos_opt().unwrap_or_default(),
            ids.join(",")
        );
        let comparison_id = format!("cmp-{}", &hasher::sha256_hex(basis.as_bytes())[..16]);
        self.started_counter += 1;

        let mut presented_order = ids.to_vec();
        self.rng.shuffle(&mut presented_order);

        let state = ComparisonState {
            id: comparison_id,
            proposal_ids: ids.to_vec(),
            method,
            started_at: now,
            presented_order,
        };
        self.comparison_state = Some(state.clone());
        self.status = SessionStatus::Active;
        self.updated_at = now;
        Ok(state)
    }

    /// Abandon the active comparison without rating changes.
    pub fn cancel_comparison(&mut self) -> Result<(), SessionError> {
        self.ensure_mutable()?;
        if self.comparison_state.take().is_none() {
            return Err(ComparisonError::NoActiveComparison.into());
        }
        self.updated_at = self.clock.now();
        Ok(())
    }

    /// Finish the active comparison: validate the outcome, apply rating
    /// deltas, append the audit batch, then checkpoint.
    pub fn complete_comparison(
        &mut self,
        outcome: ComparisonOutcome,
    ) -> Result<Comparison, SessionError> {
        self.ensure_mutable()?;
        let state = self
            .comparison_state
            .as_ref()
            .ok_or(ComparisonError::NoActiveComparison)?
            .clone();
        let now = self.clock.now();
        let duration_secs = (now - state.started_at).num_milliseconds() as f64 / 1000.0;

        if let ComparisonOutcome::Skipped { reason } = &outcome {
            let reason = reason.clone();
            let comparison = Comparison {
                id: state.id.clone(),
                proposal_ids: state.proposal_ids.clone(),
                method: state.method,
                started_at: state.started_at,
                presented_order: state.presented_order.clone(),
                winner_id: String::new(),
                rankings: None,
                timestamp: now,
                duration_secs,
                skipped: true,
                skip_reason: reason.clone(),
                updates: Vec::new(),
            };
            self.total_comparisons += 1;
            self.comparison_state = None;
            self.emit(
                AuditEventType::ComparisonSkipped,
                json!({
                    "comparison_id": &comparison.id,
                    "proposal_ids": &comparison.proposal_ids,
                    "method": comparison.method.as_str(),
                    "duration_secs": duration_secs,
                    "skip_reason": reason,
                }),
            )?;
            self.updated_at = now;
            self.save_checkpoint()?;
            return Ok(comparison);
        }

        // Resolve the outcome into a full ranking, best first.
        let ranking: Vec<String> = match &outcome {
            ComparisonOutcome::Winner(w) => {
                if state.method != ComparisonMethod::Pairwise {
                    return Err(ComparisonError::RankingsRequired(state.method.as_str()).into());
                }
                if !state.proposal_ids.contains(w) {
                    return Err(ComparisonError::WinnerNotInComparison(w.clone()).into());
                }
                let loser = state
                    .proposal_ids
                    .iter()
                    .find(|id| *id != w)
                    .cloned()
                    .ok_or_else(|| ComparisonError::WinnerNotInComparison(w.clone()))?;
                vec![w.clone(), loser]
            }
            ComparisonOutcome::Rankings(r) => {
                let given: BTreeSet<&String> = r.iter().collect();
                let expected: BTreeSet<&String> = state.proposal_ids.iter().collect();
                if r.len() != state.proposal_ids.len() || given != expected {
                    return Err(ComparisonError::RankingsNotPermutation.into());
                }
                r.clone()
            }
            ComparisonOutcome::Skipped { .. } => unreachable!("handled above"),
        };

        let old_by_id: BTreeMap<&str, f64> = state
            .proposal_ids
            .iter()
            .map(|id| (id.as_str(), self.proposals[self.index[id]].score))
            .collect();
        let ranked_old: Vec<f64> = ranking.iter().map(|id| old_by_id[id.as_str()]).collect();
        let ranked_new = self.engine.compute_multiway(&ranked_old);
        let new_by_id: BTreeMap<&str, f64> = ranking
            .iter()
            .map(|id| id.as_str())
            .zip(ranked_new.iter().copied())
            .collect();

        // Updates in participant order, as audited.
        let k = self.engine.config().k_factor;
        let updates: Vec<EloUpdate> = state
            .proposal_ids
            .iter()
            .map(|id| {
                let old = old_by_id[id.as_str()];
                let new = new_by_id[id.as_str()];
                EloUpdate {
                    proposal_id: id.clone(),
                    old_rating: old,
                    new_rating: new,
                    k_factor: k,
                    delta: new - old,
                }
            })
            .collect();

        // Apply ratings and counters.
        for u in &updates {
            let p = &mut self.proposals[self.index[&u.proposal_id]];
            p.score = u.new_rating;
            p.updated_at = now;
            *self.comparison_counts.entry(u.proposal_id.clone()).or_insert(0) += 1;
        }
        self.total_comparisons += 1;

        // Matchup history: every decomposed pair of the round.
        for i in 0..ranking.len() {
            for j in (i + 1)..ranking.len() {
                let (a, b) = (&ranking[i], &ranking[j]);
                let (old_a, old_b) = (old_by_id[a.as_str()], old_by_id[b.as_str()]);
                let e_win = RatingEngine::expected_score(old_a, old_b);
                let e_lose = RatingEngine::expected_score(old_b, old_a);
                let pair_abs_delta = k * (1.0 - e_win) + k * e_lose;
                self.matchups
                    .record(a, b, (old_a - old_b).abs(), pair_abs_delta, now);
            }
        }

        // Convergence metrics over the applied deltas and the new top-T.
        let abs_deltas: Vec<f64> = updates.iter().map(|u| u.delta.abs()).collect();
        let top_ids: Vec<String> = self
            .rankings()
            .iter()
            .take(self.config.convergence.target_accepted)
            .map(|p| p.id.clone())
            .collect();
        let possible = Self::pairs_possible(self.proposals.len());
        self.convergence.record_comparison(
            &abs_deltas,
            self.matchups.unique_pairs(),
            possible,
            top_ids,
        );

        let winner_id = ranking[0].clone();
        let rankings_field =
            (state.method != ComparisonMethod::Pairwise).then(|| ranking.clone());
        let comparison = Comparison {
            id: state.id.clone(),
            proposal_ids: state.proposal_ids.clone(),
            method: state.method,
            started_at: state.started_at,
            presented_order: state.presented_order.clone(),
            winner_id: winner_id.clone(),
            rankings: rankings_field.clone(),
            timestamp: now,
            duration_secs,
            skipped: false,
            skip_reason: None,
            updates: updates.clone(),
        };

        self.comparison_state = None;

        // Audit batch: completed first, then one rating_updated per
        // participant, in participant order, with nothing interleaved.
        self.emit(
            AuditEventType::ComparisonCompleted,
            json!({
                "comparison_id": &comparison.id,
                "proposal_ids": &comparison.proposal_ids,
                "method": comparison.method.as_str(),
                "winner_id": winner_id,
                "rankings": rankings_field,
                "presented_order": &comparison.presented_order,
                "duration_secs": duration_secs,
            }),
        )?;
        for u in &updates {
            self.emit(
                AuditEventType::RatingUpdated,
                json!({
                    "comparison_id": &comparison.id,
                    "proposal_id": &u.proposal_id,
                    "old_rating": u.old_rating,
                    "new_rating": u.new_rating,
                    "k_factor": u.k_factor,
                    "delta": u.delta,
                }),
            )?;
        }

        self.updated_at = now;
        self.save_checkpoint()?;
        Ok(comparison)
    }

    /// Pause an active session. Clears any in-flight comparison and forces a
    /// checkpoint.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        self.ensure_mutable()?;
        if self.status != SessionStatus::Active {
            return Err(SessionError::InvalidState(format!(
                "cannot pause a {} session",
                self.status.as_str()
            )));
        }
        self.comparison_state = None;
        self.status = SessionStatus::Paused;
        self.emit(AuditEventType::SessionPaused, json!({}))?;
        self.updated_at = self.clock.now();
        self.save_checkpoint()?;
        Ok(())
    }

    /// Resume a paused session in memory.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        self.ensure_mutable()?;
        if self.status != SessionStatus::Paused {
            return Err(SessionError::InvalidState(format!(
                "cannot resume a {} session",
                self.status.as_str()
            )));
        }
        self.status = SessionStatus::Active;
        self.updated_at = self.clock.now();
        Ok(())
    }

    /// Close the session for good. A complete session rejects all further
    /// mutations.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        self.ensure_mutable()?;
        self.comparison_state = None;
        self.emit(
            AuditEventType::SessionCompleted,
            json!({ "total_comparisons": self.total_comparisons }),
        )?;
        self.status = SessionStatus::Complete;
        self.updated_at = self.clock.now();
        self.save_checkpoint()?;
        Ok(())
    }

    // ----------------------------- Persistence -----------------------------

    /// The document the checkpoint store writes. Proposals and completed
    /// comparisons are deliberately absent.
    pub fn checkpoint_doc(&self) -> CheckpointDoc {
        CheckpointDoc {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            session_name: self.name.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            config: self.config.clone(),
            input_source_path: Some(self.input_source_path.clone()),
            proposal_scores: self.proposal_scores(),
            comparison_counts: self.comparison_counts.clone(),
            total_comparisons: self.total_comparisons,
            convergence_metrics: self.convergence.metrics().clone(),
            matchup_history: self.matchups.to_history(),
        }
    }

    pub(crate) fn save_checkpoint(&self) -> Result<(), SessionError> {
        self.store.save(&self.checkpoint_doc(), self.clock.now())?;
        Ok(())
    }

    fn emit(&mut self, event: AuditEventType, data: serde_json::Value) -> Result<(), SessionError> {
        let now = self.clock.now();
        self.journal.append(now, event, &self.name, data)?;
        Ok(())
    }

    fn pairs_possible(n: usize) -> usize {
        n * n.saturating_sub(1) / 2
    }
}
