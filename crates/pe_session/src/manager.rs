//! Session manager: create/resume/list over one sessions directory.
//!
//! Resume reloads the source table through the saved column mapping — the
//! table is the sole ground truth for proposal identity and metadata — and
//! applies the checkpointed scores onto matching ids. An audit journal ahead
//! of the checkpoint (crash between audit append and checkpoint rename) is
//! reported as a reconciliation note and never replayed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pe_algo::{ConvergenceTracker, MatchupTracker, RatingEngine};
use pe_core::{names, Clock, Config, OrderRng, Proposal, SessionStatus};
use pe_io::{
    load_source_table, AuditEventType, AuditJournal, AuditQuery, CheckpointDoc, CheckpointStore,
    RowError,
};

use crate::{Session, SessionError};

pub struct SessionManager {
    store: CheckpointStore,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(sessions_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: CheckpointStore::new(sessions_dir),
            clock,
        }
    }

    /// Keep timestamped checkpoint backups (bounded per session).
    pub fn with_backups(mut self, retain: usize) -> Self {
        self.store = self.store.clone().with_backups(retain);
        self
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Create a fresh session from a source table. Returns the session plus
    /// any per-row load errors (the caller decides whether to proceed on
    /// partial data).
    pub fn create(
        &self,
        name: &str,
        input: &Path,
        config: Config,
        rng: OrderRng,
    ) -> Result<(Session, Vec<RowError>), SessionError> {
        names::validate_session_name(name)?;
        config.validate()?;
        if self.store.exists(name) {
            return Err(SessionError::AlreadyExists(name.to_string()));
        }

        let engine = RatingEngine::new(config.rating.clone())?;
        let now = self.clock.now();
        let table = load_source_table(input, &config.source, &engine, now)?;
        if !table.row_errors.is_empty() {
            log::warn!(
                "source table {} loaded with {} row error(s)",
                input.display(),
                table.row_errors.len()
            );
        }

        // The journal starts empty: sequence 0 belongs to the first finished
        // comparison.
        let journal = AuditJournal::create(&self.store.audit_path(name))?;

        let convergence = ConvergenceTracker::new(&config.convergence);
        let session = Session::from_parts(
            name.to_string(),
            SessionStatus::Created,
            input.to_path_buf(),
            config,
            table.proposals,
            BTreeMap::new(),
            0,
            engine,
            MatchupTracker::new(),
            convergence,
            now,
            self.store.clone(),
            journal,
            self.clock.clone(),
            rng,
        );
        session.save_checkpoint()?;
        Ok((session, table.row_errors))
    }

    /// Load a checkpoint, rebuild proposals from the source table, and apply
    /// the saved scores. A paused session comes back active (and that
    /// transition is checkpointed).
    pub fn resume(&self, name: &str, rng: OrderRng) -> Result<Session, SessionError> {
        let mut session = self.open(name, rng)?;
        if session.status() == SessionStatus::Paused {
            session.resume()?;
            session.save_checkpoint()?;
        }
        Ok(session)
    }

    /// Load a session exactly as checkpointed, without writing anything.
    /// Read-side verbs (export) use this so they cannot change state.
    pub fn open(&self, name: &str, rng: OrderRng) -> Result<Session, SessionError> {
        let doc = self.store.load(name)?;
        doc.config.validate()?;
        let engine = RatingEngine::new(doc.config.rating.clone())?;
        let input = doc.input_source_path.clone().ok_or_else(|| {
            pe_io::IoError::CorruptCheckpoint("missing input_source_path".into())
        })?;

        let now = self.clock.now();
        let table = load_source_table(&input, &doc.config.source, &engine, now)?;
        if !table.row_errors.is_empty() {
            log::warn!(
                "source table {} reloaded with {} row error(s)",
                input.display(),
                table.row_errors.len()
            );
        }
        let mut proposals: Vec<Proposal> = table.proposals;
        for p in &mut proposals {
            if let Some(&score) = doc.proposal_scores.get(&p.id) {
                p.score = score;
            }
        }

        let audit_path = self.store.audit_path(name);
        let journal = AuditJournal::open(&audit_path)?;
        self.reconcile(&audit_path, &doc)?;

        let convergence =
            ConvergenceTracker::with_metrics(&doc.config.convergence, doc.convergence_metrics.clone());

        Ok(Session::from_parts(
            name.to_string(),
            doc.status,
            input,
            doc.config.clone(),
            proposals,
            doc.comparison_counts.clone(),
            doc.total_comparisons,
            engine,
            MatchupTracker::from_history(doc.matchup_history.clone()),
            convergence,
            doc.created_at,
            self.store.clone(),
            journal,
            self.clock.clone(),
            rng,
        ))
    }

    /// All checkpoints in the sessions directory, optionally filtered by
    /// status.
    pub fn list(&self, status: Option<SessionStatus>) -> Result<Vec<CheckpointDoc>, SessionError> {
        let mut docs = self.store.list()?;
        if let Some(wanted) = status {
            docs.retain(|d| d.status == wanted);
        }
        Ok(docs)
    }

    /// Compare the journal's completed+skipped count against the checkpoint
    /// counter. The journal being ahead is expected after a crash between
    /// audit append and checkpoint rename; the checkpoint stays authoritative
    /// for scores, so this only logs a reconciliation note.
    fn reconcile(&self, audit_path: &Path, doc: &CheckpointDoc) -> Result<(), SessionError> {
        let finished = AuditJournal::query(
            audit_path,
            &AuditQuery {
                event_types: Some(vec![
                    AuditEventType::ComparisonCompleted,
                    AuditEventType::ComparisonSkipped,
                ]),
                ..AuditQuery::default()
            },
        )?;
        let audited = finished.len() as u64;
        if audited > doc.total_comparisons {
            log::warn!(
                "session {:?}: audit journal records {} finished comparison(s) but the checkpoint \
                 counts {}; keeping checkpoint scores (audit entries past the checkpoint are \
                 informational)",
                doc.session_name,
                audited,
                doc.total_comparisons
            );
        } else if audited < doc.total_comparisons {
            log::warn!(
                "session {:?}: checkpoint counts {} comparison(s) but the audit journal records \
                 only {}",
                doc.session_name,
                doc.total_comparisons,
                audited
            );
        }
        Ok(())
    }
}
