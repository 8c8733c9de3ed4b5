//! Session checkpoint: document shape and on-disk store.
//!
//! One file per session at `<sessions_dir>/<stem>.json` where `stem` is the
//! sanitized session name. The document carries scores and counters only —
//! never proposals (source table is ground truth) and never completed
//! comparisons (the audit journal is).
//!
//! Writes are atomic (sibling tmp + fsync + rename). Backups are optional:
//! timestamped copies in a separate `backups/` directory with a bounded
//! retention count; a backup failure is logged and never blocks the save.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pe_algo::{ConvergenceMetrics, MatchupEntry};
use pe_core::{names, Config, SessionStatus};

use crate::canonical_json::{atomic_write, to_pretty_bytes};
use crate::IoError;

pub const CHECKPOINT_SCHEMA_VERSION: u32 = 2;

/// The persisted session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDoc {
    pub schema_version: u32,
    pub session_name: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: Config,
    /// Required; a checkpoint without it cannot rebuild its proposals.
    #[serde(default)]
    pub input_source_path: Option<PathBuf>,
    pub proposal_scores: BTreeMap<String, f64>,
    pub comparison_counts: BTreeMap<String, u64>,
    pub total_comparisons: u64,
    pub convergence_metrics: ConvergenceMetrics,
    pub matchup_history: Vec<MatchupEntry>,
}

impl CheckpointDoc {
    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<(), IoError> {
        match &self.input_source_path {
            None => Err(IoError::CorruptCheckpoint(
                "missing input_source_path".into(),
            )),
            Some(p) if p.as_os_str().is_empty() => Err(IoError::CorruptCheckpoint(
                "empty input_source_path".into(),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// Backup retention for checkpoint overwrites.
#[derive(Debug, Clone)]
pub struct BackupPolicy {
    pub dir: PathBuf,
    pub retain: usize,
}

/// Store over one sessions directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    sessions_dir: PathBuf,
    backups: Option<BackupPolicy>,
}

impl CheckpointStore {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            backups: None,
        }
    }

    /// Enable timestamped backups under `<sessions_dir>/backups`, keeping at
    /// most `retain` per session.
    pub fn with_backups(mut self, retain: usize) -> Self {
        self.backups = Some(BackupPolicy {
            dir: self.sessions_dir.join("backups"),
            retain,
        });
        self
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn file_stem(name: &str) -> String {
        names::sanitize_file_stem(name)
    }

    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.json", Self::file_stem(name)))
    }

    pub fn audit_path(&self, name: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("audit_{}.jsonl", Self::file_stem(name)))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.checkpoint_path(name).is_file()
    }

    /// Save atomically; backup the previous file first when configured.
    pub fn save(&self, doc: &CheckpointDoc, now: DateTime<Utc>) -> Result<(), IoError> {
        doc.validate()?;
        let path = self.checkpoint_path(&doc.session_name);
        if let Some(policy) = &self.backups {
            if path.is_file() {
                if let Err(e) = self.back_up(&path, &doc.session_name, policy, now) {
                    log::warn!("checkpoint backup failed (save continues): {e}");
                }
            }
        }
        let bytes = to_pretty_bytes(doc)?;
        atomic_write(&path, &bytes)?;
        log::debug!(
            "checkpoint saved: {} ({} scored proposals)",
            path.display(),
            doc.proposal_scores.len()
        );
        Ok(())
    }

    /// Load and structurally validate one checkpoint.
    pub fn load(&self, name: &str) -> Result<CheckpointDoc, IoError> {
        let path = self.checkpoint_path(name);
        if !path.is_file() {
            return Err(IoError::SessionNotFound(name.to_string()));
        }
        let bytes = fs::read(&path).map_err(|e| IoError::File {
            path: path.clone(),
            source: e,
        })?;
        let doc: CheckpointDoc = serde_json::from_slice(&bytes)
            .map_err(|e| IoError::CorruptCheckpoint(format!("{}: {e}", path.display())))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Scan the sessions directory. Unreadable or corrupt entries are logged
    /// and skipped so one bad file cannot hide the rest.
    pub fn list(&self) -> Result<Vec<CheckpointDoc>, IoError> {
        let mut out = Vec::new();
        if !self.sessions_dir.is_dir() {
            return Ok(out);
        }
        let entries = fs::read_dir(&self.sessions_dir).map_err(|e| IoError::File {
            path: self.sessions_dir.clone(),
            source: e,
        })?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_checkpoint = path.extension().is_some_and(|x| x == "json")
                && !path
                    .file_name()
                    .is_some_and(|f| f.to_string_lossy().starts_with("audit_"));
            if !is_checkpoint {
                continue;
            }
            match fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|b| serde_json::from_slice::<CheckpointDoc>(&b).map_err(|e| e.to_string()))
            {
                Ok(doc) if doc.validate().is_ok() => out.push(doc),
                Ok(_) | Err(_) => {
                    log::warn!("skipping unreadable checkpoint {}", path.display());
                }
            }
        }
        out.sort_by(|a, b| a.session_name.cmp(&b.session_name));
        Ok(out)
    }

    fn back_up(
        &self,
        current: &Path,
        name: &str,
        policy: &BackupPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), IoError> {
        fs::create_dir_all(&policy.dir).map_err(|e| IoError::File {
            path: policy.dir.clone(),
            source: e,
        })?;
        let stem = Self::file_stem(name);
        let stamp = now.format("%Y%m%dT%H%M%S%3fZ");
        let backup = policy.dir.join(format!("{stem}.{stamp}.json"));
        fs::copy(current, &backup).map_err(|e| IoError::File {
            path: backup.clone(),
            source: e,
        })?;
        self.prune_backups(&stem, policy);
        Ok(())
    }

    /// Keep the newest `retain` backups for `stem` (names sort by timestamp).
    fn prune_backups(&self, stem: &str, policy: &BackupPolicy) {
        let Ok(entries) = fs::read_dir(&policy.dir) else {
            return;
        };
        let prefix = format!("{stem}.");
        let mut backups: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|f| f.to_string_lossy())
                    .is_some_and(|f| f.starts_with(&prefix) && f.ends_with(".json"))
            })
            .collect();
        backups.sort();
        while backups.len() > policy.retain {
            let victim = backups.remove(0);
            if let Err(e) = fs::remove_file(&victim) {
                log::warn!("could not prune backup {}: {e}", victim.display());
            }
        }
    }
}
