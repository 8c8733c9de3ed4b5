//! Append-only, hash-chained audit journal.
//!
//! Storage: line-delimited JSON, one entry per line, `audit_<stem>.jsonl`
//! in the sessions directory. Every entry carries:
//!
//! `entry_hash = SHA-256( id | ts | event_type | session_id | previous_hash |
//! sequence | SHA-256(canonical JSON of data) )` as lowercase hex, where `ts`
//! is the RFC3339 timestamp at nanosecond precision and `previous_hash` is
//! empty for sequence 0 and the prior `entry_hash` otherwise.
//!
//! Opening for append replays the whole file and verifies the chain; the
//! first bad sequence is named. A trailing partial line (crash mid-append) is
//! a parse error at that line. Queries parse leniently and never verify.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::hasher::{sha256_canonical, sha256_hex};
use crate::IoError;

#[derive(Debug, Error)]
pub enum AuditError {
    /// Hash-chain break, sequence gap, entry-hash mismatch, or unparseable
    /// line. `sequence` names the first bad entry position.
    #[error("audit journal corrupted at sequence {sequence}: {reason}")]
    Corrupted { sequence: u64, reason: String },

    #[error("file error at {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] IoError),
}

/// Every event kind the journal records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SessionCreated,
    SessionResumed,
    SessionPaused,
    SessionCompleted,
    ComparisonStarted,
    ComparisonCompleted,
    ComparisonSkipped,
    RatingUpdated,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::SessionCreated => "session_created",
            AuditEventType::SessionResumed => "session_resumed",
            AuditEventType::SessionPaused => "session_paused",
            AuditEventType::SessionCompleted => "session_completed",
            AuditEventType::ComparisonStarted => "comparison_started",
            AuditEventType::ComparisonCompleted => "comparison_completed",
            AuditEventType::ComparisonSkipped => "comparison_skipped",
            AuditEventType::RatingUpdated => "rating_updated",
        }
    }
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// 8-byte content-derived id, 16 lowercase hex chars.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub session_id: String,
    /// Event-specific payload (always a JSON object).
    pub data: Value,
    /// Empty for sequence 0, else the prior `entry_hash`.
    pub previous_hash: String,
    pub entry_hash: String,
    pub sequence: u64,
}

impl AuditEntry {
    fn hash_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Recompute the chain hash from this entry's own fields.
    fn compute_entry_hash(&self) -> Result<String, AuditError> {
        let data_hash = sha256_canonical(&self.data)?;
        let preimage = format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.hash_timestamp(),
            self.event_type.as_str(),
            self.session_id,
            self.previous_hash,
            self.sequence,
            data_hash
        );
        Ok(sha256_hex(preimage.as_bytes()))
    }
}

/// Filter for [`AuditJournal::query`]. All criteria AND together; paging is
/// applied after filtering.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub event_types: Option<Vec<AuditEventType>>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub comparison_id: Option<String>,
    pub proposal_id: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&entry.event_type) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(cid) = &self.comparison_id {
            if entry.data.get("comparison_id").and_then(Value::as_str) != Some(cid.as_str()) {
                return false;
            }
        }
        if let Some(pid) = &self.proposal_id {
            let scalar = entry.data.get("proposal_id").and_then(Value::as_str) == Some(pid.as_str());
            let listed = entry
                .data
                .get("proposal_ids")
                .and_then(Value::as_array)
                .is_some_and(|xs| xs.iter().any(|x| x.as_str() == Some(pid.as_str())));
            if !scalar && !listed {
                return false;
            }
        }
        true
    }
}

/// Single-writer handle over one journal file.
#[derive(Debug)]
pub struct AuditJournal {
    path: PathBuf,
    next_sequence: u64,
    last_hash: String,
}

impl AuditJournal {
    /// Create an empty journal. Fails if the file already exists.
    pub fn create(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::File {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| AuditError::File {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            next_sequence: 0,
            last_hash: String::new(),
        })
    }

    /// Open for append: replay the file, verify the full chain, and position
    /// at the tail. No appends are possible on a corrupted journal.
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        let entries = Self::read_verified(path)?;
        let (next_sequence, last_hash) = match entries.last() {
            Some(e) => (e.sequence + 1, e.entry_hash.clone()),
            None => (0, String::new()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            next_sequence,
            last_hash,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append one event and flush it to durable storage.
    pub fn append(
        &mut self,
        timestamp: DateTime<Utc>,
        event_type: AuditEventType,
        session_id: &str,
        data: Value,
    ) -> Result<AuditEntry, AuditError> {
        let sequence = self.next_sequence;
        let previous_hash = self.last_hash.clone();

        let data_hash = sha256_canonical(&data)?;
        let ts = timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let id_basis = format!(
            "{ts}|{}|{session_id}|{sequence}|{data_hash}",
            event_type.as_str()
        );
        let id = sha256_hex(id_basis.as_bytes())[..16].to_string();

        let mut entry = AuditEntry {
            id,
            timestamp,
            event_type,
            session_id: session_id.to_string(),
            data,
            previous_hash,
            entry_hash: String::new(),
            sequence,
        };
        entry.entry_hash = entry.compute_entry_hash()?;

        let mut line = serde_json::to_string(&entry).map_err(IoError::from)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| AuditError::File {
                path: self.path.clone(),
                source: e,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|e| AuditError::File {
                path: self.path.clone(),
                source: e,
            })?;
        file.sync_all().map_err(|e| AuditError::File {
            path: self.path.clone(),
            source: e,
        })?;

        self.next_sequence = sequence + 1;
        self.last_hash = entry.entry_hash.clone();
        log::debug!(
            "audit append: seq {} {} ({})",
            sequence,
            entry.event_type.as_str(),
            self.path.display()
        );
        Ok(entry)
    }

    /// Offline integrity check. Returns the number of entries on success and
    /// names the first bad sequence otherwise.
    pub fn verify(path: &Path) -> Result<u64, AuditError> {
        Ok(Self::read_verified(path)?.len() as u64)
    }

    /// Strict read: parse every line and verify sequence continuity, chain
    /// linkage, and entry hashes.
    pub fn read_verified(path: &Path) -> Result<Vec<AuditEntry>, AuditError> {
        let file = File::open(path).map_err(|e| AuditError::File {
            path: path.to_path_buf(),
            source: e,
        })?;
        let reader = BufReader::new(file);

        let mut entries: Vec<AuditEntry> = Vec::new();
        let mut prev_hash = String::new();
        for (i, line) in reader.lines().enumerate() {
            let expected_seq = i as u64;
            let line = line.map_err(|e| AuditError::Corrupted {
                sequence: expected_seq,
                reason: format!("unreadable line: {e}"),
            })?;
            if line.trim().is_empty() {
                return Err(AuditError::Corrupted {
                    sequence: expected_seq,
                    reason: "blank line in journal".into(),
                });
            }
            let entry: AuditEntry =
                serde_json::from_str(&line).map_err(|e| AuditError::Corrupted {
                    sequence: expected_seq,
                    reason: format!("unparseable entry (possibly truncated): {e}"),
                })?;
            if entry.sequence != expected_seq {
                return Err(AuditError::Corrupted {
                    sequence: expected_seq,
                    reason: format!("sequence gap: found {}", entry.sequence),
                });
            }
            if entry.previous_hash != prev_hash {
                return Err(AuditError::Corrupted {
                    sequence: expected_seq,
                    reason: "previous_hash does not match prior entry".into(),
                });
            }
            let recomputed = entry.compute_entry_hash()?;
            if recomputed != entry.entry_hash {
                return Err(AuditError::Corrupted {
                    sequence: expected_seq,
                    reason: "entry_hash mismatch".into(),
                });
            }
            prev_hash = entry.entry_hash.clone();
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Filtered, paged read. Does not verify the chain; unparseable lines are
    /// logged and skipped so a damaged tail cannot hide earlier history.
    pub fn query(path: &Path, q: &AuditQuery) -> Result<Vec<AuditEntry>, AuditError> {
        let file = File::open(path).map_err(|e| AuditError::File {
            path: path.to_path_buf(),
            source: e,
        })?;
        let reader = BufReader::new(file);

        let mut matched: Vec<AuditEntry> = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let Ok(line) = line else {
                log::warn!("audit query: unreadable line {i} in {}", path.display());
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => {
                    if q.matches(&entry) {
                        matched.push(entry);
                    }
                }
                Err(e) => {
                    log::warn!(
                        "audit query: skipping unparseable line {i} in {}: {e}",
                        path.display()
                    );
                }
            }
        }

        let iter = matched.into_iter().skip(q.offset);
        Ok(match q.limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }
}
