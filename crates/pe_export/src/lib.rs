//! pe_export — Pure offline export model + renderers (CSV/JSON/text).
//!
//! Determinism rules:
//! - No I/O here. Callers supply proposals, counters, and metrics already in
//!   memory; writing the rendered bytes is the caller's job.
//! - Stable row order (rating descending, id ascending) and stable column
//!   order across formats.
//! - Audit entries are accepted as pre-parsed JSON values to avoid coupling
//!   with the journal's concrete types.

#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use pe_algo::{ConvergenceMetrics, RatingEngine};
use pe_core::{Proposal, SessionStatus};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported format {0:?}")]
    UnsupportedFormat(String),

    #[error("csv render error: {0}")]
    Csv(String),

    #[error("json render error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Ranked-proposal export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Text,
}

impl FromStr for ExportFormat {
    type Err = ExportError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Session-listing formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFormat {
    Table,
    Json,
    Csv,
}

impl FromStr for ListFormat {
    type Err = ExportError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// One ranked proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub rank: usize,
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Internal rating.
    pub rating: f64,
    /// Rating mapped onto the output scale.
    pub export_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_score: Option<f64>,
    /// How many comparisons this proposal appeared in.
    pub comparisons: u64,
    /// Informational [0, 1]: grows with participation and convergence.
    pub confidence: f64,
}

/// Convergence block attached with `--include-stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportStats {
    pub status: SessionStatus,
    pub proposal_count: usize,
    pub total_comparisons: u64,
    pub convergence: ConvergenceMetrics,
}

/// The assembled export document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportModel {
    pub session_name: String,
    pub generated_at: DateTime<Utc>,
    pub rows: Vec<ExportRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ExportStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<Vec<serde_json::Value>>,
}

/// Participation saturates the confidence heuristic after this many rounds.
const CONFIDENCE_FULL_PARTICIPATION: f64 = 5.0;

/// Confidence in a proposal's placement: the mean of a participation factor
/// (`min(count/5, 1)`) and the session's convergence score. Monotone in both;
/// informational only.
pub fn confidence(comparisons: u64, convergence_score: f64) -> f64 {
    let participation = (comparisons as f64 / CONFIDENCE_FULL_PARTICIPATION).min(1.0);
    ((participation + convergence_score) / 2.0).clamp(0.0, 1.0)
}

/// Build the export model. `proposals` may arrive in any order; rows come out
/// rating-descending with ids breaking ties.
#[allow(clippy::too_many_arguments)]
pub fn build_model(
    session_name: &str,
    status: SessionStatus,
    proposals: &[Proposal],
    engine: &RatingEngine,
    comparison_counts: &std::collections::BTreeMap<String, u64>,
    metrics: &ConvergenceMetrics,
    total_comparisons: u64,
    generated_at: DateTime<Utc>,
    include_stats: bool,
    audit: Option<Vec<serde_json::Value>>,
) -> ExportModel {
    let mut ordered: Vec<&Proposal> = proposals.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let rows = ordered
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let count = comparison_counts.get(&p.id).copied().unwrap_or(0);
            ExportRow {
                rank: i + 1,
                id: p.id.clone(),
                title: p.title.clone(),
                speaker: p.speaker.clone(),
                rating: p.score,
                export_score: engine.compute_export_score(p.score),
                original_score: p.original_score,
                comparisons: count,
                confidence: confidence(count, metrics.convergence_score),
            }
        })
        .collect();

    ExportModel {
        session_name: session_name.to_string(),
        generated_at,
        rows,
        stats: include_stats.then(|| ExportStats {
            status,
            proposal_count: proposals.len(),
            total_comparisons,
            convergence: metrics.clone(),
        }),
        audit,
    }
}

/// Render the ranked table as CSV (data rows only; stats and audit belong to
/// the JSON and text forms).
pub fn render_csv(model: &ExportModel) -> Result<String, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "rank",
            "id",
            "title",
            "speaker",
            "score",
            "rating",
            "original_score",
            "comparisons",
            "confidence",
        ])
        .map_err(|e| ExportError::Csv(e.to_string()))?;
    for row in &model.rows {
        writer
            .write_record([
                row.rank.to_string(),
                row.id.clone(),
                row.title.clone(),
                row.speaker.clone().unwrap_or_default(),
                format_number(row.export_score),
                format!("{:.1}", row.rating),
                row.original_score.map(format_number).unwrap_or_default(),
                row.comparisons.to_string(),
                format!("{:.2}", row.confidence),
            ])
            .map_err(|e| ExportError::Csv(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ExportError::Csv(e.to_string()))
}

/// Render the whole model as pretty JSON (stable field order).
pub fn render_json(model: &ExportModel) -> Result<String, ExportError> {
    let mut s = serde_json::to_string_pretty(model)?;
    s.push('\n');
    Ok(s)
}

/// Render a plain-text ranking table, with the stats block and an audit
/// summary when present.
pub fn render_text(model: &ExportModel) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Session: {}", model.session_name);
    let _ = writeln!(
        out,
        "Generated: {}",
        model.generated_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:>4}  {:<12} {:<40} {:>7} {:>9} {:>6} {:>6}",
        "rank", "id", "title", "score", "rating", "cmp", "conf"
    );
    for row in &model.rows {
        let title: String = if row.title.chars().count() > 40 {
            let mut t: String = row.title.chars().take(37).collect();
            t.push_str("...");
            t
        } else {
            row.title.clone()
        };
        let _ = writeln!(
            out,
            "{:>4}  {:<12} {:<40} {:>7} {:>9.1} {:>6} {:>6.2}",
            row.rank,
            row.id,
            title,
            format_number(row.export_score),
            row.rating,
            row.comparisons,
            row.confidence
        );
    }
    if let Some(stats) = &model.stats {
        let _ = writeln!(out);
        let _ = writeln!(out, "Status: {}", stats.status.as_str());
        let _ = writeln!(out, "Proposals: {}", stats.proposal_count);
        let _ = writeln!(out, "Comparisons: {}", stats.total_comparisons);
        let _ = writeln!(
            out,
            "Convergence: {:.3} (coverage {:.1}%, variance {:.2}, stability {:.2})",
            stats.convergence.convergence_score,
            stats.convergence.coverage_percentage,
            stats.convergence.rating_variance,
            stats.convergence.ranking_stability
        );
    }
    if let Some(audit) = &model.audit {
        let _ = writeln!(out);
        let _ = writeln!(out, "Audit entries: {}", audit.len());
    }
    out
}

pub fn render(model: &ExportModel, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => render_csv(model),
        ExportFormat::Json => render_json(model),
        ExportFormat::Text => Ok(render_text(model)),
    }
}

/// Integer scores print without a decimal point; everything else keeps two
/// places.
fn format_number(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v:.2}")
    }
}

// ----------------------------- Session listing -----------------------------

/// One row of `list` output; assembled by the caller from checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub name: String,
    pub status: SessionStatus,
    pub proposal_count: usize,
    pub total_comparisons: u64,
    pub updated_at: DateTime<Utc>,
}

pub fn render_session_list(
    sessions: &[SessionSummary],
    format: ListFormat,
) -> Result<String, ExportError> {
    match format {
        ListFormat::Json => {
            let mut s = serde_json::to_string_pretty(sessions)?;
            s.push('\n');
            Ok(s)
        }
        ListFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer
                .write_record(["name", "status", "proposals", "comparisons", "updated_at"])
                .map_err(|e| ExportError::Csv(e.to_string()))?;
            for s in sessions {
                writer
                    .write_record([
                        s.name.clone(),
                        s.status.as_str().to_string(),
                        s.proposal_count.to_string(),
                        s.total_comparisons.to_string(),
                        s.updated_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    ])
                    .map_err(|e| ExportError::Csv(e.to_string()))?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| ExportError::Csv(e.to_string()))?;
            String::from_utf8(bytes).map_err(|e| ExportError::Csv(e.to_string()))
        }
        ListFormat::Table => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "{:<24} {:<9} {:>9} {:>11}  {}",
                "name", "status", "proposals", "comparisons", "updated"
            );
            for s in sessions {
                let _ = writeln!(
                    out,
                    "{:<24} {:<9} {:>9} {:>11}  {}",
                    s.name,
                    s.status.as_str(),
                    s.proposal_count,
                    s.total_comparisons,
                    s.updated_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                );
            }
            Ok(out)
        }
    }
}
