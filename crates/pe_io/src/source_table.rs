//! Source-table loader.
//!
//! The source table is the sole ground truth for proposal identity and
//! metadata; it is re-read on every resume. UTF-8, one configured delimiter,
//! optional header, CRLF tolerated, quoted fields handled leniently.
//!
//! Failure policy: a header missing a required column aborts the load; row
//! failures (empty id, duplicate id, empty title) reject the row and are
//! collected into `row_errors` alongside the successful rows. A non-numeric
//! score keeps the row — the score is treated as absent and falls back to the
//! initial rating — and still records a row error so `validate` can surface
//! it.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use pe_algo::RatingEngine;
use pe_core::{proposal::normalize_conflict_tags, Proposal, SourceColumns};

/// Header-level failures abort the whole load (CLI exit code 1 or 5).
#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot open source table {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read source table header: {0}")]
    Header(String),

    #[error("required column {0:?} not found in header")]
    MissingColumn(String),

    #[error("column spec {0:?} is not a valid 0-based index (headerless table)")]
    BadColumnIndex(String),
}

/// One rejected or degraded row. `line` is 1-based and counts the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub line: u64,
    pub message: String,
}

/// Load outcome: successful rows plus collected per-row errors. The caller
/// decides whether partial data is usable.
#[derive(Debug)]
pub struct TableLoad {
    pub proposals: Vec<Proposal>,
    pub row_errors: Vec<RowError>,
}

/// Resolved 0-based field indices for the configured columns.
struct ColumnIndexes {
    id: usize,
    title: usize,
    abstract_: Option<usize>,
    speaker: Option<usize>,
    score: Option<usize>,
    conflict: Option<usize>,
    /// Metadata keys per field position (header names, or `column_<i>`).
    meta_keys: Vec<String>,
}

/// Read and parse the source table. Scores import through
/// `convert_csv_score_to_rating`; rows with no usable score start at the
/// initial rating.
pub fn load_source_table(
    path: &Path,
    columns: &SourceColumns,
    engine: &RatingEngine,
    now: DateTime<Utc>,
) -> Result<TableLoad, TableError> {
    let file = File::open(path).map_err(|e| TableError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(columns.delimiter.as_byte())
        .has_headers(columns.has_header)
        .flexible(true)
        .from_reader(file);

    let idx = resolve_columns(&mut reader, columns)?;

    let mut proposals: Vec<Proposal> = Vec::new();
    let mut row_errors: Vec<RowError> = Vec::new();
    let mut seen_ids: BTreeSet<String> = BTreeSet::new();

    let first_data_line: u64 = if columns.has_header { 2 } else { 1 };
    for (row_no, record) in reader.records().enumerate() {
        let line = first_data_line + row_no as u64;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("malformed row: {e}"),
                });
                continue;
            }
        };

        let field = |i: usize| record.get(i).unwrap_or("").trim();

        let id = field(idx.id);
        if id.is_empty() {
            row_errors.push(RowError {
                line,
                message: "empty id".into(),
            });
            continue;
        }
        if !seen_ids.insert(id.to_string()) {
            row_errors.push(RowError {
                line,
                message: format!("duplicate id {id:?}"),
            });
            continue;
        }

        let title = field(idx.title);
        if title.is_empty() {
            row_errors.push(RowError {
                line,
                message: format!("empty title for id {id:?}"),
            });
            continue;
        }

        let (score, original_score) = match idx.score.map(field) {
            None => (engine.config().initial_rating, None),
            Some(raw) if raw.is_empty() => (engine.config().initial_rating, None),
            Some(raw) => match raw.parse::<f64>() {
                Ok(v) => (engine.convert_csv_score_to_rating(v), Some(v)),
                Err(_) => {
                    row_errors.push(RowError {
                        line,
                        message: format!("non-numeric score {raw:?} for id {id:?}"),
                    });
                    (engine.config().initial_rating, None)
                }
            },
        };

        // Identity was checked above, so construction cannot fail here.
        let mut proposal = match Proposal::new(id, title, score, now) {
            Ok(p) => p,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: e.to_string(),
                });
                continue;
            }
        };
        proposal.original_score = original_score;
        proposal.abstract_text = idx
            .abstract_
            .map(field)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        proposal.speaker = idx
            .speaker
            .map(field)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if let Some(ci) = idx.conflict {
            proposal.conflict_tags = normalize_conflict_tags(field(ci).split(';'));
        }
        // Preserve every column: all mapped/named ones (empty when the row is
        // short) plus any extras a ragged row carries.
        for i in 0..record.len().max(idx.meta_keys.len()) {
            let key = idx
                .meta_keys
                .get(i)
                .cloned()
                .unwrap_or_else(|| format!("column_{i}"));
            proposal
                .metadata
                .insert(key, record.get(i).unwrap_or("").to_string());
        }
        proposals.push(proposal);
    }

    Ok(TableLoad {
        proposals,
        row_errors,
    })
}

fn resolve_columns(
    reader: &mut csv::Reader<File>,
    columns: &SourceColumns,
) -> Result<ColumnIndexes, TableError> {
    if columns.has_header {
        let headers = reader
            .headers()
            .map_err(|e| TableError::Header(e.to_string()))?
            .clone();
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
        let find = |name: &str| names.iter().position(|h| h == name);
        let required = |name: &str| find(name).ok_or_else(|| TableError::MissingColumn(name.into()));

        Ok(ColumnIndexes {
            id: required(&columns.id_column)?,
            title: required(&columns.title_column)?,
            abstract_: columns.abstract_column.as_deref().and_then(find),
            speaker: columns.speaker_column.as_deref().and_then(find),
            score: columns.score_column.as_deref().and_then(find),
            conflict: columns.conflict_column.as_deref().and_then(find),
            meta_keys: names,
        })
    } else {
        // Headerless: column specs are 0-based indices; metadata keys are
        // positional.
        let parse = |spec: &str| -> Result<usize, TableError> {
            spec.trim()
                .parse::<usize>()
                .map_err(|_| TableError::BadColumnIndex(spec.to_string()))
        };
        let parse_opt = |spec: Option<&str>| -> Result<Option<usize>, TableError> {
            spec.map(parse).transpose()
        };
        let id = parse(&columns.id_column)?;
        let title = parse(&columns.title_column)?;
        let abstract_ = parse_opt(columns.abstract_column.as_deref())?;
        let speaker = parse_opt(columns.speaker_column.as_deref())?;
        let score = parse_opt(columns.score_column.as_deref())?;
        let conflict = parse_opt(columns.conflict_column.as_deref())?;
        let max = [Some(id), Some(title), abstract_, speaker, score, conflict]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0);
        Ok(ColumnIndexes {
            id,
            title,
            abstract_,
            speaker,
            score,
            conflict,
            meta_keys: (0..=max).map(|i| format!("column_{i}")).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pe_core::RatingConfig;
    use std::io::Write as _;

    fn engine() -> RatingEngine {
        RatingEngine::new(RatingConfig::default()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn write_table(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    fn columns() -> SourceColumns {
        SourceColumns {
            score_column: Some("score".into()),
            speaker_column: Some("speaker".into()),
            conflict_column: Some("conflicts".into()),
            ..SourceColumns::default()
        }
    }

    #[test]
    fn loads_rows_with_metadata_and_scores() {
        let f = write_table("id,title,speaker,score,conflicts\np1,Rust at Scale,Ada,8,acme;uni\np2,Zero Copy IO,Grace,2,\n");
        let out = load_source_table(f.path(), &columns(), &engine(), t0()).unwrap();
        assert!(out.row_errors.is_empty());
        assert_eq!(out.proposals.len(), 2);

        let p1 = &out.proposals[0];
        assert_eq!(p1.id, "p1");
        assert_eq!(p1.title, "Rust at Scale");
        assert_eq!(p1.speaker.as_deref(), Some("Ada"));
        assert_eq!(p1.original_score, Some(8.0));
        assert_eq!(p1.score, 2400.0); // 8 on 0..10 mapped to 0..3000
        assert_eq!(p1.conflict_tags, vec!["acme".to_string(), "uni".to_string()]);
        assert_eq!(p1.metadata["speaker"], "Ada");
        assert_eq!(p1.metadata["title"], "Rust at Scale");
    }

    #[test]
    fn crlf_and_quoted_fields_parse() {
        let f = write_table("id,title\r\np1,\"Commas, quoted\"\r\np2,Plain\r\n");
        let out = load_source_table(f.path(), &columns(), &engine(), t0()).unwrap();
        assert_eq!(out.proposals[0].title, "Commas, quoted");
        assert_eq!(out.proposals.len(), 2);
    }

    #[test]
    fn semicolon_delimiter() {
        let mut cols = columns();
        cols.delimiter = pe_core::Delimiter::Semicolon;
        let f = write_table("id;title;speaker;score;conflicts\np1;T;S;5;\n");
        let out = load_source_table(f.path(), &cols, &engine(), t0()).unwrap();
        assert_eq!(out.proposals[0].score, 1500.0);
    }

    #[test]
    fn missing_required_column_aborts() {
        let f = write_table("key,title\np1,T\n");
        let err = load_source_table(f.path(), &columns(), &engine(), t0()).unwrap_err();
        assert!(matches!(err, TableError::MissingColumn(ref c) if c == "id"));
    }

    #[test]
    fn bad_rows_are_collected_not_fatal() {
        let f = write_table("id,title,speaker,score,conflicts\n,NoId,,,\np1,,,,\np2,Good,,,\np2,Dup,,,\np3,AlsoGood,,x,\n");
        let out = load_source_table(f.path(), &columns(), &engine(), t0()).unwrap();
        // p2 (first) and p3 survive; p3's score error degrades to initial.
        assert_eq!(out.proposals.len(), 2);
        assert_eq!(out.proposals[1].id, "p3");
        assert_eq!(out.proposals[1].score, 1500.0);
        assert_eq!(out.proposals[1].original_score, None);
        assert_eq!(out.row_errors.len(), 4);
        assert_eq!(out.row_errors[0].line, 2);
        assert!(out.row_errors[0].message.contains("empty id"));
        assert!(out.row_errors[2].message.contains("duplicate id"));
        assert!(out.row_errors[3].message.contains("non-numeric score"));
    }

    #[test]
    fn out_of_range_score_maps_to_initial_without_error() {
        let f = write_table("id,title,speaker,score,conflicts\np1,T,,42,\n");
        let out = load_source_table(f.path(), &columns(), &engine(), t0()).unwrap();
        assert!(out.row_errors.is_empty());
        assert_eq!(out.proposals[0].score, 1500.0);
        assert_eq!(out.proposals[0].original_score, Some(42.0));
    }

    #[test]
    fn headerless_indices() {
        let cols = SourceColumns {
            id_column: "0".into(),
            title_column: "1".into(),
            score_column: Some("2".into()),
            has_header: false,
            ..SourceColumns::default()
        };
        let f = write_table("p1,First,5\np2,Second,10\n");
        let out = load_source_table(f.path(), &cols, &engine(), t0()).unwrap();
        assert_eq!(out.proposals.len(), 2);
        assert_eq!(out.proposals[0].metadata["column_1"], "First");
        assert_eq!(out.proposals[1].score, 3000.0);
    }

    #[test]
    fn headerless_bad_index_spec() {
        let cols = SourceColumns {
            id_column: "id".into(),
            has_header: false,
            ..SourceColumns::default()
        };
        let f = write_table("p1,First\n");
        assert!(matches!(
            load_source_table(f.path(), &cols, &engine(), t0()),
            Err(TableError::BadColumnIndex(_))
        ));
    }

    #[test]
    fn missing_file_is_open_error() {
        let err = load_source_table(Path::new("/nonexistent/t.csv"), &columns(), &engine(), t0())
            .unwrap_err();
        assert!(matches!(err, TableError::Open { .. }));
    }
}
