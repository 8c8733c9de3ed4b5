// crates/pe_cli/src/main.rs
//
// propelo — CLI entrypoint. Five verbs (start, resume, export, list,
// validate) over the session layer. Strictly offline; the only inputs are
// the source table, the sessions directory, and stdin during review.
//
// Exit codes: 0 success, 1 file, 2 configuration, 3 session, 4 export,
// 5 validation. Failures print one JSON object on stderr.

mod args;
mod errors;
mod review;

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;

use pe_core::{order_rng_from_seed, Clock, Config, OrderRng, SessionStatus, SystemClock};
use pe_export::{ExportFormat, ListFormat, SessionSummary};
use pe_io::{canonical_json, load_source_table, AuditJournal, AuditQuery};
use pe_session::{Session, SessionManager};

use args::{Cli, Command};
use errors::Failure;
use review::run_review_loop;

/// Checkpoint backups kept per session.
const BACKUP_RETAIN: usize = 5;
/// Rows shown by `validate`.
const PREVIEW_ROWS: usize = 10;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            failure.print();
            ExitCode::from(failure.code)
        }
    }
}

fn run(cli: Cli) -> Result<(), Failure> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let manager = SessionManager::new(cli.sessions_dir.clone(), clock.clone())
        .with_backups(BACKUP_RETAIN);
    let rng = make_rng(cli.seed, clock.as_ref());

    match cli.command {
        Command::Start {
            input,
            name,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let name = name.unwrap_or_else(|| {
                format!("session-{}", clock.now().format("%Y%m%d-%H%M%S"))
            });
            let (mut session, row_errors) = manager
                .create(&name, &input, config, rng)
                .map_err(Failure::from)?;
            if !row_errors.is_empty() && !cli.quiet {
                println!(
                    "propelo: {} row(s) of {} were skipped or degraded; `validate` shows details",
                    row_errors.len(),
                    input.display()
                );
            }
            if !cli.quiet {
                println!(
                    "propelo: session {:?} created with {} proposals",
                    session.name(),
                    session.proposals().len()
                );
            }
            drive(&mut session, cli.quiet)
        }

        Command::Resume { session_id } => {
            let mut session = manager.resume(&session_id, rng).map_err(Failure::from)?;
            if session.status() == SessionStatus::Complete {
                return Err(Failure::session(format!(
                    "session {session_id:?} is complete; use `export` to read its ranking"
                )));
            }
            if !cli.quiet {
                println!(
                    "propelo: resumed {:?} at {} comparison(s)",
                    session.name(),
                    session.total_comparisons()
                );
            }
            drive(&mut session, cli.quiet)
        }

        Command::Export {
            session_id,
            format,
            output,
            include_stats,
            include_audit,
        } => {
            let format: ExportFormat = format.parse().map_err(Failure::from)?;
            let session = manager.open(&session_id, rng).map_err(Failure::from)?;

            let audit = if include_audit {
                let entries =
                    AuditJournal::query(session.audit_path(), &AuditQuery::default())
                        .map_err(|e| Failure::session(e.to_string()))?;
                let values = entries
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| Failure::export(e.to_string()))?;
                Some(values)
            } else {
                None
            };

            let model = pe_export::build_model(
                session.name(),
                session.status(),
                session.proposals(),
                session.engine(),
                session.comparison_counts(),
                session.metrics(),
                session.total_comparisons(),
                clock.now(),
                include_stats,
                audit,
            );
            let rendered = pe_export::render(&model, format).map_err(Failure::from)?;
            write_output(output.as_deref(), &rendered)?;
            if !cli.quiet {
                if let Some(path) = &output {
                    println!(
                        "propelo: exported {} proposal(s) to {}",
                        model.rows.len(),
                        path.display()
                    );
                }
            }
            Ok(())
        }

        Command::List { format, status } => {
            let format: ListFormat = format.parse().map_err(Failure::from)?;
            let docs = manager.list(None).map_err(Failure::from)?;
            let docs: Vec<_> = match status.as_str() {
                "all" => docs,
                "active" => docs
                    .into_iter()
                    .filter(|d| d.status != SessionStatus::Complete)
                    .collect(),
                "complete" => docs
                    .into_iter()
                    .filter(|d| d.status == SessionStatus::Complete)
                    .collect(),
                other => {
                    return Err(Failure::config(format!(
                        "unknown --status {other:?} (expected active, complete, or all)"
                    )))
                }
            };
            let summaries: Vec<SessionSummary> = docs
                .iter()
                .map(|d| SessionSummary {
                    name: d.session_name.clone(),
                    status: d.status,
                    proposal_count: d.proposal_scores.len(),
                    total_comparisons: d.total_comparisons,
                    updated_at: d.updated_at,
                })
                .collect();
            let rendered =
                pe_export::render_session_list(&summaries, format).map_err(Failure::from)?;
            print!("{rendered}");
            Ok(())
        }

        Command::Validate { input, config } => {
            let config = load_config(config.as_deref())?;
            let engine = pe_algo::RatingEngine::new(config.rating.clone())
                .map_err(|e| Failure::config(e.to_string()))?;
            let table = load_source_table(&input, &config.source, &engine, clock.now())
                .map_err(Failure::from)?;

            println!(
                "propelo: {} parsed {} proposal(s), {} problem row(s)",
                input.display(),
                table.proposals.len(),
                table.row_errors.len()
            );
            for p in table.proposals.iter().take(PREVIEW_ROWS) {
                let score = p
                    .original_score
                    .map(|s| format!(" (score {s})"))
                    .unwrap_or_default();
                println!("  {} — {}{}", p.id, p.title, score);
            }
            if table.proposals.len() > PREVIEW_ROWS {
                println!("  ... and {} more", table.proposals.len() - PREVIEW_ROWS);
            }

            if !table.row_errors.is_empty() {
                return Err(Failure::validation(format!(
                    "{} row(s) failed to parse",
                    table.row_errors.len()
                ))
                .with_details(json!({
                    "rows": table.row_errors,
                    "input": input.display().to_string(),
                }))
                .with_suggestion(
                    "fix the listed rows, or adjust the column mapping in the config file",
                ));
            }
            Ok(())
        }
    }
}

/// Run the review loop over locked stdin.
fn drive(session: &mut Session, quiet: bool) -> Result<(), Failure> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    run_review_loop(session, &mut input, quiet)
}

/// Load a config file (JSON) or fall back to defaults; always re-validate.
fn load_config(path: Option<&Path>) -> Result<Config, Failure> {
    let config = match path {
        None => Config::default(),
        Some(p) => {
            let bytes = fs::read(p).map_err(|e| {
                Failure::config(format!("cannot read config {}: {e}", p.display()))
            })?;
            serde_json::from_slice(&bytes).map_err(|e| {
                Failure::config(format!("cannot parse config {}: {e}", p.display()))
            })?
        }
    };
    config
        .validate()
        .map_err(|e| Failure::config(e.to_string()))?;
    Ok(config)
}

/// Seed the presentation shuffle from the flag, or from the clock when the
/// operator does not care about reproducibility.
fn make_rng(seed: Option<u64>, clock: &dyn Clock) -> OrderRng {
    let seed = seed.unwrap_or_else(|| {
        clock
            .now()
            .timestamp_nanos_opt()
            .unwrap_or_default() as u64
    });
    order_rng_from_seed(seed)
}

/// Write rendered output to a file (atomically) or stdout.
fn write_output(path: Option<&Path>, rendered: &str) -> Result<(), Failure> {
    match path {
        Some(p) => {
            let target: PathBuf = p.to_path_buf();
            canonical_json::atomic_write(&target, rendered.as_bytes())
                .map_err(|e| Failure::export(format!("cannot write {}: {e}", target.display())))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .map_err(|e| Failure::export(format!("cannot write to stdout: {e}")))
        }
    }
}
