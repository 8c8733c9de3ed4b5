// crates/pe_cli/src/args.rs
//
// Argument surface for the five verbs. Parsing stays here; semantic
// validation (formats, statuses, config files) happens in main where it can
// map onto the right exit codes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "propelo",
    version,
    about = "Rank conference talk proposals by comparing a few at a time"
)]
pub struct Cli {
    /// Directory holding session checkpoints and audit journals.
    #[arg(long, global = true, default_value = "sessions")]
    pub sessions_dir: PathBuf,

    /// Seed for the presentation-order shuffle (reproducible runs).
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Suppress progress chatter on stdout.
    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a session from a source table and review comparisons.
    Start {
        /// Source table (CSV) with at least id and title columns.
        #[arg(long)]
        input: PathBuf,
        /// Session name; generated from the timestamp when omitted.
        #[arg(long)]
        name: Option<String>,
        /// JSON config file; missing keys take their defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Reopen an existing session and continue reviewing.
    Resume {
        #[arg(long = "session-id")]
        session_id: String,
    },

    /// Write the ranked proposals in csv, json, or text form.
    Export {
        #[arg(long = "session-id")]
        session_id: String,
        #[arg(long, default_value = "csv")]
        format: String,
        /// Output file; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Attach the convergence/stats block.
        #[arg(long)]
        include_stats: bool,
        /// Attach the audit journal entries (json) or a summary (text).
        #[arg(long)]
        include_audit: bool,
    },

    /// Show the sessions in the sessions directory.
    List {
        #[arg(long, default_value = "table")]
        format: String,
        /// One of: active, complete, all.
        #[arg(long, default_value = "all")]
        status: String,
    },

    /// Check a source table and preview the parsed rows.
    Validate {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}
