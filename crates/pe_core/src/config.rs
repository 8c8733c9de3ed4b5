//! Closed configuration record with safe defaults.
//!
//! Every option is an explicit field; unknown keys in persisted configs are
//! ignored on deserialization and missing keys take the documented defaults.
//! `Config::validate` is the single gate for domain checks; constructors in
//! `pe_algo` re-run the rating subset so a hand-built config cannot bypass it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::comparison::ComparisonMethod;

/// Configuration-kind failures (CLI exit code 2).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("rating bounds invalid: min_rating {min} must be strictly below max_rating {max}")]
    RatingBounds { min: f64, max: f64 },

    #[error("initial_rating {initial} outside rating bounds [{min}, {max}]")]
    InitialOutOfRange { initial: f64, min: f64, max: f64 },

    #[error("k_factor must be positive, got {0}")]
    NonPositiveK(f64),

    #[error("output scale invalid: output_min {min} must be strictly below output_max {max}")]
    OutputScale { min: f64, max: f64 },

    #[error("column mapping: {0} must not be empty")]
    EmptyColumn(&'static str),
}

/// Source-table field delimiter. The wire token is the delimiter itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delimiter {
    #[serde(rename = ",")]
    Comma,
    #[serde(rename = ";")]
    Semicolon,
    #[serde(rename = "\t")]
    Tab,
    #[serde(rename = "|")]
    Pipe,
}

impl Delimiter {
    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Semicolon => b';',
            Delimiter::Tab => b'\t',
            Delimiter::Pipe => b'|',
        }
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Delimiter::Comma
    }
}

/// Elo rating parameters and the user-facing output scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub initial_rating: f64,
    pub k_factor: f64,
    pub min_rating: f64,
    pub max_rating: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub use_decimals: bool,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            initial_rating: 1500.0,
            k_factor: 32.0,
            min_rating: 0.0,
            max_rating: 3000.0,
            output_min: 0.0,
            output_max: 10.0,
            use_decimals: false,
        }
    }
}

impl RatingConfig {
    /// Domain checks for the rating subset. Logs (but accepts) an unusually
    /// aggressive k_factor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_rating < self.max_rating) {
            return Err(ConfigError::RatingBounds {
                min: self.min_rating,
                max: self.max_rating,
            });
        }
        if !(self.min_rating < self.initial_rating && self.initial_rating < self.max_rating) {
            return Err(ConfigError::InitialOutOfRange {
                initial: self.initial_rating,
                min: self.min_rating,
                max: self.max_rating,
            });
        }
        if !(self.k_factor > 0.0) {
            return Err(ConfigError::NonPositiveK(self.k_factor));
        }
        if self.k_factor > 100.0 {
            log::warn!(
                "k_factor {} is unusually large; single comparisons will move ratings by up to that much",
                self.k_factor
            );
        }
        if !(self.output_min < self.output_max) {
            return Err(ConfigError::OutputScale {
                min: self.output_min,
                max: self.output_max,
            });
        }
        Ok(())
    }
}

/// Column mapping for the source table. `id_column` and `title_column` are
/// required; the rest are optional. In headerless mode the names are parsed
/// as 0-based column indices by the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceColumns {
    pub id_column: String,
    pub title_column: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_column: Option<String>,
    pub has_header: bool,
    pub delimiter: Delimiter,
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            id_column: "id".to_string(),
            title_column: "title".to_string(),
            abstract_column: None,
            speaker_column: None,
            score_column: None,
            comment_column: None,
            conflict_column: None,
            has_header: true,
            delimiter: Delimiter::Comma,
        }
    }
}

impl SourceColumns {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_column.trim().is_empty() {
            return Err(ConfigError::EmptyColumn("id_column"));
        }
        if self.title_column.trim().is_empty() {
            return Err(ConfigError::EmptyColumn("title_column"));
        }
        Ok(())
    }
}

/// Convergence and stop-recommendation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Size of the top set whose stability is tracked (top-T).
    pub target_accepted: usize,
    /// How many completed comparisons the top-T identity check looks back over.
    pub top_t_stability_window: usize,
    /// Rating-variance ceiling (rating points) for a stop recommendation.
    pub stability_threshold: f64,
    pub min_comparisons: u64,
    pub max_comparisons: u64,
    pub enable_early_stopping: bool,
    pub confidence_threshold: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            target_accepted: 10,
            top_t_stability_window: 5,
            stability_threshold: 5.0,
            min_comparisons: 20,
            max_comparisons: 1000,
            enable_early_stopping: true,
            confidence_threshold: 0.8,
        }
    }
}

/// Full session configuration. Serialized into the checkpoint; unknown keys
/// are ignored on load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rating: RatingConfig,
    pub source: SourceColumns,
    pub comparison_mode: ComparisonMethod,
    pub convergence: ConvergenceConfig,
}

impl Config {
    /// Validate every sub-record. Call before constructing any engine state.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rating.validate()?;
        self.source.validate()?;
        Ok(())
    }
}
