//! Elo rating engine.
//!
//! Stateless over a validated [`RatingConfig`]:
//! - Expected score for A against B: `E_A = 1 / (1 + 10^((R_B − R_A)/400))`.
//!   The 400 divisor is the Elo convention, not a tunable.
//! - Pairwise: winner gains `k·(1 − E_winner)`, loser changes by
//!   `k·(0 − E_loser)`; both results clamped to `[min_rating, max_rating]`.
//! - Multiway: decompose the ranking into all ordered pairs, evaluate every
//!   pair against the **pre-round** ratings, sum deltas per slot, apply and
//!   clamp once. Pair evaluation order cannot affect the result, and the net
//!   change per proposal is bounded by `k·(n − 1)`.
//! - Scale conversion: linear maps between `[output_min, output_max]` and
//!   `[min_rating, max_rating]` in both directions.
//!
//! All compute operations are total on a valid config.

use pe_core::{ConfigError, RatingConfig};

#[derive(Debug, Clone)]
pub struct RatingEngine {
    cfg: RatingConfig,
}

impl RatingEngine {
    /// Construction re-validates the config so a hand-built `RatingConfig`
    /// cannot bypass the domain checks.
    pub fn new(cfg: RatingConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &RatingConfig {
        &self.cfg
    }

    fn clamp(&self, r: f64) -> f64 {
        r.clamp(self.cfg.min_rating, self.cfg.max_rating)
    }

    /// `E_A` for a rated `a` against a rated `b`.
    pub fn expected_score(a: f64, b: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((b - a) / 400.0))
    }

    /// New (winner, loser) ratings after one pairwise comparison.
    pub fn compute_pairwise(&self, winner: f64, loser: f64) -> (f64, f64) {
        let k = self.cfg.k_factor;
        let e_winner = Self::expected_score(winner, loser);
        let e_loser = Self::expected_score(loser, winner);
        let new_winner = self.clamp(winner + k * (1.0 - e_winner));
        let new_loser = self.clamp(loser + k * (0.0 - e_loser));
        (new_winner, new_loser)
    }

    /// New ratings for a ranked round, best first. `ranked[i]` beat
    /// `ranked[j]` for every `i < j`.
    pub fn compute_multiway(&self, ranked: &[f64]) -> Vec<f64> {
        let k = self.cfg.k_factor;
        let n = ranked.len();
        let mut deltas = vec![0.0f64; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let e_i = Self::expected_score(ranked[i], ranked[j]);
                let e_j = Self::expected_score(ranked[j], ranked[i]);
                deltas[i] += k * (1.0 - e_i);
                deltas[j] += k * (0.0 - e_j);
            }
        }
        ranked
            .iter()
            .zip(deltas)
            .map(|(&r, d)| self.clamp(r + d))
            .collect()
    }

    /// Import a source-table score from the output scale. A value outside
    /// `[output_min, output_max]` is treated as absent and maps to
    /// `initial_rating`.
    pub fn convert_csv_score_to_rating(&self, v: f64) -> f64 {
        let c = &self.cfg;
        if !v.is_finite() || v < c.output_min || v > c.output_max {
            return c.initial_rating;
        }
        let frac = (v - c.output_min) / (c.output_max - c.output_min);
        c.min_rating + frac * (c.max_rating - c.min_rating)
    }

    /// Export a rating onto the output scale. The rating is clamped into
    /// `[min_rating, max_rating]` first; with `use_decimals` off the result
    /// is rounded half-up to the nearest integer.
    pub fn compute_export_score(&self, r: f64) -> f64 {
        let c = &self.cfg;
        let r = self.clamp(r);
        let frac = (r - c.min_rating) / (c.max_rating - c.min_rating);
        let s = c.output_min + frac * (c.output_max - c.output_min);
        if c.use_decimals {
            s
        } else {
            // Half-up, not half-away-from-zero: -2.5 exports as -2.
            (s + 0.5).floor()
        }
    }
}
