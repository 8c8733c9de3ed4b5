//! Convergence metrics and the stop recommendation.
//!
//! Recomputed after each completed comparison:
//! - `recent_rating_changes`: the most recent up-to-10 absolute rating deltas
//! - `avg_rating_change` / `rating_variance`: mean and sample variance of the
//!   window (variance is 0 below two samples)
//! - `coverage_percentage`: distinct pairs compared over `C(n, 2)`, as a
//!   percentage
//! - `convergence_score`: `(coverage/100 + 1/(1 + variance/10)) / 2`, clamped
//!   to `[0, 1]`
//! - `ranking_stability`: fraction of top-T positions whose identity held
//!   across the recent snapshot window
//!
//! The stop rule combines these with the configured floors and ceilings; a
//! hard stop always applies at `max_comparisons`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use pe_core::ConvergenceConfig;

const DELTA_WINDOW: usize = 10;

/// The persisted metrics block (checkpoint field `convergence_metrics`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceMetrics {
    pub recent_rating_changes: Vec<f64>,
    pub avg_rating_change: f64,
    pub rating_variance: f64,
    pub coverage_percentage: f64,
    pub convergence_score: f64,
    pub ranking_stability: f64,
}

impl Default for ConvergenceMetrics {
    fn default() -> Self {
        Self {
            recent_rating_changes: Vec::new(),
            avg_rating_change: 0.0,
            rating_variance: 0.0,
            coverage_percentage: 0.0,
            convergence_score: 0.0,
            ranking_stability: 1.0,
        }
    }
}

/// Outcome of the stop check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRecommendation {
    /// The early-stopping heuristic fired.
    pub recommended: bool,
    /// `max_comparisons` reached; the session should not continue.
    pub hard_stop: bool,
}

/// Tracks the metrics plus the recent top-T snapshots needed for stability.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceTracker {
    metrics: ConvergenceMetrics,
    /// Snapshots of the top-T id list after each completed comparison,
    /// bounded by the stability window.
    top_snapshots: VecDeque<Vec<String>>,
    stability_window: usize,
}

impl ConvergenceTracker {
    pub fn new(cfg: &ConvergenceConfig) -> Self {
        Self {
            metrics: ConvergenceMetrics::default(),
            top_snapshots: VecDeque::new(),
            stability_window: cfg.top_t_stability_window.max(1),
        }
    }

    /// Restore the persisted block on resume. Snapshot history is not
    /// persisted; stability re-seeds from the next comparisons.
    pub fn with_metrics(cfg: &ConvergenceConfig, metrics: ConvergenceMetrics) -> Self {
        Self {
            metrics,
            top_snapshots: VecDeque::new(),
            stability_window: cfg.top_t_stability_window.max(1),
        }
    }

    pub fn metrics(&self) -> &ConvergenceMetrics {
        &self.metrics
    }

    /// Fold one completed comparison into the metrics.
    ///
    /// `abs_deltas` are the per-proposal absolute rating changes of the
    /// round; `unique_pairs`/`possible_pairs` feed coverage; `top_ids` is the
    /// current top-T ranking by rating.
    pub fn record_comparison(
        &mut self,
        abs_deltas: &[f64],
        unique_pairs: usize,
        possible_pairs: usize,
        top_ids: Vec<String>,
    ) {
        let m = &mut self.metrics;
        for &d in abs_deltas {
            if m.recent_rating_changes.len() == DELTA_WINDOW {
                m.recent_rating_changes.remove(0);
            }
            m.recent_rating_changes.push(d);
        }

        let n = m.recent_rating_changes.len();
        m.avg_rating_change = if n == 0 {
            0.0
        } else {
            m.recent_rating_changes.iter().sum::<f64>() / n as f64
        };
        m.rating_variance = if n < 2 {
            0.0
        } else {
            let mean = m.avg_rating_change;
            m.recent_rating_changes
                .iter()
                .map(|x| (x - mean) * (x - mean))
                .sum::<f64>()
                / (n - 1) as f64
        };

        m.coverage_percentage = if possible_pairs == 0 {
            0.0
        } else {
            unique_pairs as f64 / possible_pairs as f64 * 100.0
        };

        let coverage_factor = m.coverage_percentage / 100.0;
        let variance_factor = 1.0 / (1.0 + m.rating_variance / 10.0);
        m.convergence_score = ((coverage_factor + variance_factor) / 2.0).clamp(0.0, 1.0);

        if self.top_snapshots.len() == self.stability_window {
            self.top_snapshots.pop_front();
        }
        self.top_snapshots.push_back(top_ids);
        self.metrics.ranking_stability = self.compute_stability();
    }

    /// Fraction of top-T positions identical across every snapshot in the
    /// window. A single snapshot counts as fully stable.
    fn compute_stability(&self) -> f64 {
        let latest = match self.top_snapshots.back() {
            Some(s) => s,
            None => return 1.0,
        };
        if latest.is_empty() {
            return 1.0;
        }
        let stable = (0..latest.len())
            .filter(|&i| {
                self.top_snapshots
                    .iter()
                    .all(|snap| snap.get(i) == latest.get(i))
            })
            .count();
        stable as f64 / latest.len() as f64
    }

    /// The §stop rule: early stop only when every floor is met; hard stop at
    /// the comparison ceiling regardless.
    pub fn should_stop(&self, cfg: &ConvergenceConfig, total_comparisons: u64) -> StopRecommendation {
        let m = &self.metrics;
        let recommended = cfg.enable_early_stopping
            && total_comparisons >= cfg.min_comparisons
            && m.convergence_score > cfg.confidence_threshold
            && m.rating_variance < cfg.stability_threshold
            && m.coverage_percentage > 50.0;
        StopRecommendation {
            recommended,
            hard_stop: total_comparisons >= cfg.max_comparisons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ConvergenceConfig {
        ConvergenceConfig::default()
    }

    fn tracker() -> ConvergenceTracker {
        ConvergenceTracker::new(&cfg())
    }

    fn tops(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_window_is_quiet() {
        let t = tracker();
        assert_eq!(t.metrics().avg_rating_change, 0.0);
        assert_eq!(t.metrics().rating_variance, 0.0);
    }

    #[test]
    fn window_caps_at_ten() {
        let mut t = tracker();
        for i in 0..15 {
            t.record_comparison(&[i as f64], 1, 10, tops(&["a"]));
        }
        let m = t.metrics();
        assert_eq!(m.recent_rating_changes.len(), 10);
        assert_eq!(m.recent_rating_changes[0], 5.0);
        assert_eq!(m.avg_rating_change, 9.5);
    }

    #[test]
    fn sample_variance_of_known_window() {
        let mut t = tracker();
        t.record_comparison(&[10.0, 20.0], 1, 10, tops(&["a"]));
        let m = t.metrics();
        assert_eq!(m.avg_rating_change, 15.0);
        // Sample variance of {10, 20} is 50.
        assert_eq!(m.rating_variance, 50.0);
    }

    #[test]
    fn coverage_and_score() {
        let mut t = tracker();
        t.record_comparison(&[0.0], 3, 6, tops(&["a"]));
        let m = t.metrics();
        assert_eq!(m.coverage_percentage, 50.0);
        // coverage_factor 0.5, variance 0 ⇒ variance_factor 1 ⇒ score 0.75.
        assert!((m.convergence_score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn zero_proposals_have_zero_coverage() {
        let mut t = tracker();
        t.record_comparison(&[1.0], 0, 0, Vec::new());
        assert_eq!(t.metrics().coverage_percentage, 0.0);
    }

    #[test]
    fn stability_drops_when_top_changes() {
        let mut t = tracker();
        t.record_comparison(&[1.0], 1, 10, tops(&["a", "b"]));
        assert_eq!(t.metrics().ranking_stability, 1.0);
        t.record_comparison(&[1.0], 2, 10, tops(&["b", "a"]));
        assert_eq!(t.metrics().ranking_stability, 0.0);
        t.record_comparison(&[1.0], 3, 10, tops(&["b", "a"]));
        t.record_comparison(&[1.0], 4, 10, tops(&["b", "a"]));
        // "b" has held rank 1 in the newest snapshots but rank 2 swapped
        // within the window.
        assert!(t.metrics().ranking_stability < 1.0);
    }

    #[test]
    fn stop_requires_every_floor() {
        let mut t = tracker();
        // High coverage, tiny deltas: strongly converged.
        for _ in 0..10 {
            t.record_comparison(&[0.5, 0.5], 40, 45, tops(&["a", "b", "c"]));
        }
        let c = cfg();
        assert!(!t.should_stop(&c, 19).recommended, "below min_comparisons");
        assert!(t.should_stop(&c, 20).recommended);
        assert!(!t.should_stop(&c, 20).hard_stop);
        assert!(t.should_stop(&c, 1000).hard_stop);

        let mut disabled = cfg();
        disabled.enable_early_stopping = false;
        assert!(!t.should_stop(&disabled, 500).recommended);
    }

    #[test]
    fn noisy_ratings_block_the_stop() {
        let mut t = tracker();
        for i in 0..10 {
            t.record_comparison(&[(i * 7) as f64], 40, 45, tops(&["a"]));
        }
        assert!(t.metrics().rating_variance >= cfg().stability_threshold);
        assert!(!t.should_stop(&cfg(), 100).recommended);
    }
}
