//! # Score Calculator
//!
//! A pure function `score(message, context) -> MessageScore`. Every
//! sub-component is normalized to `[0, 1]` before weighting; the calculator
//! itself never clamps the weighted total or a custom scorer's contribution.
//! Custom scorers must be pure and cheap — they run once per candidate per
//! dequeue.

use std::sync::Arc;

use crate::metrics::MetricsReport;
use crate::rate_limiter::RateLimiterMetrics;
use crate::types::{LLMRequest, MessageScore, Priority, QueueMessage, ScoreBreakdown};

/// A snapshot of external state the calculator needs: the rate limiter's
/// current budget, the queue's own metrics, and the current wall-clock time
/// (milliseconds since the Unix epoch), so scoring stays a pure function of
/// its inputs rather than reading the clock itself.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub rate_limiter_metrics: RateLimiterMetrics,
    pub queue_metrics: Option<MetricsReport>,
    pub current_time_ms: i64,
}

/// A user-supplied, additive scoring component. Implementations must be pure
/// and inexpensive: they are invoked once per candidate per dequeue.
pub trait CustomScorer: Send + Sync {
    /// A human-readable name, used only for diagnostics.
    fn name(&self) -> &str;
    /// The weight this scorer's contribution is multiplied by before being
    /// added to the weighted total.
    fn weight(&self) -> f64;
    /// Computes this scorer's raw (unweighted) contribution. Not clamped by
    /// the calculator — bound it yourself if that matters to your deployment.
    fn calculate(&self, message: &QueueMessage<LLMRequest>, context: &ScoringContext) -> f64;
}

/// Per-component weights applied to the normalized sub-scores. Weights need
/// not sum to 1 — the dispatcher applies an absolute `minScoreThreshold`
/// against the weighted total, not a normalized one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub priority: f64,
    pub efficiency: f64,
    pub wait_time: f64,
    pub retry: f64,
    pub token_fit: f64,
    pub processing_time: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            priority: 0.25,
            efficiency: 0.20,
            wait_time: 0.20,
            retry: 0.10,
            token_fit: 0.15,
            processing_time: 0.10,
        }
    }
}

/// The pure, stateless score calculator.
pub struct ScoreCalculator {
    weights: Weights,
    custom_scorers: Vec<Arc<dyn CustomScorer>>,
}

impl ScoreCalculator {
    /// Builds a calculator with the given weights and no custom scorers.
    pub fn new(weights: Weights) -> Self {
        Self { weights, custom_scorers: Vec::new() }
    }

    /// Builds a calculator with weights and a set of additive custom scorers.
    pub fn with_custom_scorers(weights: Weights, custom_scorers: Vec<Arc<dyn CustomScorer>>) -> Self {
        Self { weights, custom_scorers }
    }

    /// The weights this calculator was built with.
    pub fn weights(&self) -> Weights {
        self.weights
    }

    /// Scores a single candidate against `context`.
    pub fn score(&self, message: &QueueMessage<LLMRequest>, context: &ScoringContext) -> MessageScore {
        let request = &message.body;
        let avail_tpm = context.rate_limiter_metrics.tpm.available;
        let estimated = request.token_info.estimated;

        let wait_ms = (context.current_time_ms - message.attributes.enqueued_at.timestamp_millis()).max(0) as f64;

        let breakdown = ScoreBreakdown {
            priority: priority_score(request.priority),
            efficiency: efficiency_score(estimated, avail_tpm),
            wait_time: wait_time_score(wait_ms, request.priority),
            retry: retry_penalty(message.attributes.receive_count),
            token_fit: token_fit_score(estimated, avail_tpm),
            processing_time: processing_time_score(estimated, request.expected_processing_time),
        };

        let mut total = self.weights.priority * breakdown.priority
            + self.weights.efficiency * breakdown.efficiency
            + self.weights.wait_time * breakdown.wait_time
            + self.weights.retry * breakdown.retry
            + self.weights.token_fit * breakdown.token_fit
            + self.weights.processing_time * breakdown.processing_time;

        for scorer in &self.custom_scorers {
            total += scorer.weight() * scorer.calculate(message, context);
        }

        MessageScore { total, breakdown }
    }
}

/// {URGENT→1.0, HIGH→0.7, NORMAL→0.4, LOW→0.1}.
pub fn priority_score(priority: Priority) -> f64 {
    match priority {
        Priority::Urgent => 1.0,
        Priority::High => 0.7,
        Priority::Normal => 0.4,
        Priority::Low => 0.1,
    }
}

/// Sweet-spot-shaped curve rewarding requests that fill 70-90% of the
/// available token budget without risking overflow.
pub fn efficiency_score(estimated: u64, available_tpm: f64) -> f64 {
    if available_tpm <= 0.0 {
        return 0.0;
    }
    let u = estimated as f64 / available_tpm;
    if u > 1.0 {
        0.0
    } else if u > 0.9 {
        0.9
    } else if u >= 0.7 {
        1.0
    } else {
        u / 0.7
    }
}

/// `min(waitMs / max, 1)`, with a concave (square-root) transform for URGENT
/// so its wait ramp rises faster than linear.
pub fn wait_time_score(wait_ms: f64, priority: Priority) -> f64 {
    let max_ms = match priority {
        Priority::Urgent => 10_000.0,
        Priority::High => 30_000.0,
        Priority::Normal => 60_000.0,
        Priority::Low => 300_000.0,
    };
    let base = (wait_ms / max_ms).min(1.0).max(0.0);
    if priority == Priority::Urgent {
        base.sqrt()
    } else {
        base
    }
}

/// `1.0` at zero retries, otherwise `max(0.1, 0.7^receiveCount)` — rewards
/// fresh messages, floors at 0.1 to avoid permanent starvation.
pub fn retry_penalty(receive_count: u32) -> f64 {
    if receive_count == 0 {
        1.0
    } else {
        0.7f64.powi(receive_count as i32).max(0.1)
    }
}

/// Penalizes both oversized (can't fit) and undersized (wastes headroom) requests.
pub fn token_fit_score(estimated: u64, available_tpm: f64) -> f64 {
    if available_tpm <= 0.0 {
        return 0.0;
    }
    let r = estimated as f64 / available_tpm;
    if r > 1.0 {
        0.0
    } else if r > 0.5 {
        1.0 - 0.4 * (r - 0.5)
    } else if r >= 0.1 {
        1.0
    } else {
        10.0 * r
    }
}

/// Uses `expected_processing_time` when supplied, else `10 * estimated` (ms)
/// as a rough proxy, then applies a piecewise-linear decay.
pub fn processing_time_score(estimated: u64, expected_processing_time: Option<u64>) -> f64 {
    let t = expected_processing_time.unwrap_or(10 * estimated) as f64;
    if t <= 1000.0 {
        1.0
    } else if t <= 5000.0 {
        1.0 - 0.3 * (t - 1000.0) / 4000.0
    } else if t <= 30_000.0 {
        0.7 - 0.6 * (t - 5000.0) / 25_000.0
    } else {
        0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_holds() {
        assert!(priority_score(Priority::Urgent) > priority_score(Priority::High));
        assert!(priority_score(Priority::High) > priority_score(Priority::Normal));
        assert!(priority_score(Priority::Normal) > priority_score(Priority::Low));
    }

    #[test]
    fn efficiency_sweet_spot_and_overflow() {
        assert_eq!(efficiency_score(800, 1000.0), 1.0); // u = 0.8, in [0.7, 0.9]
        assert_eq!(efficiency_score(950, 1000.0), 0.9); // u = 0.95
        assert_eq!(efficiency_score(1200, 1000.0), 0.0); // u > 1.0
        assert_eq!(efficiency_score(0, 0.0), 0.0); // availTPM <= 0
        let ramp = efficiency_score(350, 1000.0); // u = 0.35 -> 0.35/0.7
        assert!((ramp - 0.5).abs() < 1e-9);
    }

    #[test]
    fn token_fit_small_fits_modestly_penalized() {
        assert!((token_fit_score(50, 1000.0) - 0.5).abs() < 1e-9); // r = 0.05 -> 10*r
        assert_eq!(token_fit_score(300, 1000.0), 1.0); // r in [0.1, 0.5]
        let high = token_fit_score(800, 1000.0); // r = 0.8
        assert!((high - (1.0 - 0.4 * 0.3)).abs() < 1e-9);
        assert_eq!(token_fit_score(1100, 1000.0), 0.0);
    }

    #[test]
    fn retry_penalty_monotone_and_floored() {
        let mut prev = retry_penalty(0);
        assert_eq!(prev, 1.0);
        for n in 1..=10u32 {
            let cur = retry_penalty(n);
            assert!(cur <= prev);
            assert!(cur >= 0.1);
            prev = cur;
        }
    }

    #[test]
    fn wait_time_urgent_ramps_faster_than_linear() {
        let linear = wait_time_score(5_000.0, Priority::High); // 5s of 30s max -> 1/6
        let urgent = wait_time_score(5_000.0, Priority::Urgent); // 5s of 10s max -> sqrt(0.5)
        assert!((linear - (5_000.0 / 30_000.0)).abs() < 1e-9);
        assert!((urgent - 0.5f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn processing_time_tiers() {
        assert_eq!(processing_time_score(100, Some(500)), 1.0);
        assert_eq!(processing_time_score(100, Some(30_001)), 0.1);
        let mid = processing_time_score(100, Some(3000));
        assert!((mid - (1.0 - 0.3 * 2000.0 / 4000.0)).abs() < 1e-9);
    }
}
