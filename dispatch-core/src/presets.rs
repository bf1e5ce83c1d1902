//! # Named Configuration Presets
//!
//! Ready-made [`DispatcherConfig`] factories for the deployment shapes most
//! callers reach for first. Each preset only overrides the fields its name
//! implies; everything else falls back to [`DispatcherConfig::default`].

use crate::dispatcher::DispatcherConfig;
use crate::scoring::Weights;

/// Balanced weights across all six sub-scores. Suitable as a starting point
/// before a deployment has measured which axis actually matters to it.
pub fn default_config() -> DispatcherConfig {
    DispatcherConfig::default()
}

/// Priority dominates almost everything else; efficiency and token fit are
/// effectively disabled.
pub fn simple_priority_config() -> DispatcherConfig {
    DispatcherConfig {
        weights: Weights {
            priority: 0.80,
            efficiency: 0.05,
            wait_time: 0.10,
            retry: 0.05,
            token_fit: 0.0,
            processing_time: 0.0,
        },
        ..DispatcherConfig::default()
    }
}

/// Optimizes for tokens-per-minute utilization: efficiency and token fit
/// dominate, prefetch runs continuously, and a larger candidate pool gives
/// the calculator more room to find a well-fitting request.
pub fn throughput_config() -> DispatcherConfig {
    DispatcherConfig {
        weights: Weights {
            priority: 0.15,
            efficiency: 0.35,
            wait_time: 0.10,
            retry: 0.05,
            token_fit: 0.25,
            processing_time: 0.10,
        },
        enable_prefetch: true,
        buffer_size: 200,
        max_candidates_to_evaluate: 50,
        ..DispatcherConfig::default()
    }
}

/// Weights wait time heavily to bound tail latency across priority tiers,
/// trading off throughput and priority dominance to do it.
pub fn fair_config() -> DispatcherConfig {
    DispatcherConfig {
        weights: Weights {
            priority: 0.20,
            efficiency: 0.10,
            wait_time: 0.50,
            retry: 0.15,
            token_fit: 0.05,
            processing_time: 0.0,
        },
        ..DispatcherConfig::default()
    }
}

/// Inherits the default weights unchanged; runs the prefetch worker with a
/// buffer large enough that the scorer nearly always has a full candidate
/// pool on hand rather than falling back to on-demand single-shot storage
/// pulls.
pub fn prefetching_config() -> DispatcherConfig {
    DispatcherConfig { enable_prefetch: true, buffer_size: 100, ..DispatcherConfig::default() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_priority_weights_dominate() {
        let weights = simple_priority_config().weights;
        assert!(weights.priority > weights.efficiency);
        assert!(weights.priority > weights.wait_time);
        assert_eq!(weights.token_fit, 0.0);
        assert_eq!(weights.processing_time, 0.0);
    }

    #[test]
    fn throughput_favors_efficiency_and_token_fit_and_enables_prefetch() {
        let config = throughput_config();
        assert!(config.weights.efficiency + config.weights.token_fit > config.weights.priority);
        assert_eq!(config.max_candidates_to_evaluate, 50);
        assert!(config.enable_prefetch);
        assert_eq!(config.buffer_size, 200);
    }

    #[test]
    fn fair_favors_wait_time() {
        let weights = fair_config().weights;
        assert!(weights.wait_time > weights.priority);
        assert!(weights.wait_time > weights.efficiency);
    }

    #[test]
    fn prefetching_enables_background_worker_with_default_weights() {
        let config = prefetching_config();
        assert!(config.enable_prefetch);
        assert!(config.buffer_size >= 100);
        assert_eq!(config.weights, Weights::default());
    }
}
