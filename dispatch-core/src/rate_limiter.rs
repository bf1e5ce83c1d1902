//! # Rate Limiter Contract
//!
//! The dispatcher consumes a rate limiter but never owns or implements one —
//! the concrete admission policy (fixed window, token bucket, leaky bucket,
//! whatever a given deployment needs) lives outside this crate. The limiter
//! is supplied per call to [`crate::dispatcher::Dispatcher::dequeue`] rather than
//! retained, so different callers can hand the dispatcher different tenants'
//! limiters against the same queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DispatchResult;

/// Why a `canProcess` check was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The requests-per-minute budget is exhausted.
    RpmLimit,
    /// The tokens-per-minute budget can't absorb the estimate.
    TpmLimit,
}

/// Tokens still available along each axis of the rate budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AvailableTokens {
    pub rpm: f64,
    pub tpm: f64,
}

/// The result of asking a rate limiter whether a candidate may proceed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Admission {
    /// Whether the candidate may be released now.
    pub allowed: bool,
    /// Populated when `allowed` is `false`.
    pub reason: Option<DenialReason>,
    /// Estimated milliseconds until the budget would allow this request, if known.
    pub available_in: Option<u64>,
    /// Remaining budget along both axes at the time of the check.
    pub available_tokens: AvailableTokens,
}

/// A single axis (RPM or TPM) of rate-limiter usage, as reported by `getMetrics`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AxisMetrics {
    pub used: f64,
    pub available: f64,
    pub limit: f64,
    pub percentage: f64,
}

/// Aggregate history of token consumption, as reported by `getMetrics`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConsumptionHistory {
    pub count: u64,
    pub average_tokens_per_request: f64,
    pub total_tokens: u64,
    pub estimation_accuracy: f64,
}

/// Debt the limiter has accrued from under/over-estimation, if it tracks one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Compensation {
    pub total_debt: f64,
    pub pending_compensation: f64,
}

/// A snapshot of the rate limiter's internal state, consumed by the score calculator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimiterMetrics {
    pub rpm: AxisMetrics,
    pub tpm: AxisMetrics,
    pub efficiency: f64,
    pub consumption_history: ConsumptionHistory,
    pub compensation: Compensation,
}

/// The admission interface the dispatcher core consumes. Implementations are
/// non-blocking, synchronous-in-spirit queries — no I/O is expected, but the
/// trait is `async` so a networked or actor-backed limiter can still conform.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Asks whether a candidate carrying `estimated_tokens` may be released now.
    async fn can_process(&self, estimated_tokens: u64) -> DispatchResult<Admission>;

    /// Returns a snapshot of the limiter's current metrics.
    async fn get_metrics(&self) -> DispatchResult<RateLimiterMetrics>;
}
