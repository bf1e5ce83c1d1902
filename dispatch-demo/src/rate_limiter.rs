//! A toy fixed-window rate limiter, standing in for a production limiter
//! (token bucket backed by Redis, a provider SDK's own budget, etc). Resets
//! both axes every 60 seconds; makes no attempt at sub-window smoothing.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use dispatch_core::error::DispatchResult;
use dispatch_core::rate_limiter::{
    Admission, AvailableTokens, AxisMetrics, Compensation, ConsumptionHistory, DenialReason, RateLimiter,
    RateLimiterMetrics,
};

const WINDOW: std::time::Duration = std::time::Duration::from_secs(60);

struct Window {
    started_at: Instant,
    requests_used: f64,
    tokens_used: f64,
    request_count: u64,
    total_tokens: u64,
}

impl Window {
    fn fresh() -> Self {
        Self { started_at: Instant::now(), requests_used: 0.0, tokens_used: 0.0, request_count: 0, total_tokens: 0 }
    }

    fn roll_if_expired(&mut self) {
        if self.started_at.elapsed() >= WINDOW {
            *self = Self::fresh();
        }
    }
}

pub struct FixedWindowRateLimiter {
    rpm_limit: f64,
    tpm_limit: f64,
    window: Mutex<Window>,
}

impl FixedWindowRateLimiter {
    pub fn new(rpm_limit: f64, tpm_limit: f64) -> Self {
        Self { rpm_limit, tpm_limit, window: Mutex::new(Window::fresh()) }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn can_process(&self, estimated_tokens: u64) -> DispatchResult<Admission> {
        let mut window = self.window.lock().expect("rate limiter lock poisoned");
        window.roll_if_expired();

        let rpm_available = (self.rpm_limit - window.requests_used).max(0.0);
        let tpm_available = (self.tpm_limit - window.tokens_used).max(0.0);

        if rpm_available < 1.0 {
            return Ok(Admission {
                allowed: false,
                reason: Some(DenialReason::RpmLimit),
                available_in: Some(window_remaining_ms(&window)),
                available_tokens: AvailableTokens { rpm: rpm_available, tpm: tpm_available },
            });
        }
        if (estimated_tokens as f64) > tpm_available {
            return Ok(Admission {
                allowed: false,
                reason: Some(DenialReason::TpmLimit),
                available_in: Some(window_remaining_ms(&window)),
                available_tokens: AvailableTokens { rpm: rpm_available, tpm: tpm_available },
            });
        }

        window.requests_used += 1.0;
        window.tokens_used += estimated_tokens as f64;
        window.request_count += 1;
        window.total_tokens += estimated_tokens;

        Ok(Admission {
            allowed: true,
            reason: None,
            available_in: None,
            available_tokens: AvailableTokens {
                rpm: (self.rpm_limit - window.requests_used).max(0.0),
                tpm: (self.tpm_limit - window.tokens_used).max(0.0),
            },
        })
    }

    async fn get_metrics(&self) -> DispatchResult<RateLimiterMetrics> {
        let mut window = self.window.lock().expect("rate limiter lock poisoned");
        window.roll_if_expired();

        let rpm_available = (self.rpm_limit - window.requests_used).max(0.0);
        let tpm_available = (self.tpm_limit - window.tokens_used).max(0.0);
        let average_tokens_per_request =
            if window.request_count > 0 { window.total_tokens as f64 / window.request_count as f64 } else { 0.0 };

        Ok(RateLimiterMetrics {
            rpm: AxisMetrics {
                used: window.requests_used,
                available: rpm_available,
                limit: self.rpm_limit,
                percentage: window.requests_used / self.rpm_limit.max(1.0),
            },
            tpm: AxisMetrics {
                used: window.tokens_used,
                available: tpm_available,
                limit: self.tpm_limit,
                percentage: window.tokens_used / self.tpm_limit.max(1.0),
            },
            efficiency: if self.tpm_limit > 0.0 { window.tokens_used / self.tpm_limit } else { 0.0 },
            consumption_history: ConsumptionHistory {
                count: window.request_count,
                average_tokens_per_request,
                total_tokens: window.total_tokens,
                estimation_accuracy: 1.0,
            },
            compensation: Compensation::default(),
        })
    }
}

fn window_remaining_ms(window: &Window) -> u64 {
    WINDOW.saturating_sub(window.started_at.elapsed()).as_millis() as u64
}
