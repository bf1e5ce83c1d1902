//! # Dispatcher Core
//!
//! Coordinates the storage adapter, the priority buffer, and the score
//! calculator behind a single delivery state machine. The dispatcher never
//! implements rate limiting itself — a [`RateLimiter`] is supplied per
//! [`Dispatcher::dequeue`] call and consulted for both admission and scoring
//! context, the same way `lib_common`'s `core::dispatcher::Dispatcher`
//! consults its memory guard before admitting a new stream rather than
//! tracking budget internally.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::buffer::PriorityBuffer;
use crate::error::{DispatchError, DispatchResult};
use crate::logging::{Logger, LogCrateLogger};
use crate::metrics::{MetricsCollector, MetricsReport};
use crate::rate_limiter::RateLimiter;
use crate::scoring::{CustomScorer, ScoreCalculator, ScoringContext, Weights};
use crate::storage::{QueueAttributes, StorageAdapter};
use crate::types::{InFlightMessage, LLMRequest, Priority, QueueMessage};

/// How many messages a single on-demand storage pull asks for when the
/// buffer is running low and prefetch isn't doing that job in the background.
const ON_DEMAND_PULL_SIZE: usize = 10;
/// Below this buffer occupancy, an on-demand dequeue tops the buffer back up.
const LOW_WATERMARK: usize = 10;

/// Construction-time configuration for a [`Dispatcher`].
pub struct DispatcherConfig {
    /// Maximum number of candidates the priority buffer holds at once.
    pub buffer_size: usize,
    /// Whether a background task keeps the buffer topped up and visibility
    /// windows renewed. When `false`, `dequeue` pulls from storage itself.
    pub enable_prefetch: bool,
    /// How often the prefetch worker wakes up, in milliseconds.
    pub prefetch_interval_ms: u64,
    /// Maximum number of buffered candidates considered per `dequeue` call.
    pub max_candidates_to_evaluate: usize,
    /// A winning candidate's weighted score must meet or exceed this to be
    /// released; otherwise `dequeue` returns `None` even if admission allowed.
    pub min_score_threshold: f64,
    /// Visibility window granted to a freshly dequeued or prefetched message.
    pub visibility_timeout_seconds: u64,
    /// Sub-score weights consumed by the score calculator.
    pub weights: Weights,
    /// Additive, user-supplied scoring components.
    pub custom_scorers: Vec<Arc<dyn CustomScorer>>,
    /// Retention window for the metrics collector's event log, in milliseconds.
    pub metrics_retention_ms: i64,
    /// Sink for internal diagnostics. Defaults to [`LogCrateLogger`].
    pub logger: Arc<dyn Logger>,
}

impl Clone for DispatcherConfig {
    fn clone(&self) -> Self {
        Self {
            buffer_size: self.buffer_size,
            enable_prefetch: self.enable_prefetch,
            prefetch_interval_ms: self.prefetch_interval_ms,
            max_candidates_to_evaluate: self.max_candidates_to_evaluate,
            min_score_threshold: self.min_score_threshold,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
            weights: self.weights,
            custom_scorers: self.custom_scorers.clone(),
            metrics_retention_ms: self.metrics_retention_ms,
            logger: self.logger.clone(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            buffer_size: 50,
            enable_prefetch: false,
            prefetch_interval_ms: 5_000,
            max_candidates_to_evaluate: 20,
            min_score_threshold: 0.1,
            visibility_timeout_seconds: 30,
            weights: Weights::default(),
            custom_scorers: Vec::new(),
            metrics_retention_ms: 300_000,
            logger: Arc::new(LogCrateLogger),
        }
    }
}

/// A point-in-time snapshot of in-flight delivery state, part of
/// [`QueueMetricsSnapshot`].
#[derive(Debug, Clone)]
pub struct InFlightSnapshot {
    pub id: String,
    pub priority: Priority,
    pub in_flight_for_ms: u64,
}

/// Aggregate view returned by [`Dispatcher::get_queue_metrics`].
#[derive(Debug, Clone)]
pub struct QueueMetricsSnapshot {
    pub storage_attributes: QueueAttributes,
    pub metrics_report: MetricsReport,
    pub in_flight: Vec<InFlightSnapshot>,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
}

/// A message released by [`Dispatcher::dequeue`], carrying the handle back to
/// the dispatcher needed to acknowledge, fail, or extend it. Dropping this
/// without calling `mark_as_processed` or `mark_as_failed` leaves the message
/// in-flight until its visibility window lapses and it becomes redeliverable.
pub struct ProcessableMessage<S: StorageAdapter + 'static> {
    dispatcher: Arc<Dispatcher<S>>,
    message: QueueMessage<LLMRequest>,
}

impl<S: StorageAdapter + 'static> ProcessableMessage<S> {
    /// The underlying envelope, including its current receipt handle.
    pub fn message(&self) -> &QueueMessage<LLMRequest> {
        &self.message
    }

    /// Deletes the message from storage and records a `Complete` metric.
    /// Consumes `self` — there is nothing left to acknowledge afterward.
    pub async fn mark_as_processed(self) -> DispatchResult<()> {
        let handle = self.message.attributes.receipt_handle.clone();
        self.dispatcher.storage.delete_message(&handle).await?;
        let started_at = {
            let mut in_flight = self.dispatcher.in_flight.lock().await;
            in_flight.remove(&handle).map(|m| m.started_at)
        };
        if let Some(started_at) = started_at {
            let elapsed_ms = started_at.elapsed().as_millis() as u64;
            self.dispatcher.metrics.record_complete(self.message.id.clone(), elapsed_ms);
        }
        Ok(())
    }

    /// Removes the message from in-flight tracking and records a `Failure`
    /// metric, but leaves it in storage: it becomes redeliverable once its
    /// visibility window lapses, per the storage adapter's own retry policy.
    pub async fn mark_as_failed(self, error: impl Into<String>) -> DispatchResult<()> {
        let handle = self.message.attributes.receipt_handle.clone();
        {
            let mut in_flight = self.dispatcher.in_flight.lock().await;
            in_flight.remove(&handle);
        }
        self.dispatcher.metrics.record_failure(self.message.id.clone(), error.into());
        Ok(())
    }

    /// Extends (or shortens) the in-flight window without releasing the message.
    pub async fn update_visibility(&self, seconds: u64) -> DispatchResult<()> {
        self.dispatcher
            .storage
            .update_visibility_timeout(&self.message.attributes.receipt_handle, seconds)
            .await
    }
}

struct ShutdownGuard {
    shutdown_tx: broadcast::Sender<()>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

/// Rate-aware request dispatcher: owns the priority buffer and in-flight
/// table, delegates persistence to `S`, and consumes a caller-supplied
/// [`RateLimiter`] per dequeue rather than enforcing its own budget.
pub struct Dispatcher<S: StorageAdapter + 'static> {
    storage: Arc<S>,
    config: DispatcherConfig,
    calculator: ScoreCalculator,
    buffer: AsyncMutex<PriorityBuffer>,
    in_flight: AsyncMutex<HashMap<String, InFlightMessage>>,
    metrics: MetricsCollector,
    worker: ShutdownGuard,
}

impl<S: StorageAdapter + 'static> Dispatcher<S> {
    /// Builds a dispatcher over `storage` and starts its prefetch worker if
    /// `config.enable_prefetch` is set. Returned as an `Arc` because every
    /// [`ProcessableMessage`] released by `dequeue` holds a clone of it, and
    /// the prefetch worker, if running, holds one too.
    pub fn new(storage: Arc<S>, config: DispatcherConfig) -> Arc<Self> {
        let calculator = ScoreCalculator::with_custom_scorers(config.weights, config.custom_scorers.clone());
        let (shutdown_tx, _) = broadcast::channel(1);

        let dispatcher = Arc::new(Self {
            storage,
            buffer: AsyncMutex::new(PriorityBuffer::new(config.buffer_size)),
            in_flight: AsyncMutex::new(HashMap::new()),
            metrics: MetricsCollector::with_retention(config.metrics_retention_ms, 10_000),
            calculator,
            worker: ShutdownGuard { shutdown_tx, handle: StdMutex::new(None) },
            config,
        });

        if dispatcher.config.enable_prefetch {
            dispatcher.clone().spawn_prefetch_worker();
        }

        dispatcher
    }

    fn log_warn(&self, message: &str) {
        self.config.logger.warn(message);
    }

    fn spawn_prefetch_worker(self: Arc<Self>) {
        let mut shutdown_rx = self.worker.shutdown_tx.subscribe();
        let interval_ms = self.config.prefetch_interval_ms.max(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        self.prefetch_tick().await;
                    }
                }
            }
        });
        *self.worker.handle.lock().expect("prefetch handle lock poisoned") = Some(handle);
    }

    /// One iteration of the prefetch worker: top the buffer back up from
    /// storage, then renew visibility for everything already buffered. An
    /// entry whose renewal fails (the handle is stale or already deleted) is
    /// dropped from the buffer rather than retried.
    async fn prefetch_tick(&self) {
        let room = {
            let buffer = self.buffer.lock().await;
            self.config.buffer_size.saturating_sub(buffer.size())
        };

        if room > 0 {
            match self.storage.dequeue(room, self.config.visibility_timeout_seconds).await {
                Ok(messages) => {
                    let mut buffer = self.buffer.lock().await;
                    for message in messages {
                        let priority = message.body.priority;
                        buffer.add(message, priority);
                    }
                }
                Err(err) => self.log_warn(&format!("prefetch pull failed: {err}")),
            }
        }

        let handles: Vec<(String, String)> = {
            let buffer = self.buffer.lock().await;
            buffer.get_all().into_iter().map(|m| (m.id, m.attributes.receipt_handle)).collect()
        };

        for (id, handle) in handles {
            let renewed = self
                .storage
                .update_visibility_timeout(&handle, self.config.visibility_timeout_seconds)
                .await;
            if renewed.is_err() {
                let mut buffer = self.buffer.lock().await;
                buffer.remove(&id);
            }
        }
    }

    /// Enqueues a single request and records an `Enqueue` metric.
    pub async fn enqueue(&self, request: LLMRequest) -> DispatchResult<QueueMessage<LLMRequest>> {
        let priority = request.priority;
        let estimated = request.token_info.estimated;
        let message = self.storage.enqueue(request).await?;
        self.metrics.record_enqueue(message.id.clone(), priority, estimated);
        Ok(message)
    }

    /// Enqueues a batch of requests in one storage round trip, recording an
    /// `Enqueue` metric for each.
    pub async fn batch_enqueue(
        &self,
        requests: Vec<LLMRequest>,
    ) -> DispatchResult<Vec<QueueMessage<LLMRequest>>> {
        let meta: Vec<(Priority, u64)> =
            requests.iter().map(|r| (r.priority, r.token_info.estimated)).collect();
        let messages = self.storage.batch_enqueue(requests).await?;
        for (message, (priority, estimated)) in messages.iter().zip(meta) {
            self.metrics.record_enqueue(message.id.clone(), priority, estimated);
        }
        Ok(messages)
    }

    /// Selects and releases the single best candidate admissible under
    /// `rate_limiter`, or `None` if nothing is both admissible and above
    /// `min_score_threshold`. Storage and rate-limiter errors are caught,
    /// logged, and folded into `None` rather than propagated — a dequeue
    /// attempt that can't complete is indistinguishable from an empty queue
    /// to the caller.
    pub async fn dequeue(
        self: &Arc<Self>,
        rate_limiter: &dyn RateLimiter,
    ) -> Option<ProcessableMessage<S>> {
        match self.try_dequeue(rate_limiter).await {
            Ok(result) => result,
            Err(err) => {
                self.log_warn(&format!("dequeue failed: {err}"));
                None
            }
        }
    }

    async fn try_dequeue(
        self: &Arc<Self>,
        rate_limiter: &dyn RateLimiter,
    ) -> DispatchResult<Option<ProcessableMessage<S>>> {
        if !self.config.enable_prefetch {
            self.top_up_buffer_on_demand().await;
        }

        let mut candidates = {
            let buffer = self.buffer.lock().await;
            buffer.peek_by_priority(Some(self.config.max_candidates_to_evaluate))
        };

        let mut from_buffer = true;
        if candidates.is_empty() && !self.config.enable_prefetch {
            candidates = self.storage.dequeue(ON_DEMAND_PULL_SIZE, self.config.visibility_timeout_seconds).await?;
            from_buffer = false;
        }

        if candidates.is_empty() {
            return Ok(None);
        }

        let rate_limiter_metrics = rate_limiter.get_metrics().await.map_err(DispatchError::rate_limiter)?;
        let context = ScoringContext {
            rate_limiter_metrics,
            queue_metrics: Some(self.metrics.report()),
            current_time_ms: Utc::now().timestamp_millis(),
        };

        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            let admission = rate_limiter
                .can_process(candidate.body.token_info.estimated)
                .await
                .map_err(DispatchError::rate_limiter)?;
            if !admission.allowed {
                continue;
            }
            let score = self.calculator.score(candidate, &context);
            let is_better = match best {
                None => true,
                Some((_, best_total)) => score.total > best_total,
            };
            if is_better {
                best = Some((idx, score.total));
            }
        }

        let (winner_idx, winner_total) = match best {
            Some(w) => w,
            None => return Ok(None),
        };

        if winner_total < self.config.min_score_threshold {
            return Ok(None);
        }

        let winner = candidates.swap_remove(winner_idx);

        if from_buffer {
            let mut buffer = self.buffer.lock().await;
            buffer.remove(&winner.id);
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.insert(
                winner.attributes.receipt_handle.clone(),
                InFlightMessage { envelope: winner.clone(), started_at: Instant::now(), priority: winner.body.priority },
            );
        }
        self.metrics.record_dequeue(winner.id.clone());

        Ok(Some(ProcessableMessage { dispatcher: Arc::clone(self), message: winner }))
    }

    async fn top_up_buffer_on_demand(&self) {
        let occupancy = {
            let buffer = self.buffer.lock().await;
            buffer.size()
        };
        if occupancy >= LOW_WATERMARK {
            return;
        }
        let room = self.config.buffer_size.saturating_sub(occupancy).min(ON_DEMAND_PULL_SIZE);
        if room == 0 {
            return;
        }
        match self.storage.dequeue(room, self.config.visibility_timeout_seconds).await {
            Ok(messages) => {
                let mut buffer = self.buffer.lock().await;
                for message in messages {
                    let priority = message.body.priority;
                    buffer.add(message, priority);
                }
            }
            Err(err) => self.log_warn(&format!("on-demand buffer top-up failed: {err}")),
        }
    }

    /// Aggregates storage attributes, the metrics report, in-flight state,
    /// and buffer occupancy into one snapshot.
    pub async fn get_queue_metrics(&self) -> DispatchResult<QueueMetricsSnapshot> {
        let storage_attributes = self.storage.get_queue_attributes().await?;
        let metrics_report = self.metrics.report();
        let in_flight = {
            let in_flight = self.in_flight.lock().await;
            in_flight
                .values()
                .map(|m| InFlightSnapshot {
                    id: m.envelope.id.clone(),
                    priority: m.priority,
                    in_flight_for_ms: m.started_at.elapsed().as_millis() as u64,
                })
                .collect()
        };
        let (buffer_size, buffer_capacity) = {
            let buffer = self.buffer.lock().await;
            (buffer.size(), buffer.capacity())
        };
        Ok(QueueMetricsSnapshot { storage_attributes, metrics_report, in_flight, buffer_size, buffer_capacity })
    }

    /// Stops the prefetch worker (if running), clears the buffer and
    /// in-flight table, and purges storage.
    pub async fn purge(&self) -> DispatchResult<()> {
        self.stop();
        {
            let mut buffer = self.buffer.lock().await;
            buffer.clear();
        }
        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.clear();
        }
        self.storage.purge().await
    }

    /// Signals the prefetch worker to stop and aborts it if it hasn't
    /// noticed the shutdown signal yet. Safe to call more than once, and
    /// safe to call when prefetch was never enabled.
    pub fn stop(&self) {
        let _ = self.worker.shutdown_tx.send(());
        if let Some(handle) = self.worker.handle.lock().expect("prefetch handle lock poisoned").take() {
            handle.abort();
        }
    }
}

impl<S: StorageAdapter + 'static> Drop for Dispatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::{Admission, AvailableTokens, AxisMetrics, Compensation, ConsumptionHistory, RateLimiterMetrics};
    use crate::storage::memory::InMemoryStorage;
    use crate::types::TokenInfo;
    use async_trait::async_trait;

    struct UnlimitedRateLimiter;

    #[async_trait]
    impl RateLimiter for UnlimitedRateLimiter {
        async fn can_process(&self, _estimated_tokens: u64) -> DispatchResult<Admission> {
            Ok(Admission {
                allowed: true,
                reason: None,
                available_in: None,
                available_tokens: AvailableTokens { rpm: 1000.0, tpm: 1_000_000.0 },
            })
        }

        async fn get_metrics(&self) -> DispatchResult<RateLimiterMetrics> {
            Ok(RateLimiterMetrics {
                rpm: AxisMetrics { used: 0.0, available: 1000.0, limit: 1000.0, percentage: 0.0 },
                tpm: AxisMetrics { used: 0.0, available: 1_000_000.0, limit: 1_000_000.0, percentage: 0.0 },
                efficiency: 1.0,
                consumption_history: ConsumptionHistory {
                    count: 0,
                    average_tokens_per_request: 0.0,
                    total_tokens: 0,
                    estimation_accuracy: 1.0,
                },
                compensation: Compensation::default(),
            })
        }
    }

    struct DenyAllRateLimiter;

    #[async_trait]
    impl RateLimiter for DenyAllRateLimiter {
        async fn can_process(&self, _estimated_tokens: u64) -> DispatchResult<Admission> {
            Ok(Admission {
                allowed: false,
                reason: Some(crate::rate_limiter::DenialReason::TpmLimit),
                available_in: Some(5_000),
                available_tokens: AvailableTokens { rpm: 0.0, tpm: 0.0 },
            })
        }

        async fn get_metrics(&self) -> DispatchResult<RateLimiterMetrics> {
            Ok(RateLimiterMetrics {
                rpm: AxisMetrics { used: 1000.0, available: 0.0, limit: 1000.0, percentage: 1.0 },
                tpm: AxisMetrics { used: 1_000_000.0, available: 0.0, limit: 1_000_000.0, percentage: 1.0 },
                efficiency: 1.0,
                consumption_history: ConsumptionHistory {
                    count: 0,
                    average_tokens_per_request: 0.0,
                    total_tokens: 0,
                    estimation_accuracy: 1.0,
                },
                compensation: Compensation::default(),
            })
        }
    }

    fn request(priority: Priority, estimated: u64) -> LLMRequest {
        LLMRequest {
            id: uuid::Uuid::new_v4().to_string(),
            payload: serde_json::json!({}),
            priority,
            token_info: TokenInfo::estimated(estimated),
            expected_processing_time: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    fn test_config() -> DispatcherConfig {
        DispatcherConfig { logger: Arc::new(crate::logging::NullLogger), ..Default::default() }
    }

    #[tokio::test]
    async fn priority_wins_under_no_rate_limit_pressure() {
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(storage, test_config());
        dispatcher.enqueue(request(Priority::Low, 100)).await.unwrap();
        dispatcher.enqueue(request(Priority::Urgent, 100)).await.unwrap();
        dispatcher.enqueue(request(Priority::Normal, 100)).await.unwrap();

        let picked = dispatcher.dequeue(&UnlimitedRateLimiter).await.expect("a candidate");
        assert_eq!(picked.message().body.priority, Priority::Urgent);
        picked.mark_as_processed().await.unwrap();
    }

    #[tokio::test]
    async fn deny_all_rate_limiter_never_admits_anything() {
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(storage, test_config());
        dispatcher.enqueue(request(Priority::Urgent, 100)).await.unwrap();

        assert!(dispatcher.dequeue(&DenyAllRateLimiter).await.is_none());
        let snapshot = dispatcher.get_queue_metrics().await.unwrap();
        assert!(snapshot.in_flight.is_empty());
    }

    #[tokio::test]
    async fn mark_as_failed_releases_in_flight_without_deleting_from_storage() {
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(storage, test_config());
        dispatcher.enqueue(request(Priority::Normal, 50)).await.unwrap();

        let picked = dispatcher.dequeue(&UnlimitedRateLimiter).await.expect("a candidate");
        picked.mark_as_failed("downstream timeout").await.unwrap();

        let snapshot = dispatcher.get_queue_metrics().await.unwrap();
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(snapshot.storage_attributes.approximate_number_of_messages_not_visible, 1);
    }

    #[tokio::test]
    async fn purge_clears_buffer_storage_and_in_flight() {
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(storage, test_config());
        dispatcher.enqueue(request(Priority::Normal, 10)).await.unwrap();
        dispatcher.enqueue(request(Priority::High, 10)).await.unwrap();
        dispatcher.dequeue(&UnlimitedRateLimiter).await.expect("a candidate");

        dispatcher.purge().await.unwrap();
        let snapshot = dispatcher.get_queue_metrics().await.unwrap();
        assert_eq!(snapshot.storage_attributes.approximate_number_of_messages, 0);
        assert_eq!(snapshot.storage_attributes.approximate_number_of_messages_not_visible, 0);
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(snapshot.buffer_size, 0);
    }

    #[tokio::test]
    async fn below_threshold_candidate_is_not_released() {
        let mut config = test_config();
        config.min_score_threshold = 0.9;
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(storage, config);
        dispatcher.enqueue(request(Priority::Low, 100)).await.unwrap();

        assert!(dispatcher.dequeue(&UnlimitedRateLimiter).await.is_none());
    }

    struct FixedBudgetRateLimiter {
        tpm_available: f64,
    }

    #[async_trait]
    impl RateLimiter for FixedBudgetRateLimiter {
        async fn can_process(&self, estimated_tokens: u64) -> DispatchResult<Admission> {
            let allowed = (estimated_tokens as f64) <= self.tpm_available;
            Ok(Admission {
                allowed,
                reason: if allowed { None } else { Some(crate::rate_limiter::DenialReason::TpmLimit) },
                available_in: if allowed { None } else { Some(1_000) },
                available_tokens: AvailableTokens { rpm: 1000.0, tpm: self.tpm_available },
            })
        }

        async fn get_metrics(&self) -> DispatchResult<RateLimiterMetrics> {
            Ok(RateLimiterMetrics {
                rpm: AxisMetrics { used: 0.0, available: 1000.0, limit: 1000.0, percentage: 0.0 },
                tpm: AxisMetrics {
                    used: 0.0,
                    available: self.tpm_available,
                    limit: self.tpm_available,
                    percentage: 0.0,
                },
                efficiency: 1.0,
                consumption_history: ConsumptionHistory {
                    count: 0,
                    average_tokens_per_request: 0.0,
                    total_tokens: 0,
                    estimation_accuracy: 1.0,
                },
                compensation: Compensation::default(),
            })
        }
    }

    #[tokio::test]
    async fn tpm_starvation_blocks_oversized_and_prefers_the_well_fitting_candidate() {
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(storage, test_config());
        dispatcher.enqueue(request(Priority::Normal, 50)).await.unwrap(); // small
        dispatcher.enqueue(request(Priority::Normal, 800)).await.unwrap(); // perfect
        dispatcher.enqueue(request(Priority::Normal, 1200)).await.unwrap(); // large, oversized

        let rate_limiter = FixedBudgetRateLimiter { tpm_available: 1000.0 };
        let picked = dispatcher.dequeue(&rate_limiter).await.expect("a candidate");
        assert_eq!(picked.message().body.token_info.estimated, 800);
        picked.mark_as_processed().await.unwrap();
    }

    #[tokio::test]
    async fn retry_penalty_end_to_end_after_mark_as_failed_and_redelivery() {
        let mut config = test_config();
        config.visibility_timeout_seconds = 0;
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(storage, config);
        dispatcher.enqueue(request(Priority::Normal, 50)).await.unwrap();

        let first = dispatcher.dequeue(&UnlimitedRateLimiter).await.expect("first dequeue");
        assert_eq!(first.message().attributes.receive_count, 1);
        first.mark_as_failed("simulated downstream failure").await.unwrap();

        // visibility_timeout_seconds = 0 means the deadline is already in the past.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let second = dispatcher.dequeue(&UnlimitedRateLimiter).await.expect("redelivered candidate");
        assert_eq!(second.message().attributes.receive_count, 2);
        assert!(crate::scoring::retry_penalty(second.message().attributes.receive_count) <= 0.7);
        second.mark_as_processed().await.unwrap();
    }

    #[tokio::test]
    async fn priority_focused_profile_picks_urgent_over_good_efficiency_low() {
        let mut config = test_config();
        config.weights = Weights {
            priority: 0.9,
            efficiency: 0.02,
            wait_time: 0.02,
            retry: 0.02,
            token_fit: 0.02,
            processing_time: 0.02,
        };
        let storage = Arc::new(InMemoryStorage::new());
        let dispatcher = Dispatcher::new(storage, config);
        dispatcher.enqueue(request(Priority::Low, 800)).await.unwrap(); // good efficiency
        dispatcher.enqueue(request(Priority::Urgent, 50)).await.unwrap(); // poor efficiency

        let rate_limiter = FixedBudgetRateLimiter { tpm_available: 1000.0 };
        let picked = dispatcher.dequeue(&rate_limiter).await.expect("a candidate");
        assert_eq!(picked.message().body.priority, Priority::Urgent);
        picked.mark_as_processed().await.unwrap();
    }
}
