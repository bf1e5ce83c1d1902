//! # Metrics Collector
//!
//! An append-only event log with sliding-window aggregation. Retention is
//! both time-bounded (default 5 minutes) and count-bounded (default 10,000
//! events), with opportunistic cleanup triggered whenever the log grows past
//! 120% of the count cap. [`MetricsCollector::report`] is strictly derived
//! from the event log — there is no hidden running-total state to drift out
//! of sync with it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Priority;

const DEFAULT_RETENTION_MS: i64 = 300_000;
const DEFAULT_MAX_EVENTS: usize = 10_000;
const THROUGHPUT_WINDOW_MS: i64 = 60_000;

/// What kind of lifecycle transition a [`MetricEvent`] records.
#[derive(Debug, Clone)]
pub enum MetricEventKind {
    Enqueue { priority: Priority, estimated_tokens: u64 },
    Dequeue,
    Complete { processing_time_ms: u64 },
    Failure { error: String },
}

/// A single append-only log entry.
#[derive(Debug, Clone)]
pub struct MetricEvent {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MetricEventKind,
}

/// A derived throughput figure for the trailing 60-second window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Throughput {
    pub completes_per_minute: f64,
    /// Sum of actual `tokenInfo.estimated` across completes in the window,
    /// per the specification's recommended approach (not the cruder
    /// messages-per-minute heuristic).
    pub tokens_per_minute: f64,
}

/// The strictly-derived report returned by [`MetricsCollector::report`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsReport {
    pub total_messages: u64,
    pub messages_by_priority: HashMap<String, u64>,
    pub oldest_message_age_ms: Option<i64>,
    pub average_wait_time_ms: Option<f64>,
    pub throughput: Throughput,
}

/// Append-only event log with time- and count-bounded retention.
pub struct MetricsCollector {
    retention_ms: i64,
    max_events: usize,
    events: Mutex<VecDeque<MetricEvent>>,
}

impl MetricsCollector {
    /// Builds a collector with the default 5-minute / 10,000-event retention.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION_MS, DEFAULT_MAX_EVENTS)
    }

    /// Builds a collector with custom retention bounds.
    pub fn with_retention(retention_ms: i64, max_events: usize) -> Self {
        Self { retention_ms, max_events, events: Mutex::new(VecDeque::new()) }
    }

    fn push(&self, event: MetricEvent) {
        let mut events = self.events.lock().expect("metrics lock poisoned");
        events.push_back(event);
        if events.len() > self.max_events * 12 / 10 {
            Self::cleanup_locked(&mut events, self.retention_ms, self.max_events);
        }
    }

    fn cleanup_locked(events: &mut VecDeque<MetricEvent>, retention_ms: i64, max_events: usize) {
        let now = Utc::now();
        while let Some(front) = events.front() {
            if (now - front.timestamp).num_milliseconds() > retention_ms {
                events.pop_front();
            } else {
                break;
            }
        }
        while events.len() > max_events {
            events.pop_front();
        }
    }

    /// Records that `message_id` was enqueued with `priority` and `estimated_tokens`.
    pub fn record_enqueue(&self, message_id: impl Into<String>, priority: Priority, estimated_tokens: u64) {
        self.push(MetricEvent {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            kind: MetricEventKind::Enqueue { priority, estimated_tokens },
        });
    }

    /// Records that `message_id` was dequeued (released to a caller).
    pub fn record_dequeue(&self, message_id: impl Into<String>) {
        self.push(MetricEvent { message_id: message_id.into(), timestamp: Utc::now(), kind: MetricEventKind::Dequeue });
    }

    /// Records that `message_id` completed processing in `processing_time_ms`.
    pub fn record_complete(&self, message_id: impl Into<String>, processing_time_ms: u64) {
        self.push(MetricEvent {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            kind: MetricEventKind::Complete { processing_time_ms },
        });
    }

    /// Records that `message_id` failed with `error`.
    pub fn record_failure(&self, message_id: impl Into<String>, error: impl Into<String>) {
        self.push(MetricEvent {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            kind: MetricEventKind::Failure { error: error.into() },
        });
    }

    /// Derives a [`MetricsReport`] from the current event log. Performs no
    /// mutation beyond the same opportunistic cleanup any insert can trigger.
    pub fn report(&self) -> MetricsReport {
        let mut events = self.events.lock().expect("metrics lock poisoned");
        Self::cleanup_locked(&mut events, self.retention_ms, self.max_events);
        let now = Utc::now();

        let mut total_messages = 0u64;
        let mut messages_by_priority: HashMap<String, u64> = HashMap::new();
        let mut oldest_enqueue: Option<DateTime<Utc>> = None;
        let mut enqueue_ts: HashMap<&str, DateTime<Utc>> = HashMap::new();

        for event in events.iter() {
            if let MetricEventKind::Enqueue { priority, .. } = &event.kind {
                total_messages += 1;
                *messages_by_priority.entry(format!("{priority:?}")).or_insert(0) += 1;
                oldest_enqueue = Some(oldest_enqueue.map_or(event.timestamp, |t| t.min(event.timestamp)));
                enqueue_ts.insert(event.message_id.as_str(), event.timestamp);
            }
        }

        let mut wait_sum_ms = 0f64;
        let mut wait_count = 0u64;
        let mut completes_in_window = 0u64;
        let mut tokens_in_window = 0f64;

        for event in events.iter() {
            if let MetricEventKind::Complete { .. } = &event.kind {
                if let Some(enqueued_at) = enqueue_ts.get(event.message_id.as_str()) {
                    wait_sum_ms += (event.timestamp - *enqueued_at).num_milliseconds() as f64;
                    wait_count += 1;
                }
                if (now - event.timestamp).num_milliseconds() <= THROUGHPUT_WINDOW_MS {
                    completes_in_window += 1;
                    if let Some(MetricEventKind::Enqueue { estimated_tokens, .. }) = events
                        .iter()
                        .find(|e| e.message_id == event.message_id)
                        .map(|e| e.kind.clone())
                    {
                        tokens_in_window += estimated_tokens as f64;
                    }
                }
            }
        }

        MetricsReport {
            total_messages,
            messages_by_priority,
            oldest_message_age_ms: oldest_enqueue.map(|t| (now - t).num_milliseconds()),
            average_wait_time_ms: (wait_count > 0).then(|| wait_sum_ms / wait_count as f64),
            throughput: Throughput {
                completes_per_minute: completes_in_window as f64,
                tokens_per_minute: tokens_in_window,
            },
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_enqueues_and_priorities() {
        let collector = MetricsCollector::new();
        collector.record_enqueue("a", Priority::Urgent, 100);
        collector.record_enqueue("b", Priority::Low, 50);
        let report = collector.report();
        assert_eq!(report.total_messages, 2);
        assert_eq!(report.messages_by_priority.get("Urgent"), Some(&1));
        assert_eq!(report.messages_by_priority.get("Low"), Some(&1));
    }

    #[test]
    fn average_wait_time_matches_by_message_id() {
        let collector = MetricsCollector::new();
        collector.record_enqueue("a", Priority::Normal, 100);
        collector.record_complete("a", 250);
        let report = collector.report();
        assert!(report.average_wait_time_ms.is_some());
        assert!(report.average_wait_time_ms.unwrap() >= 0.0);
    }

    #[test]
    fn cleanup_bounds_event_count() {
        let collector = MetricsCollector::with_retention(DEFAULT_RETENTION_MS, 10);
        for i in 0..30 {
            collector.record_enqueue(format!("msg-{i}"), Priority::Normal, 10);
        }
        let report = collector.report();
        assert!(report.total_messages <= 10);
    }
}
