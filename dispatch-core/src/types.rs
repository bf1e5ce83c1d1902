//! # Shared Data Model
//!
//! The request/message/score types that flow between the storage adapter, the
//! priority buffer, the score calculator, and the dispatcher core. Every type
//! here derives `Serialize`/`Deserialize` so a caller can move them across a
//! process boundary without hand-written adapters.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client-assigned urgency. Lower numeric value means higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Immediate processing.
    Urgent = 0,
    /// Process ahead of `Normal`/`Low`.
    High = 1,
    /// Default priority.
    Normal = 2,
    /// Process only when nothing more urgent is admissible.
    Low = 3,
}

impl Priority {
    /// All variants, in priority order (most to least urgent).
    pub const ALL: [Priority; 4] = [Priority::Urgent, Priority::High, Priority::Normal, Priority::Low];
}

/// Token-cost estimate carried by an [`LLMRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Estimated token cost, supplied by the caller at enqueue time.
    pub estimated: u64,
    /// Actual token cost, filled in by the caller after the LLM call completes.
    pub actual: Option<u64>,
    /// The model the caller expects to invoke, if known.
    pub model: Option<String>,
}

impl TokenInfo {
    /// Builds a `TokenInfo` with only an estimate.
    pub fn estimated(tokens: u64) -> Self {
        Self { estimated: tokens, actual: None, model: None }
    }
}

/// Client-supplied unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMRequest {
    /// Stable, caller-chosen identifier (opaque to the dispatcher).
    pub id: String,
    /// Arbitrary request payload.
    pub payload: Value,
    /// Scheduling priority.
    pub priority: Priority,
    /// Token-cost estimate and bookkeeping.
    pub token_info: TokenInfo,
    /// Caller's estimate of downstream processing time, in milliseconds.
    pub expected_processing_time: Option<u64>,
    /// Free-form metadata the caller wants carried alongside the request.
    pub metadata: Option<HashMap<String, Value>>,
    /// When the caller created the request (wall clock).
    pub created_at: DateTime<Utc>,
}

/// Storage-scoped envelope wrapping a payload `T` with delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage<T> {
    /// Storage-assigned identifier.
    pub id: String,
    /// The wrapped payload.
    pub body: T,
    /// Delivery attributes.
    pub attributes: MessageAttributes,
}

/// Delivery bookkeeping attached to a [`QueueMessage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAttributes {
    /// Storage-assigned message id (mirrors `QueueMessage::id`).
    pub message_id: String,
    /// Opaque token authorizing delete/extend on exactly the current delivery.
    /// Revoked the instant a new delivery is issued.
    pub receipt_handle: String,
    /// When the message was first accepted into storage. Never mutated.
    pub enqueued_at: DateTime<Utc>,
    /// Monotonically increasing count of visible-to-in-flight transitions.
    pub receive_count: u32,
    /// When the message was first dequeued, if ever.
    pub first_received_at: Option<DateTime<Utc>>,
}

/// Internal dispatcher-side tracking for a message that is currently in-flight.
#[derive(Debug, Clone)]
pub struct InFlightMessage {
    /// The envelope as returned by storage at release time.
    pub envelope: QueueMessage<LLMRequest>,
    /// Monotonic instant the message was released to the caller.
    pub started_at: Instant,
    /// The priority of the underlying request, cached for metrics/eviction.
    pub priority: Priority,
}

/// Per-component breakdown of a [`MessageScore`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub priority: f64,
    pub efficiency: f64,
    pub wait_time: f64,
    pub retry: f64,
    pub token_fit: f64,
    pub processing_time: f64,
}

/// The result of scoring a single candidate message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageScore {
    /// Weighted sum of `breakdown`'s components plus any custom scorer contribution.
    pub total: f64,
    /// Unweighted, per-component sub-scores (each normalized to `[0, 1]` before weighting).
    pub breakdown: ScoreBreakdown,
}
