//! # Storage Adapter Contract
//!
//! The abstract interface the dispatcher core requires of any persistent
//! queue. [`memory::InMemoryStorage`] is the reference implementation; a
//! production deployment would swap in an SQS- or Redis-backed adapter
//! behind the same trait without touching the dispatcher.

pub mod memory;

use async_trait::async_trait;

use crate::error::DispatchResult;
use crate::types::{LLMRequest, Priority, QueueMessage};

/// Coarse queue-level attributes, analogous to SQS's `GetQueueAttributes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueAttributes {
    /// Messages currently visible (eligible for dequeue).
    pub approximate_number_of_messages: u64,
    /// Messages currently in-flight (dequeued but not yet acked or expired).
    pub approximate_number_of_messages_not_visible: u64,
}

/// The storage contract the dispatcher core requires. All operations are
/// asynchronous and may fail with [`crate::error::DispatchError::Storage`].
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Assigns an id and an initial receipt handle, stamps `enqueued_at`, and
    /// makes the message immediately visible.
    async fn enqueue(&self, request: LLMRequest) -> DispatchResult<QueueMessage<LLMRequest>>;

    /// Enqueues a batch of requests. The reference implementation does this as
    /// a true batch (one lock acquisition), not a dressed-up loop.
    async fn batch_enqueue(
        &self,
        requests: Vec<LLMRequest>,
    ) -> DispatchResult<Vec<QueueMessage<LLMRequest>>>;

    /// Returns up to `limit` visible messages. Each returned message is
    /// atomically given a new receipt handle, has its receive count
    /// incremented, and becomes in-flight until `now + visibility_timeout`.
    /// Messages whose visibility has expired are treated as visible again
    /// before this call is evaluated.
    async fn dequeue(
        &self,
        limit: usize,
        visibility_timeout_seconds: u64,
    ) -> DispatchResult<Vec<QueueMessage<LLMRequest>>>;

    /// Removes a message iff `receipt_handle` matches its current in-flight
    /// handle. Fails with `NotFound` otherwise.
    async fn delete_message(&self, receipt_handle: &str) -> DispatchResult<()>;

    /// Deletes every message in `receipt_handles` that still matches its
    /// current in-flight handle; silently skips ones that don't.
    async fn batch_delete(&self, receipt_handles: &[String]) -> DispatchResult<()>;

    /// Extends or shortens the in-flight window for a message. Fails with
    /// `NotFound` if the handle is invalid or already deleted.
    async fn update_visibility_timeout(
        &self,
        receipt_handle: &str,
        seconds: u64,
    ) -> DispatchResult<()>;

    /// Count of currently-visible messages (expired in-flight messages count
    /// as visible).
    async fn get_approximate_message_count(&self) -> DispatchResult<u64>;

    /// Non-consuming read of up to `limit` visible messages matching `priority`.
    async fn peek_messages_by_priority(
        &self,
        priority: Priority,
        limit: usize,
    ) -> DispatchResult<Vec<QueueMessage<LLMRequest>>>;

    /// Coarse queue-level attributes.
    async fn get_queue_attributes(&self) -> DispatchResult<QueueAttributes>;

    /// Drops every record, visible or in-flight.
    async fn purge(&self) -> DispatchResult<()>;
}
