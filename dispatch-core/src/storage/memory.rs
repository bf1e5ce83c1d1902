//! # In-Memory Storage Adapter
//!
//! A reference [`StorageAdapter`] implementation, useful for testing and for
//! embedding the dispatcher without an external queue. State lives behind a
//! single `std::sync::Mutex` around plain `HashMap`s — no `.await` is ever
//! held across the lock, the same discipline `GlobalMemoryGuard` uses for its
//! atomic counters.
//!
//! Two maps are kept: `id -> Record` and `receipt_handle -> id`, where the
//! handle map holds only the *current* handle for a message — prior handles
//! are dropped the instant a new delivery is issued, which is what makes them
//! immediately invalid.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::storage::{QueueAttributes, StorageAdapter};
use crate::types::{LLMRequest, MessageAttributes, Priority, QueueMessage};

struct Record {
    envelope: QueueMessage<LLMRequest>,
    /// `None` while visible; `Some(deadline)` while in-flight.
    visibility_deadline: Option<Instant>,
}

impl Record {
    fn is_visible(&self, now: Instant) -> bool {
        match self.visibility_deadline {
            None => true,
            Some(deadline) => now >= deadline,
        }
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Record>,
    handle_to_id: HashMap<String, String>,
    /// Insertion order, so scans are stable and FIFO among equal priorities.
    order: Vec<String>,
}

impl Inner {
    fn reap_expired(&mut self, now: Instant) {
        for id in &self.order {
            if let Some(record) = self.records.get_mut(id) {
                if let Some(deadline) = record.visibility_deadline {
                    if now >= deadline {
                        record.visibility_deadline = None;
                    }
                }
            }
        }
    }
}

/// In-memory reference [`StorageAdapter`].
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    /// Creates an empty storage adapter.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("in-memory storage lock poisoned")
    }

    fn issue_delivery(inner: &mut Inner, id: &str, visibility_timeout_seconds: u64) -> QueueMessage<LLMRequest> {
        let now_wall = Utc::now();
        let now_mono = Instant::now();
        let new_handle = Uuid::new_v4().to_string();

        let record = inner.records.get_mut(id).expect("id present");
        let old_handle = record.envelope.attributes.receipt_handle.clone();
        inner.handle_to_id.remove(&old_handle);
        let record = inner.records.get_mut(id).expect("id present");
        record.envelope.attributes.receipt_handle = new_handle.clone();
        record.envelope.attributes.receive_count += 1;
        if record.envelope.attributes.first_received_at.is_none() {
            record.envelope.attributes.first_received_at = Some(now_wall);
        }
        record.visibility_deadline = Some(now_mono + Duration::from_secs(visibility_timeout_seconds));
        inner.handle_to_id.insert(new_handle, id.to_string());
        record.envelope.clone()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn enqueue(&self, request: LLMRequest) -> DispatchResult<QueueMessage<LLMRequest>> {
        let id = Uuid::new_v4().to_string();
        let handle = Uuid::new_v4().to_string();
        let envelope = QueueMessage {
            id: id.clone(),
            body: request,
            attributes: MessageAttributes {
                message_id: id.clone(),
                receipt_handle: handle.clone(),
                enqueued_at: Utc::now(),
                receive_count: 0,
                first_received_at: None,
            },
        };

        let mut inner = self.lock();
        inner.handle_to_id.insert(handle, id.clone());
        inner.order.push(id.clone());
        inner.records.insert(id, Record { envelope: envelope.clone(), visibility_deadline: None });
        Ok(envelope)
    }

    async fn batch_enqueue(
        &self,
        requests: Vec<LLMRequest>,
    ) -> DispatchResult<Vec<QueueMessage<LLMRequest>>> {
        let mut inner = self.lock();
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            let id = Uuid::new_v4().to_string();
            let handle = Uuid::new_v4().to_string();
            let envelope = QueueMessage {
                id: id.clone(),
                body: request,
                attributes: MessageAttributes {
                    message_id: id.clone(),
                    receipt_handle: handle.clone(),
                    enqueued_at: Utc::now(),
                    receive_count: 0,
                    first_received_at: None,
                },
            };
            inner.handle_to_id.insert(handle, id.clone());
            inner.order.push(id.clone());
            inner.records.insert(id, Record { envelope: envelope.clone(), visibility_deadline: None });
            out.push(envelope);
        }
        Ok(out)
    }

    async fn dequeue(
        &self,
        limit: usize,
        visibility_timeout_seconds: u64,
    ) -> DispatchResult<Vec<QueueMessage<LLMRequest>>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = Instant::now();
        let mut inner = self.lock();
        inner.reap_expired(now);

        let candidates: Vec<String> = inner
            .order
            .iter()
            .filter(|id| inner.records.get(*id).map(|r| r.is_visible(now)).unwrap_or(false))
            .take(limit)
            .cloned()
            .collect();

        let mut out = Vec::with_capacity(candidates.len());
        for id in candidates {
            out.push(Self::issue_delivery(&mut inner, &id, visibility_timeout_seconds));
        }
        Ok(out)
    }

    async fn delete_message(&self, receipt_handle: &str) -> DispatchResult<()> {
        let mut inner = self.lock();
        match inner.handle_to_id.remove(receipt_handle) {
            Some(id) => {
                inner.records.remove(&id);
                inner.order.retain(|existing| existing != &id);
                Ok(())
            }
            None => Err(DispatchError::not_found(receipt_handle)),
        }
    }

    async fn batch_delete(&self, receipt_handles: &[String]) -> DispatchResult<()> {
        let mut inner = self.lock();
        for handle in receipt_handles {
            if let Some(id) = inner.handle_to_id.remove(handle) {
                inner.records.remove(&id);
                inner.order.retain(|existing| existing != &id);
            }
        }
        Ok(())
    }

    async fn update_visibility_timeout(&self, receipt_handle: &str, seconds: u64) -> DispatchResult<()> {
        let mut inner = self.lock();
        let id = inner
            .handle_to_id
            .get(receipt_handle)
            .cloned()
            .ok_or_else(|| DispatchError::not_found(receipt_handle))?;
        let record = inner.records.get_mut(&id).ok_or_else(|| DispatchError::not_found(receipt_handle))?;
        record.visibility_deadline = Some(Instant::now() + Duration::from_secs(seconds));
        Ok(())
    }

    async fn get_approximate_message_count(&self) -> DispatchResult<u64> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.reap_expired(now);
        Ok(inner.records.values().filter(|r| r.is_visible(now)).count() as u64)
    }

    async fn peek_messages_by_priority(
        &self,
        priority: Priority,
        limit: usize,
    ) -> DispatchResult<Vec<QueueMessage<LLMRequest>>> {
        let now = Instant::now();
        let inner = self.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| r.is_visible(now) && r.envelope.body.priority == priority)
            .take(limit)
            .map(|r| r.envelope.clone())
            .collect())
    }

    async fn get_queue_attributes(&self) -> DispatchResult<QueueAttributes> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.reap_expired(now);
        let mut attrs = QueueAttributes::default();
        for record in inner.records.values() {
            if record.is_visible(now) {
                attrs.approximate_number_of_messages += 1;
            } else {
                attrs.approximate_number_of_messages_not_visible += 1;
            }
        }
        Ok(attrs)
    }

    async fn purge(&self) -> DispatchResult<()> {
        let mut inner = self.lock();
        inner.records.clear();
        inner.handle_to_id.clear();
        inner.order.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenInfo;

    fn sample_request(priority: Priority, estimated: u64) -> LLMRequest {
        LLMRequest {
            id: Uuid::new_v4().to_string(),
            payload: serde_json::json!({"prompt": "hi"}),
            priority,
            token_info: TokenInfo::estimated(estimated),
            expected_processing_time: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dequeue_limit_zero_returns_empty() {
        let storage = InMemoryStorage::new();
        storage.enqueue(sample_request(Priority::Normal, 10)).await.unwrap();
        let out = storage.dequeue(0, 30).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn dequeue_issues_fresh_handle_and_increments_receive_count() {
        let storage = InMemoryStorage::new();
        let enqueued = storage.enqueue(sample_request(Priority::Normal, 10)).await.unwrap();

        let first = storage.dequeue(1, 30).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attributes.receive_count, 1);
        assert_ne!(first[0].attributes.receipt_handle, enqueued.attributes.receipt_handle);

        // Not visible again until the timeout expires.
        let empty = storage.dequeue(1, 30).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn delete_with_stale_handle_is_not_found() {
        let storage = InMemoryStorage::new();
        let enqueued = storage.enqueue(sample_request(Priority::Normal, 10)).await.unwrap();
        let delivered = storage.dequeue(1, 30).await.unwrap();
        assert_eq!(delivered.len(), 1);

        // The pre-dequeue handle is already revoked.
        let err = storage.delete_message(&enqueued.attributes.receipt_handle).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        storage.delete_message(&delivered[0].attributes.receipt_handle).await.unwrap();
        assert_eq!(storage.get_approximate_message_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_visibility_timeout_on_deleted_record_is_not_found() {
        let storage = InMemoryStorage::new();
        storage.enqueue(sample_request(Priority::Normal, 10)).await.unwrap();
        let delivered = storage.dequeue(1, 30).await.unwrap();
        let handle = delivered[0].attributes.receipt_handle.clone();
        storage.delete_message(&handle).await.unwrap();

        let err = storage.update_visibility_timeout(&handle, 10).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_visibility_makes_message_visible_again_with_incremented_receive_count() {
        let storage = InMemoryStorage::new();
        storage.enqueue(sample_request(Priority::Normal, 10)).await.unwrap();
        let first = storage.dequeue(1, 0).await.unwrap();
        assert_eq!(first[0].attributes.receive_count, 1);

        // visibility_timeout_seconds = 0 means the deadline is already in the past.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = storage.dequeue(1, 30).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].attributes.receive_count, 2);
    }

    #[tokio::test]
    async fn peek_by_priority_excludes_in_flight() {
        let storage = InMemoryStorage::new();
        storage.enqueue(sample_request(Priority::Low, 10)).await.unwrap();
        storage.enqueue(sample_request(Priority::Low, 20)).await.unwrap();
        storage.dequeue(1, 30).await.unwrap();

        let visible = storage.peek_messages_by_priority(Priority::Low, 10).await.unwrap();
        assert_eq!(visible.len(), 1);
    }
}
