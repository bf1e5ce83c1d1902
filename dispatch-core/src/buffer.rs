//! # Priority Buffer
//!
//! A bounded, mutable staging area the dispatcher uses to batch candidates
//! for scoring and keep them alive via visibility renewal. Buffer entries are
//! *borrowed* views of storage records — storage alone owns the persisted
//! message. If an entry can't be refreshed (its visibility extension fails),
//! it is dropped from the buffer, never mutated through it.

use crate::types::{LLMRequest, MessageScore, Priority, QueueMessage};

struct Entry {
    message: QueueMessage<LLMRequest>,
    priority: Priority,
    score: Option<MessageScore>,
}

/// A bounded collection of in-flight-in-storage candidates, ordered by priority.
pub struct PriorityBuffer {
    capacity: usize,
    entries: Vec<Entry>,
}

impl PriorityBuffer {
    /// Creates an empty buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Vec::new() }
    }

    /// Current number of buffered entries.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Configured maximum capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempts to add `message` at `priority`. If the buffer has room, it is
    /// inserted and the buffer is resorted by priority. If the buffer is
    /// full, the newcomer evicts the current lowest-priority occupant only if
    /// it is strictly higher priority than that occupant (ties never evict).
    /// Returns whether the message was admitted.
    pub fn add(&mut self, message: QueueMessage<LLMRequest>, priority: Priority) -> bool {
        if self.entries.len() < self.capacity {
            self.entries.push(Entry { message, priority, score: None });
            self.resort();
            return true;
        }

        let lowest_idx = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| e.priority)
            .map(|(idx, _)| idx);

        match lowest_idx {
            Some(idx) if priority < self.entries[idx].priority => {
                self.entries[idx] = Entry { message, priority, score: None };
                self.resort();
                true
            }
            _ => false,
        }
    }

    /// Removes the entry with `message_id`, if present.
    pub fn remove(&mut self, message_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.message.id != message_id);
        self.entries.len() != before
    }

    /// Returns up to `limit` entries in priority order (stable among equal
    /// priorities). `limit = None` returns all.
    pub fn peek_by_priority(&self, limit: Option<usize>) -> Vec<QueueMessage<LLMRequest>> {
        let n = limit.unwrap_or(self.entries.len());
        self.entries.iter().take(n).map(|e| e.message.clone()).collect()
    }

    /// Returns up to `limit` entries with an assigned score, sorted by score
    /// descending. Unscored entries are excluded entirely.
    pub fn peek_by_score(&self, limit: Option<usize>) -> Vec<(QueueMessage<LLMRequest>, MessageScore)> {
        let mut scored: Vec<(&QueueMessage<LLMRequest>, &MessageScore)> = self
            .entries
            .iter()
            .filter_map(|e| e.score.as_ref().map(|s| (&e.message, s)))
            .collect();
        scored.sort_by(|a, b| b.1.total.partial_cmp(&a.1.total).unwrap_or(std::cmp::Ordering::Equal));
        let n = limit.unwrap_or(scored.len());
        scored.into_iter().take(n).map(|(m, s)| (m.clone(), s.clone())).collect()
    }

    /// Sets or replaces the score for `message_id`. No-op if not present.
    pub fn update_score(&mut self, message_id: &str, score: MessageScore) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.message.id == message_id) {
            entry.score = Some(score);
        }
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// An unordered snapshot of every buffered message.
    pub fn get_all(&self) -> Vec<QueueMessage<LLMRequest>> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    fn resort(&mut self) {
        self.entries.sort_by_key(|e| e.priority);
    }
}
