use thiserror::Error;

/// # Dispatch Error
///
/// Covers the error kinds a caller of [`crate::dispatcher::Dispatcher`] or a
/// [`crate::storage::StorageAdapter`] implementation can encounter. `SelectionBelowThreshold`
/// and `BufferFull` are not represented here: per the delivery contract they are
/// ordinary outcomes (`Option::None`, `bool`), not failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A failure reported by the storage adapter (durability, I/O, serialization).
    #[error("storage error: {0}")]
    Storage(String),

    /// A receipt handle is unknown or no longer matches the in-flight record.
    #[error("receipt handle not found: {0}")]
    NotFound(String),

    /// A failure calling the rate limiter's `canProcess`/`getMetrics`.
    #[error("rate limiter error: {0}")]
    RateLimiter(String),
}

impl DispatchError {
    /// Wraps an arbitrary display-able storage failure.
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Wraps a stale-or-unknown receipt handle.
    pub fn not_found(handle: impl std::fmt::Display) -> Self {
        Self::NotFound(handle.to_string())
    }

    /// Wraps an arbitrary rate-limiter failure.
    pub fn rate_limiter(msg: impl std::fmt::Display) -> Self {
        Self::RateLimiter(msg.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type DispatchResult<T> = Result<T, DispatchError>;
