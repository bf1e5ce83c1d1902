//! Rate-aware request dispatcher for LLM workloads.
//!
//! Wires a multi-factor [`scoring::ScoreCalculator`], an SQS-like delivery
//! state machine behind [`storage::StorageAdapter`], and a bounded
//! [`buffer::PriorityBuffer`] into a single [`dispatcher::Dispatcher`] that
//! consumes (but never implements) a [`rate_limiter::RateLimiter`].

pub mod buffer;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod presets;
pub mod rate_limiter;
pub mod scoring;
pub mod storage;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherConfig, ProcessableMessage, QueueMetricsSnapshot};
pub use error::{DispatchError, DispatchResult};
pub use rate_limiter::RateLimiter;
pub use scoring::{ScoreCalculator, Weights};
pub use storage::StorageAdapter;
pub use types::{LLMRequest, Priority, QueueMessage, TokenInfo};
