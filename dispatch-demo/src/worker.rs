//! Consumer loop: repeatedly asks the dispatcher for the next best candidate
//! and simulates processing it against a downstream model.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::storage::memory::InMemoryStorage;
use dispatch_core::{Dispatcher, RateLimiter};
use rand::Rng;
use tokio::sync::broadcast;

pub async fn run(
    dispatcher: Arc<Dispatcher<InMemoryStorage>>,
    rate_limiter: Arc<dyn RateLimiter>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Worker received shutdown signal.");
                break;
            }
            picked = dispatcher.dequeue(rate_limiter.as_ref()) => {
                match picked {
                    Some(message) => {
                        let request_id = message.message().body.id.clone();
                        let simulated_ms = rand::rng().random_range(20..=250u64);
                        tokio::time::sleep(Duration::from_millis(simulated_ms)).await;

                        if rand::rng().random_bool(0.05) {
                            log::warn!("Simulated failure processing {request_id}");
                            if let Err(err) = message.mark_as_failed("simulated downstream failure").await {
                                log::error!("Failed to record failure for {request_id}: {err}");
                            }
                        } else {
                            log::debug!("Processed {request_id} in {simulated_ms}ms");
                            if let Err(err) = message.mark_as_processed().await {
                                log::error!("Failed to mark {request_id} processed: {err}");
                            }
                        }
                    }
                    None => {
                        tokio::time::sleep(Duration::from_millis(25)).await;
                    }
                }
            }
        }
    }
}
