//! Synthetic arrival generator, standing in for real upstream API traffic.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::storage::memory::InMemoryStorage;
use dispatch_core::{Dispatcher, LLMRequest, Priority, TokenInfo};
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::interval;

const PRIORITIES: [Priority; 4] = [Priority::Urgent, Priority::High, Priority::Normal, Priority::Low];

pub async fn run(
    dispatcher: Arc<Dispatcher<InMemoryStorage>>,
    arrival_interval_ms: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_millis(arrival_interval_ms.max(1)));
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Traffic generator received shutdown signal.");
                break;
            }
            _ = ticker.tick() => {
                let request = synthetic_request();
                if let Err(err) = dispatcher.enqueue(request).await {
                    log::warn!("Failed to enqueue synthetic request: {err}");
                }
            }
        }
    }
}

fn synthetic_request() -> LLMRequest {
    let mut rng = rand::rng();
    let priority = PRIORITIES[rng.random_range(0..PRIORITIES.len())];
    let estimated_tokens = rng.random_range(50..=2000u64);

    LLMRequest {
        id: uuid::Uuid::new_v4().to_string(),
        payload: serde_json::json!({ "prompt": "synthetic workload" }),
        priority,
        token_info: TokenInfo::estimated(estimated_tokens),
        expected_processing_time: Some(rng.random_range(200..=4000u64)),
        metadata: None,
        created_at: chrono::Utc::now(),
    }
}
