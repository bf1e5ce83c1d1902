use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

mod config;
mod logger;
mod rate_limiter;
mod traffic;
mod worker;

use dispatch_core::presets;
use dispatch_core::storage::memory::InMemoryStorage;
use dispatch_core::{Dispatcher, DispatcherConfig, RateLimiter};
use rate_limiter::FixedWindowRateLimiter;

fn preset_config(name: &str) -> DispatcherConfig {
    match name {
        "simple-priority" => presets::simple_priority_config(),
        "throughput" => presets::throughput_config(),
        "fair" => presets::fair_config(),
        "prefetching" => presets::prefetching_config(),
        _ => presets::default_config(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging(&config.log_dir, &config.log_level)?;

    log::info!("Starting dispatch-demo with preset '{}'", config.preset);

    let storage = Arc::new(InMemoryStorage::new());
    let dispatcher_config = preset_config(&config.preset);
    let dispatcher = Dispatcher::new(storage, dispatcher_config);

    let rate_limiter: Arc<dyn RateLimiter> =
        Arc::new(FixedWindowRateLimiter::new(config.rpm_limit, config.tpm_limit));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

    let traffic_handle = tokio::spawn(traffic::run(
        dispatcher.clone(),
        config.arrival_interval_ms,
        shutdown_tx.subscribe(),
    ));

    let worker_handle = tokio::spawn(worker::run(dispatcher.clone(), rate_limiter, shutdown_tx.subscribe()));

    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = tokio::time::sleep(Duration::from_secs(config.duration_seconds)) => {
            log::info!("Configured duration elapsed, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate()).unwrap();
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
    }

    let _ = shutdown_tx.send(());
    let _ = tokio::try_join!(traffic_handle, worker_handle);

    match dispatcher.get_queue_metrics().await {
        Ok(snapshot) => {
            log::info!(
                "Final metrics: total_messages={} visible={} in_flight={} buffer={}/{}",
                snapshot.metrics_report.total_messages,
                snapshot.storage_attributes.approximate_number_of_messages,
                snapshot.storage_attributes.approximate_number_of_messages_not_visible,
                snapshot.buffer_size,
                snapshot.buffer_capacity,
            );
        }
        Err(err) => log::error!("Failed to read final metrics: {err}"),
    }

    log::info!("Shutdown complete.");
    Ok(())
}
