use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use studiobook::clock::SystemClock;
use studiobook::config::Config;
use studiobook::engine::Engine;
use studiobook::notify::{run_dispatcher, LogNotifier, Outbox};
use studiobook::reaper;
use studiobook::store::InMemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    studiobook::observability::init(config.metrics_port)?;

    let store = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Arc::new(InMemoryStore::open(&dir.join("studiobook.journal"))?)
        }
        None => Arc::new(InMemoryStore::new()),
    };

    let (outbox, outbox_rx) = Outbox::channel();
    let dispatcher = tokio::spawn(run_dispatcher(outbox_rx, Arc::new(LogNotifier)));

    let engine = Arc::new(Engine::new(
        store.clone(),
        Arc::new(SystemClock),
        config.policy.clone(),
        outbox,
    ));

    let reaper_task = tokio::spawn(reaper::run_reaper(engine.clone(), config.sweep_interval));
    let compactor_task = config.data_dir.as_ref().map(|_| {
        tokio::spawn(reaper::run_compactor(store.clone(), config.compact_threshold))
    });

    info!("studiobook engine running");
    info!(
        "  data_dir: {}",
        config
            .data_dir
            .as_ref()
            .map_or("in-memory".to_string(), |d| d.display().to_string())
    );
    info!("  bookings loaded: {}", store.booking_count());
    info!("  sweep interval: {:?}", config.sweep_interval);
    info!("  deposit policy: {:?}", config.policy.deposit);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    info!("shutdown signal received");

    reaper_task.abort();
    let _ = reaper_task.await;
    if let Some(task) = compactor_task {
        task.abort();
        let _ = task.await;
    }

    // Dropping the last engine handle closes the outbox; wait for queued
    // notifications to drain (up to 10s).
    drop(engine);
    let drain = tokio::time::timeout(std::time::Duration::from_secs(10), dispatcher).await;
    if drain.is_err() {
        tracing::warn!("drain timeout, pending notifications dropped");
    }

    if config.data_dir.is_some()
        && let Err(e) = store.compact().await {
            tracing::error!("final compaction failed: {e}");
        }

    info!("studiobook stopped");
    Ok(())
}
