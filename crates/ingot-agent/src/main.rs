use std::sync::Arc;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ingot_agent::{
    config::{AgentConfig, build_http_client},
    job_queue::{JobQueue, QueueDocument},
    plugin_manager::PluginManager,
    store::JsonFileStore,
    worker::JobWorker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::from_env();
    let _log_guard = init_tracing(&config)?;

    std::fs::create_dir_all(&config.data_root)?;
    tracing::info!(
        data_root = %config.data_root.display(),
        plugins_dir = %config.plugins_dir.display(),
        "ingot-agent starting"
    );

    let client = build_http_client(&config)?;
    let manager = Arc::new(PluginManager::open(&config, client)?);
    let queue = Arc::new(JobQueue::open(
        Box::new(JsonFileStore::<QueueDocument>::new(config.jobs_file())),
        config.job_history_max,
        config.job_log_max,
    )?);

    match manager.scan_unmanaged() {
        Ok(found) if !found.is_empty() => {
            for p in &found {
                tracing::info!(plugin = %p.name, version = %p.version, file = %p.file_name, "found unmanaged plugin");
            }
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(%err, "scanning plugins directory failed"),
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = JobWorker::new(queue, manager, config.poll_interval).spawn(shutdown_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested; waiting for the current job to finish");
    let _ = shutdown_tx.send(true);
    worker.await?;

    Ok(())
}

fn init_tracing(
    config: &AgentConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "ingot-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}
