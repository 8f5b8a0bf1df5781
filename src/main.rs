use std::sync::Arc;

use anyhow::Context as _;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;

use blockd::config::Settings;
use blockd::core::{scheduler, Context};
use blockd::search::EsClient;
use blockd::utils::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    tracing::info!("starting blockd...");

    let settings = Settings::load().context("could not load configuration")?;
    tracing::info!(
        database = %settings.database_url,
        backend = %settings.elasticsearch_url,
        sweep_interval = settings.sweep_interval_seconds,
        "configuration loaded"
    );

    PrometheusBuilder::new()
        .install()
        .context("could not install metrics exporter")?;

    let backend = EsClient::new(&settings.elasticsearch_url)?;
    let version = backend
        .ensure_version()
        .await
        .context("search backend unreachable at startup")?;
    tracing::info!(version = %version, "search backend is up");

    let ctx = Context::initialize(settings, Arc::new(backend)).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(scheduler::run(ctx.clone(), shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("could not listen for shutdown signal")?;
    tracing::info!("shutdown requested, letting the in-flight sweep finish");
    let _ = shutdown_tx.send(true);
    scheduler.await.context("scheduler task panicked")?;
    ctx.store.close().await;

    tracing::info!("blockd stopped");
    Ok(())
}
