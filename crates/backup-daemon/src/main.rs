use std::sync::Arc;

use anyhow::Context;
use backup_core::{Clock, SystemClock};
use backup_daemon::{
    config::{BackupConfig, Cli},
    http,
    metrics::BackupMetrics,
    pacer::IntervalPacer,
    replicator::S3Replicator,
    scheduler::{BackupScheduler, SchedulerSettings},
    snapshot::SqliteSnapshotter,
};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cli.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BackupConfig::from(cli);
    info!(?config, "starting backup daemon");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(BackupMetrics::new(clock.clone())?);
    let replicator = S3Replicator::connect(&config.remote).await;

    let scheduler = BackupScheduler::new(
        SchedulerSettings::from(&config),
        Arc::new(SqliteSnapshotter::new(&config.staging_path)),
        Arc::new(replicator),
        metrics.clone(),
        clock,
        Box::new(IntervalPacer::new(config.period)),
    );
    // no draining on shutdown: an in-flight run is simply dropped
    let backup_task = scheduler.spawn();

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("bind metrics listener on {}", config.listen))?;
    info!(listen = %config.listen, "serving /metrics");

    axum::serve(listener, http::router(metrics))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    backup_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
