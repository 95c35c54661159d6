use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use pg_contention::config::EngineConfig;
use pg_contention::db::{self, PoolStats};
use pg_contention::engine::Engine;
use pg_contention::metrics::{reporter, server, MetricsCollector};
use pg_contention::{scenarios, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::from_env();

    telemetry::init_tracing(&config.logging).context("Failed to initialize tracing")?;
    for warning in &config.warnings {
        tracing::warn!("{warning}");
    }
    config.validate()?;

    tracing::info!("PostgreSQL contention engine starting...");
    tracing::info!(
        profile = %config.profile,
        scenarios = ?config.enabled_scenarios,
        metrics_addr = %config.metrics_addr,
        "configuration loaded"
    );

    let pool = db::connect(&config.database, &config.pool)
        .await
        .context("Failed to connect to database")?;
    db::bootstrap(&pool, &config.seed)
        .await
        .context("Failed to initialize database")?;

    // Setup metrics collector
    let collector = MetricsCollector::new();
    let shutdown = CancellationToken::new();

    let metrics_server = tokio::spawn(server::serve(
        config.metrics_addr,
        collector.clone(),
        shutdown.clone(),
    ));
    let periodic_reporter = tokio::spawn(reporter::start_periodic_reporter(
        collector.clone(),
        pool.clone(),
        config.report_interval,
        shutdown.clone(),
    ));

    let engine = Engine::new(pool.clone(), collector.clone(), config.supervisor.clone())
        .with_scenarios(scenarios::build(&config))
        .start();
    tracing::info!(generators = engine.running(), "all scenarios started, press Ctrl+C to stop");

    wait_for_signal().await?;
    tracing::info!("shutdown requested");

    let report = engine.shutdown().await;
    shutdown.cancel();
    let _ = tokio::join!(metrics_server, periodic_reporter);

    collector.update_pool(PoolStats::of(&pool));
    reporter::log_final_report(&collector);
    if report.aborted > 0 {
        tracing::warn!(aborted = report.aborted, "some generators had to be aborted");
    }

    pool.close().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl+C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}
