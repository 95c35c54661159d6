//! Log reporter for metrics with periodic summaries

use super::collector::MetricsCollector;
use super::types::ScenarioEvent;
use crate::db::PoolStats;
use sqlx::PgPool;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Log a summary every `every` until `shutdown` fires.
pub async fn start_periodic_reporter(
    collector: MetricsCollector,
    pool: PgPool,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        collector.update_pool(PoolStats::of(&pool));
        log_live_metrics(&collector);
    }
}

/// One line for the pool, one line per scenario.
pub fn log_live_metrics(collector: &MetricsCollector) {
    let metrics = collector.get_snapshot();

    tracing::info!(
        elapsed_secs = collector.elapsed_seconds(),
        pool_size = metrics.pool.size,
        pool_idle = metrics.pool.idle,
        exhaustion_in_flight = metrics.pool.in_flight,
        exhaustion_peak = metrics.pool.peak_in_flight,
        "pool status"
    );

    for (name, scenario) in &metrics.scenarios {
        let p95_ms = collector.get_cycle_latency(name).map(|l| l.p95).unwrap_or(0);
        tracing::info!(
            scenario = %name,
            state = %scenario.state,
            started = scenario.cycles.started,
            completed = scenario.cycles.completed,
            failed = scenario.cycles.failed,
            deadlock_aborts = scenario.event_count(ScenarioEvent::DeadlockAbort),
            lock_waits = scenario.event_count(ScenarioEvent::LockWait),
            timeouts = scenario.event_count(ScenarioEvent::Timeout),
            p95_ms,
            "scenario status"
        );
    }
}

/// Final summary report, logged once after shutdown.
pub fn log_final_report(collector: &MetricsCollector) {
    let metrics = collector.get_snapshot();
    let elapsed = collector.elapsed_seconds();

    let (started, completed, failed) = metrics.scenarios.values().fold((0, 0, 0), |acc, s| {
        (
            acc.0 + s.cycles.started,
            acc.1 + s.cycles.completed,
            acc.2 + s.cycles.failed,
        )
    });

    tracing::info!(
        elapsed_secs = elapsed,
        cycles_started = started,
        cycles_completed = completed,
        cycles_failed = failed,
        deadlock_aborts = metrics.total_event_count(ScenarioEvent::DeadlockAbort),
        lock_waits = metrics.total_event_count(ScenarioEvent::LockWait),
        restarts = metrics.total_event_count(ScenarioEvent::Restart),
        exhaustion_peak = metrics.pool.peak_in_flight,
        "final report"
    );

    for (name, scenario) in &metrics.scenarios {
        let errors = scenario
            .errors
            .iter()
            .map(|(kind, count)| format!("{kind}={count}"))
            .collect::<Vec<_>>()
            .join(",");

        match collector.get_cycle_latency(name) {
            Some(latency) => tracing::info!(
                scenario = %name,
                completed = scenario.cycles.completed,
                failed = scenario.cycles.failed,
                errors = %errors,
                min_ms = latency.min,
                p50_ms = latency.p50,
                p99_ms = latency.p99,
                max_ms = latency.max,
                mean_ms = latency.mean,
                "scenario totals"
            ),
            None => tracing::info!(
                scenario = %name,
                completed = scenario.cycles.completed,
                failed = scenario.cycles.failed,
                errors = %errors,
                "scenario totals"
            ),
        }
    }
}
