//! Connection pool exhaustion scenario - more sleepers than the pool has
//! connections, so the excess queue on pool admission

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::profiles::PoolExhaustionTuning;
use crate::engine::{Scenario, ScenarioContext};
use crate::error::{ScenarioError, SqlxResultExt};
use crate::metrics::MetricsCollector;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BurstReport {
    pub completed: usize,
    pub failed: usize,
    /// Most sleepers holding a connection at the same moment
    pub peak_in_flight: usize,
    /// Longest time a sleeper queued for its connection
    pub max_acquire_wait: Duration,
}

pub struct PoolExhaustion {
    tuning: PoolExhaustionTuning,
}

impl PoolExhaustion {
    pub const NAME: &'static str = "pool_exhaustion";

    pub fn new(tuning: PoolExhaustionTuning) -> Self {
        Self { tuning }
    }

    /// Launch every sleeper at once and wait for all of them.
    pub async fn run_burst(&self, ctx: &ScenarioContext) -> Result<BurstReport, ScenarioError> {
        let gauge = Arc::new(InFlight::default());
        let mut sleepers = JoinSet::new();

        tracing::info!(
            sleepers = self.tuning.workers,
            pool_max = ctx.pool().options().get_max_connections(),
            "starting pool exhaustion burst"
        );

        for conn_id in 0..self.tuning.workers {
            let ctx = ctx.clone();
            let gauge = gauge.clone();
            let sleep = self.tuning.sleep;
            sleepers.spawn(
                async move { sleep_on_connection(conn_id, &ctx, sleep, gauge).await }.in_current_span(),
            );
        }

        let mut report = BurstReport::default();
        let mut cancelled = false;

        while let Some(joined) = sleepers.join_next().await {
            match joined {
                Ok(Ok(waited)) => {
                    report.completed += 1;
                    report.max_acquire_wait = report.max_acquire_wait.max(waited);
                }
                Ok(Err(ScenarioError::Cancelled)) => cancelled = true,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(kind = e.kind(), error = %e, "pool sleeper failed");
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(error = %e, "pool sleeper aborted");
                }
            }
        }

        if cancelled {
            return Err(ScenarioError::Cancelled);
        }
        report.peak_in_flight = gauge.peak.load(Ordering::SeqCst);
        Ok(report)
    }
}

#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts a sleeper as in flight for as long as it is alive.
struct Slot {
    gauge: Arc<InFlight>,
    metrics: MetricsCollector,
}

impl Slot {
    fn enter(gauge: Arc<InFlight>, metrics: &MetricsCollector) -> Self {
        let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(now, Ordering::SeqCst);
        metrics.in_flight_inc();
        Self {
            gauge,
            metrics: metrics.clone(),
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        self.metrics.in_flight_dec();
    }
}

/// Hold one connection for the length of a server-side sleep.
///
/// Returns how long the sleeper queued for its connection.
async fn sleep_on_connection(
    conn_id: usize,
    ctx: &ScenarioContext,
    sleep: Duration,
    gauge: Arc<InFlight>,
) -> Result<Duration, ScenarioError> {
    let requested = Instant::now();
    let mut conn = ctx.acquire("pool_exhaustion.acquire").await?;
    let waited = requested.elapsed();
    // Declared after `conn` so the slot is released before the connection
    let _slot = Slot::enter(gauge, ctx.metrics());

    tracing::debug!(conn_id, waited_ms = waited.as_millis() as u64, "holding connection");

    ctx.guard(async {
        sqlx::query("SELECT pg_sleep($1), id FROM users LIMIT 1")
            .bind(sleep.as_secs_f64())
            .fetch_optional(&mut *conn)
            .await
            .during("pool_exhaustion.sleep")
    })
    .await?;

    tracing::debug!(conn_id, "query completed");
    Ok(waited)
}

#[async_trait]
impl Scenario for PoolExhaustion {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let report = self.run_burst(ctx).await?;
        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            peak_in_flight = report.peak_in_flight,
            max_acquire_wait_ms = report.max_acquire_wait.as_millis() as u64,
            "pool exhaustion burst finished"
        );
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        self.tuning.cooldown.pick()
    }

    fn error_backoff(&self) -> Duration {
        self.tuning.error_backoff
    }
}
