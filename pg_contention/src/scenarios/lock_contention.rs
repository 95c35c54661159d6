//! Lock contention scenario - many transactions fighting over a few hot rows

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rand::Rng;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::profiles::LockContentionTuning;
use crate::engine::{Scenario, ScenarioContext};
use crate::error::{ScenarioError, SqlxResultExt};
use crate::metrics::ScenarioEvent;

/// Outcome of one fan-out round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentionReport {
    pub attempted: usize,
    pub committed: usize,
    pub failed: usize,
    /// Workers that waited longer than the threshold for their row lock
    pub lock_waits: usize,
}

pub struct LockContention {
    tuning: LockContentionTuning,
}

impl LockContention {
    pub const NAME: &'static str = "lock_contention";

    pub fn new(tuning: LockContentionTuning) -> Self {
        Self { tuning }
    }

    /// Start every worker at once and wait for all of them.
    ///
    /// A failed worker is counted, not propagated; the round only fails
    /// when shutdown interrupts it.
    pub async fn run_round(&self, ctx: &ScenarioContext) -> Result<ContentionReport, ScenarioError> {
        let mut workers = JoinSet::new();
        for worker in 0..self.tuning.workers {
            let ctx = ctx.clone();
            let tuning = self.tuning.clone();
            workers.spawn(async move { hold_and_update(worker, &ctx, &tuning).await }.in_current_span());
        }

        let mut report = ContentionReport {
            attempted: self.tuning.workers,
            ..Default::default()
        };
        let mut cancelled = false;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(waited)) => {
                    report.committed += 1;
                    if waited {
                        report.lock_waits += 1;
                    }
                }
                Ok(Err(ScenarioError::Cancelled)) => cancelled = true,
                Ok(Err(e)) => {
                    report.failed += 1;
                    if e.is_deadlock() {
                        ctx.record(ScenarioEvent::DeadlockAbort);
                    }
                    tracing::warn!(kind = e.kind(), error = %e, "lock contention worker failed");
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(error = %e, "lock contention worker aborted");
                }
            }
        }

        if cancelled {
            return Err(ScenarioError::Cancelled);
        }
        Ok(report)
    }
}

/// Lock one hot row, sit on it, then update it under a version guard.
///
/// Returns whether the lock took longer than the wait threshold.
async fn hold_and_update(
    worker: usize,
    ctx: &ScenarioContext,
    tuning: &LockContentionTuning,
) -> Result<bool, ScenarioError> {
    let target = tuning.hot_ids.pick();
    let hold = tuning.hold.pick();
    let increment = rand::thread_rng().gen::<f64>() * tuning.max_increment;
    let threshold = tuning.lock_wait_threshold;
    let sleeper = ctx.clone();

    ctx.transaction("lock_contention.begin", move |conn| {
        Box::pin(async move {
            let started = Instant::now();
            let guard: Option<NaiveDateTime> =
                sqlx::query_scalar("SELECT updated_at FROM users WHERE id = $1 FOR UPDATE")
                    .bind(target)
                    .fetch_one(&mut *conn)
                    .await
                    .during("lock_contention.lock")?;

            let waited = started.elapsed();
            let contended = waited >= threshold;
            if contended {
                sleeper.record(ScenarioEvent::LockWait);
                tracing::info!(
                    worker,
                    user_id = target,
                    waited_ms = waited.as_millis() as u64,
                    "waited for row lock"
                );
            } else {
                tracing::debug!(worker, user_id = target, "acquired row lock");
            }

            sleeper.sleep(hold).await?;

            // The guard can only have moved if the lock was not really held
            let updated = sqlx::query(
                "UPDATE users SET balance = balance + $1, updated_at = clock_timestamp() \
                 WHERE id = $2 AND updated_at IS NOT DISTINCT FROM $3",
            )
            .bind(increment)
            .bind(target)
            .bind(guard)
            .execute(&mut *conn)
            .await
            .during("lock_contention.update")?
            .rows_affected();

            if updated != 1 {
                return Err(ScenarioError::StaleLock { user_id: target });
            }

            tracing::debug!(worker, user_id = target, "updated locked row");
            Ok(contended)
        })
    })
    .await
}

#[async_trait]
impl Scenario for LockContention {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let report = self.run_round(ctx).await?;
        tracing::info!(
            attempted = report.attempted,
            committed = report.committed,
            failed = report.failed,
            lock_waits = report.lock_waits,
            "lock contention round finished"
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
