//! Deadlock induction scenario - two transactions take the same two row
//! locks in opposite order so the server has to pick a victim

use std::time::Duration;

use async_trait::async_trait;

use crate::config::profiles::DeadlockTuning;
use crate::engine::{Scenario, ScenarioContext};
use crate::error::{ScenarioError, SqlxResultExt};
use crate::metrics::ScenarioEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideOutcome {
    Committed,
    /// Rolled back; carries the error kind label
    Aborted(&'static str),
}

impl SideOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SideOutcome::Committed)
    }

    pub fn is_deadlock_victim(&self) -> bool {
        matches!(self, SideOutcome::Aborted("deadlock"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairOutcome {
    pub first: SideOutcome,
    pub second: SideOutcome,
}

impl PairOutcome {
    pub fn committed(&self) -> usize {
        [self.first, self.second].iter().filter(|s| s.is_committed()).count()
    }

    /// Exactly one side committed and the other was chosen as the victim.
    pub fn deadlocked(&self) -> bool {
        self.committed() == 1 && (self.first.is_deadlock_victim() || self.second.is_deadlock_victim())
    }
}

pub struct DeadlockInduction {
    tuning: DeadlockTuning,
}

impl DeadlockInduction {
    pub const NAME: &'static str = "deadlock_induction";

    pub fn new(tuning: DeadlockTuning) -> Self {
        Self { tuning }
    }

    /// Run both sides concurrently and report how each ended.
    ///
    /// The aborted side is not retried.
    pub async fn run_pair(&self, ctx: &ScenarioContext) -> Result<PairOutcome, ScenarioError> {
        let t = &self.tuning;
        let (first, second) = tokio::join!(
            lock_in_order(ctx, "first", [t.first_id, t.second_id], Duration::ZERO, t.hold, t.increment),
            lock_in_order(ctx, "second", [t.second_id, t.first_id], t.start_offset, t.hold, t.increment),
        );

        Ok(PairOutcome {
            first: side_outcome(ctx, "first", first)?,
            second: side_outcome(ctx, "second", second)?,
        })
    }
}

fn side_outcome(
    ctx: &ScenarioContext,
    side: &'static str,
    result: Result<(), ScenarioError>,
) -> Result<SideOutcome, ScenarioError> {
    match result {
        Ok(()) => {
            tracing::info!(side, "deadlock transaction committed");
            Ok(SideOutcome::Committed)
        }
        Err(ScenarioError::Cancelled) => Err(ScenarioError::Cancelled),
        Err(e) if e.is_deadlock() => {
            ctx.record(ScenarioEvent::DeadlockAbort);
            tracing::warn!(side, error = %e, "deadlock victim rolled back");
            Ok(SideOutcome::Aborted(e.kind()))
        }
        Err(e) => {
            tracing::warn!(side, kind = e.kind(), error = %e, "deadlock transaction failed");
            Ok(SideOutcome::Aborted(e.kind()))
        }
    }
}

async fn lock_in_order(
    ctx: &ScenarioContext,
    side: &'static str,
    order: [i32; 2],
    start_offset: Duration,
    hold: Duration,
    increment: f64,
) -> Result<(), ScenarioError> {
    ctx.sleep(start_offset).await?;
    let sleeper = ctx.clone();

    ctx.transaction("deadlock.begin", move |conn| {
        Box::pin(async move {
            sqlx::query("UPDATE users SET balance = balance + $1 WHERE id = $2")
                .bind(increment)
                .bind(order[0])
                .execute(&mut *conn)
                .await
                .during("deadlock.first_lock")?;
            tracing::debug!(side, user_id = order[0], "locked first row");

            sleeper.sleep(hold).await?;

            sqlx::query("UPDATE users SET balance = balance + $1 WHERE id = $2")
                .bind(increment)
                .bind(order[1])
                .execute(&mut *conn)
                .await
                .during("deadlock.second_lock")?;
            tracing::debug!(side, user_id = order[1], "locked second row");

            Ok(())
        })
    })
    .await
}

#[async_trait]
impl Scenario for DeadlockInduction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let outcome = self.run_pair(ctx).await?;
        tracing::info!(
            committed = outcome.committed(),
            deadlocked = outcome.deadlocked(),
            "deadlock pair finished"
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_outcome_classification() {
        let victim = PairOutcome {
            first: SideOutcome::Committed,
            second: SideOutcome::Aborted("deadlock"),
        };
        assert_eq!(victim.committed(), 1);
        assert!(victim.deadlocked());

        let both = PairOutcome {
            first: SideOutcome::Committed,
            second: SideOutcome::Committed,
        };
        assert_eq!(both.committed(), 2);
        assert!(!both.deadlocked());

        let unrelated = PairOutcome {
            first: SideOutcome::Aborted("pool"),
            second: SideOutcome::Committed,
        };
        assert!(!unrelated.deadlocked());
    }
}
