//! Long-running transaction scenario - hold a row lock far longer than any
//! statement needs, starving other writers of that row

use std::time::Duration;

use async_trait::async_trait;

use crate::config::profiles::LongRunningTuning;
use crate::engine::{Scenario, ScenarioContext};
use crate::error::{ScenarioError, SqlxResultExt};

pub struct LongRunningTransaction {
    tuning: LongRunningTuning,
}

impl LongRunningTransaction {
    pub const NAME: &'static str = "long_running_transaction";

    pub fn new(tuning: LongRunningTuning) -> Self {
        Self { tuning }
    }

    /// Lock a random user, hold the transaction open, then issue the slow
    /// writes. Returns the locked user id.
    pub async fn hold_lock(&self, ctx: &ScenarioContext) -> Result<i32, ScenarioError> {
        let locked_id = self.tuning.user_ids.pick();
        let user_ids = self.tuning.user_ids;
        let hold = self.tuning.hold;
        let updates = self.tuning.updates;
        let cadence = self.tuning.update_cadence;
        let sleeper = ctx.clone();

        ctx.transaction("long_running.begin", move |conn| {
            Box::pin(async move {
                sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
                    .bind(locked_id)
                    .fetch_optional(&mut *conn)
                    .await
                    .during("long_running.lock")?;

                tracing::info!(user_id = locked_id, hold_secs = hold.as_secs(), "holding transaction");
                sleeper.sleep(hold).await?;

                for _ in 0..updates {
                    sqlx::query("UPDATE users SET updated_at = CURRENT_TIMESTAMP WHERE id = $1")
                        .bind(user_ids.pick())
                        .execute(&mut *conn)
                        .await
                        .during("long_running.update")?;
                    sleeper.sleep(cadence).await?;
                }

                Ok(locked_id)
            })
        })
        .await
    }
}

#[async_trait]
impl Scenario for LongRunningTransaction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let user_id = self.hold_lock(ctx).await?;
        tracing::info!(user_id, "long transaction completed");
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        self.tuning.cooldown.pick()
    }

    fn error_backoff(&self) -> Duration {
        self.tuning.error_backoff
    }
}
