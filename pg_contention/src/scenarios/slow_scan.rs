//! Slow aggregation scan scenario - an hourly rollup over the bulk table,
//! bounded by a deadline

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::config::profiles::SlowScanTuning;
use crate::engine::{Scenario, ScenarioContext};
use crate::error::{ScenarioError, SqlxResultExt, StatementFailure};

const HOURLY_ROLLUP: &str = r#"
    SELECT
        DATE_TRUNC('hour', created_at) AS hour,
        COUNT(*) AS count,
        AVG(LENGTH(data))::float8 AS avg_length,
        MAX(random_number) AS max_random
    FROM large_table
    WHERE created_at > NOW() - make_interval(secs => $1)
    GROUP BY DATE_TRUNC('hour', created_at)
    ORDER BY hour DESC
"#;

const OPERATION: &str = "slow_scan.aggregate";

/// One row of the hourly rollup.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct HourlyBucket {
    pub hour: Option<NaiveDateTime>,
    pub count: i64,
    pub avg_length: Option<f64>,
    pub max_random: Option<i32>,
}

pub struct SlowAggregationScan {
    tuning: SlowScanTuning,
}

impl SlowAggregationScan {
    pub const NAME: &'static str = "slow_aggregation_scan";

    pub fn new(tuning: SlowScanTuning) -> Self {
        Self { tuning }
    }

    /// Run the rollup under the configured deadline.
    ///
    /// The deadline is enforced twice: the server cancels the statement via
    /// `statement_timeout`, and the client stops waiting after the same
    /// interval. Either way the caller sees [`ScenarioError::Timeout`].
    pub async fn scan(&self, ctx: &ScenarioContext) -> Result<Vec<HourlyBucket>, ScenarioError> {
        let deadline = self.tuning.deadline;
        let window_secs = self.tuning.window.as_secs_f64();
        let timeout_setting = format!("{}ms", deadline.as_millis().max(1));

        ctx.transaction("slow_scan.begin", move |conn| {
            Box::pin(async move {
                sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                    .bind(timeout_setting)
                    .execute(&mut *conn)
                    .await
                    .during("slow_scan.set_timeout")?;

                let query = sqlx::query_as::<_, HourlyBucket>(HOURLY_ROLLUP)
                    .bind(window_secs)
                    .fetch_all(&mut *conn);

                match tokio::time::timeout(deadline, query).await {
                    Ok(Ok(rows)) => Ok(rows),
                    Ok(Err(e)) => Err(deadline_error(ScenarioError::from_sqlx(OPERATION, e), deadline)),
                    Err(_) => Err(ScenarioError::Timeout {
                        operation: OPERATION,
                        deadline,
                    }),
                }
            })
        })
        .await
    }
}

/// A server-side cancel of the rollup is the deadline firing.
fn deadline_error(error: ScenarioError, deadline: Duration) -> ScenarioError {
    match error.statement_failure() {
        Some(StatementFailure::QueryCanceled) => ScenarioError::Timeout {
            operation: OPERATION,
            deadline,
        },
        _ => error,
    }
}

#[async_trait]
impl Scenario for SlowAggregationScan {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let buckets = self.scan(ctx).await?;
        tracing::info!(rows = buckets.len(), "completed slow aggregation query");
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        self.tuning.cooldown.pick()
    }

    fn error_backoff(&self) -> Duration {
        self.tuning.error_backoff
    }
}
