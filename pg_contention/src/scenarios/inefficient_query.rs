//! Inefficient query scenario - index-defeating predicates and a client that
//! drains its result set slowly

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::TryStreamExt;

use crate::config::profiles::InefficientQueryTuning;
use crate::engine::{Scenario, ScenarioContext};
use crate::error::{ScenarioError, SqlxResultExt};

const USERS_WITH_ORDER_COUNTS: &str = r#"
    SELECT u.id, u.username, u.email, u.balance::float8 AS balance, u.created_at,
           COUNT(o.id) AS order_count
    FROM users u
    LEFT JOIN orders o ON u.id = o.user_id
    WHERE u.email LIKE '%@example.com'
    GROUP BY u.id
    ORDER BY u.created_at DESC
"#;

const CASE_FOLDED_SCAN: &str = r#"
    SELECT * FROM large_table
    WHERE UPPER(data) LIKE '%ENTRY%'
    AND random_number > 500
    ORDER BY created_at DESC
"#;

#[derive(Debug, sqlx::FromRow)]
struct UserOrderCount {
    id: i32,
    username: String,
    email: Option<String>,
    balance: Option<f64>,
    created_at: Option<NaiveDateTime>,
    order_count: i64,
}

pub struct InefficientQuery {
    tuning: InefficientQueryTuning,
}

impl InefficientQuery {
    pub const NAME: &'static str = "inefficient_query";

    pub fn new(tuning: InefficientQueryTuning) -> Self {
        Self { tuning }
    }

    /// Stream the join+aggregate result, pausing after every row.
    ///
    /// Returns the number of rows processed. The connection stays checked
    /// out for the whole drain.
    pub async fn consume_slowly(&self, ctx: &ScenarioContext) -> Result<usize, ScenarioError> {
        let mut conn = ctx.acquire("inefficient_query.acquire").await?;
        let mut rows = sqlx::query_as::<_, UserOrderCount>(USERS_WITH_ORDER_COUNTS).fetch(&mut *conn);

        let mut processed = 0usize;
        while let Some(row) = ctx
            .guard(async { rows.try_next().await.during("inefficient_query.join") })
            .await?
        {
            tracing::trace!(
                id = row.id,
                username = %row.username,
                email = row.email.as_deref().unwrap_or(""),
                balance = row.balance.unwrap_or_default(),
                created_at = ?row.created_at,
                order_count = row.order_count,
                "processing row"
            );
            processed += 1;
            ctx.sleep(self.tuning.per_row_delay).await?;
        }

        Ok(processed)
    }

    /// Full scan behind a case-folding predicate; the rows are thrown away.
    pub async fn case_folded_scan(&self, ctx: &ScenarioContext) -> Result<u64, ScenarioError> {
        let mut conn = ctx.acquire("inefficient_query.acquire").await?;
        let result = ctx
            .guard(async {
                sqlx::query(CASE_FOLDED_SCAN)
                    .execute(&mut *conn)
                    .await
                    .during("inefficient_query.scan")
            })
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Scenario for InefficientQuery {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let processed = self.consume_slowly(ctx).await?;
        tracing::info!(rows = processed, "processed rows from inefficient query");

        self.case_folded_scan(ctx).await?;
        tracing::debug!("full table scan finished");
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        self.tuning.cooldown.pick()
    }

    fn error_backoff(&self) -> Duration {
        self.tuning.error_backoff
    }
}
