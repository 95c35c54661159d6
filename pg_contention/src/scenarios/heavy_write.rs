//! Heavy write scenario - insert, update and bulk-delete churn that leaves
//! dead tuples behind for vacuum to chase

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use sqlx::types::Json;

use crate::config::profiles::HeavyWriteTuning;
use crate::engine::{Scenario, ScenarioContext};
use crate::error::{ScenarioError, SqlxResultExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChurnReport {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

pub struct HeavyWrite {
    tuning: HeavyWriteTuning,
}

impl HeavyWrite {
    pub const NAME: &'static str = "heavy_write";

    pub fn new(tuning: HeavyWriteTuning) -> Self {
        Self { tuning }
    }

    /// One insert batch, one update batch, one retention delete.
    ///
    /// Statements run in autocommit mode on a single connection; the first
    /// failure abandons the rest of the cycle.
    pub async fn churn(&self, ctx: &ScenarioContext) -> Result<ChurnReport, ScenarioError> {
        let mut conn = ctx.acquire("heavy_write.acquire").await?;
        let mut report = ChurnReport::default();

        for _ in 0..self.tuning.inserts {
            let (record_id, old_balance, new_balance) = {
                let mut rng = rand::thread_rng();
                (
                    self.tuning.user_ids.sample(&mut rng),
                    rng.gen::<f64>() * 1000.0,
                    rng.gen::<f64>() * 1000.0,
                )
            };

            report.inserted += ctx
                .guard(async {
                    sqlx::query(
                        "INSERT INTO audit_log (table_name, operation, record_id, old_values, new_values) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind("users")
                    .bind("UPDATE")
                    .bind(record_id)
                    .bind(Json(json!({ "balance": old_balance })))
                    .bind(Json(json!({ "balance": new_balance })))
                    .execute(&mut *conn)
                    .await
                    .during("heavy_write.insert")
                })
                .await?
                .rows_affected();
        }

        for _ in 0..self.tuning.updates {
            let (user_id, balance) = {
                let mut rng = rand::thread_rng();
                (self.tuning.user_ids.sample(&mut rng), rng.gen::<f64>() * 1000.0)
            };

            report.updated += ctx
                .guard(async {
                    sqlx::query("UPDATE users SET balance = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
                        .bind(balance)
                        .bind(user_id)
                        .execute(&mut *conn)
                        .await
                        .during("heavy_write.update")
                })
                .await?
                .rows_affected();
        }

        let retention_secs = self.tuning.retention.as_secs_f64();
        report.deleted = ctx
            .guard(async {
                sqlx::query("DELETE FROM audit_log WHERE created_at < NOW() - make_interval(secs => $1)")
                    .bind(retention_secs)
                    .execute(&mut *conn)
                    .await
                    .during("heavy_write.delete")
            })
            .await?
            .rows_affected();

        Ok(report)
    }
}

#[async_trait]
impl Scenario for HeavyWrite {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        let report = self.churn(ctx).await?;
        tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "completed heavy write cycle"
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
