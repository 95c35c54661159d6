use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;

use super::GeneratorState;
use crate::error::{ScenarioError, SqlxResultExt};
use crate::metrics::{MetricsCollector, ScenarioEvent};

/// Everything a scenario needs to run one cycle.
///
/// The pool is the only shared handle; cloning the context clones the pool
/// handle, never the connections behind it. Every blocking helper here
/// races against the cancellation token and returns
/// [`ScenarioError::Cancelled`] once shutdown is requested.
///
/// Clones share one [`GeneratorState`], so tasks a cycle fans out to move
/// the same state machine as the generator itself.
#[derive(Clone)]
pub struct ScenarioContext {
    name: &'static str,
    pool: PgPool,
    cancel: CancellationToken,
    metrics: MetricsCollector,
    state: Arc<Mutex<GeneratorState>>,
}

impl ScenarioContext {
    pub fn new(
        name: &'static str,
        pool: PgPool,
        cancel: CancellationToken,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            name,
            pool,
            cancel,
            metrics,
            state: Arc::new(Mutex::new(GeneratorState::Idle)),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> GeneratorState {
        *self.state.lock()
    }

    /// Move to `next` and publish it.
    ///
    /// A move that is not an edge of the state machine is logged and
    /// ignored; the call then returns `false`.
    pub fn set_state(&self, next: GeneratorState) -> bool {
        let mut state = self.state.lock();
        let current = *state;
        if !current.can_transition_to(next) {
            tracing::error!(
                scenario = self.name,
                from = %current,
                to = %next,
                "illegal generator transition ignored"
            );
            return false;
        }
        *state = next;
        self.metrics.set_state(self.name, next);
        true
    }

    /// Back to `Idle` from anywhere. Only a generator starting or stopping
    /// does this.
    pub(crate) fn reset_state(&self) {
        let mut state = self.state.lock();
        *state = GeneratorState::Idle;
        self.metrics.set_state(self.name, GeneratorState::Idle);
    }

    pub fn record(&self, event: ScenarioEvent) {
        self.metrics.record_event(self.name, event);
    }

    /// Run `fut` unless shutdown wins the race first.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, ScenarioError>
    where
        F: Future<Output = Result<T, ScenarioError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScenarioError::Cancelled),
            result = fut => result,
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<(), ScenarioError> {
        if duration.is_zero() {
            return if self.is_cancelled() {
                Err(ScenarioError::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ScenarioError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Check a connection out of the shared pool, queueing while it is full.
    pub async fn acquire(&self, operation: &'static str) -> Result<PoolConnection<Postgres>, ScenarioError> {
        self.set_state(GeneratorState::Acquire);
        let conn = self
            .guard(async {
                self.pool
                    .acquire()
                    .await
                    .map_err(|source| ScenarioError::Pool { operation, source })
            })
            .await?;
        self.set_state(GeneratorState::Work);
        Ok(conn)
    }

    pub async fn begin(&self, operation: &'static str) -> Result<Transaction<'static, Postgres>, ScenarioError> {
        self.set_state(GeneratorState::Acquire);
        let tx = self
            .guard(async {
                self.pool
                    .begin()
                    .await
                    .map_err(|source| ScenarioError::Pool { operation, source })
            })
            .await?;
        self.set_state(GeneratorState::Work);
        Ok(tx)
    }

    /// Run `work` inside a transaction.
    ///
    /// Commits when `work` succeeds. On any error, including cancellation
    /// part-way through, a `ROLLBACK` is issued before the error is
    /// returned, so no cycle ever ends with a transaction left open.
    pub async fn transaction<T, F>(&self, operation: &'static str, work: F) -> Result<T, ScenarioError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, ScenarioError>> + Send,
    {
        let mut tx = self.begin(operation).await?;

        let outcome = self.guard(work(&mut *tx)).await;

        match outcome {
            Ok(value) => match tx.commit().await.during(operation) {
                Ok(()) => {
                    self.record(ScenarioEvent::Commit);
                    Ok(value)
                }
                Err(e) => {
                    // A failed COMMIT leaves nothing open on the server
                    self.record(ScenarioEvent::Rollback);
                    Err(e)
                }
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(
                        operation,
                        error = %rollback,
                        "rollback failed, connection will be discarded"
                    );
                }
                tracing::debug!(operation, kind = e.kind(), "transaction rolled back");
                self.record(ScenarioEvent::Rollback);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn lazy_context() -> ScenarioContext {
        let config = EngineConfig::from_lookup(|_| None);
        let pool = crate::db::connect_lazy(&config.database, &config.pool).unwrap();
        ScenarioContext::new("test", pool, CancellationToken::new(), MetricsCollector::new())
    }

    #[tokio::test]
    async fn test_sleep_returns_cancelled_after_shutdown() {
        let ctx = lazy_context();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let result = ctx.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(ScenarioError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_guard_prefers_cancellation() {
        let ctx = lazy_context();
        ctx.cancellation_token().cancel();
        let result = ctx.guard(async { Ok::<_, ScenarioError>(1) }).await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_state_moves_only_along_legal_edges() {
        let ctx = lazy_context();
        assert!(ctx.set_state(GeneratorState::Acquire));
        assert!(ctx.set_state(GeneratorState::Work));

        // Work has to pass through Cooldown before Idle
        assert!(!ctx.set_state(GeneratorState::Idle));
        assert_eq!(ctx.state(), GeneratorState::Work);
        assert_eq!(
            ctx.metrics().get_snapshot().scenario("test").unwrap().state,
            GeneratorState::Work
        );

        let fanned_out = ctx.clone();
        assert!(fanned_out.set_state(GeneratorState::Cooldown));
        assert_eq!(ctx.state(), GeneratorState::Cooldown);
        assert!(!ctx.set_state(GeneratorState::Work));
        assert!(ctx.set_state(GeneratorState::Idle));
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let ctx = lazy_context();
        ctx.set_state(GeneratorState::Acquire);
        ctx.set_state(GeneratorState::Work);
        ctx.reset_state();
        assert_eq!(ctx.state(), GeneratorState::Idle);
        assert_eq!(
            ctx.metrics().get_snapshot().scenario("test").unwrap().state,
            GeneratorState::Idle
        );
    }

    #[tokio::test]
    async fn test_zero_sleep_is_immediate() {
        let ctx = lazy_context();
        assert!(ctx.sleep(Duration::ZERO).await.is_ok());
    }
}
