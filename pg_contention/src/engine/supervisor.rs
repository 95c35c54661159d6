//! Structured supervision of the generator tasks.
//!
//! Every scenario gets a keeper task. The keeper spawns the generator,
//! watches its `JoinHandle`, and restarts it after a panic until the
//! restart budget is spent. Keepers live in one `JoinSet` owned by the
//! [`EngineHandle`], so shutdown can cancel, wait, and finally abort them
//! as a group.

use std::any::Any;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{run_generator, Scenario, ScenarioContext};
use crate::config::SupervisorConfig;
use crate::metrics::{MetricsCollector, ScenarioEvent};

/// Why a keeper stopped watching its generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperExit {
    /// The generator returned after cancellation
    Stopped,
    /// The generator kept panicking and used up its restart budget
    GaveUp { restarts: u32 },
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub exits: Vec<(&'static str, KeeperExit)>,
    /// Keepers still running at the stop deadline
    pub aborted: usize,
}

/// Generators waiting to be started against one pool.
pub struct Engine {
    pool: PgPool,
    metrics: MetricsCollector,
    supervisor: SupervisorConfig,
    scenarios: Vec<Arc<dyn Scenario>>,
}

impl Engine {
    pub fn new(pool: PgPool, metrics: MetricsCollector, supervisor: SupervisorConfig) -> Self {
        Self {
            pool,
            metrics,
            supervisor,
            scenarios: Vec::new(),
        }
    }

    pub fn with_scenario(mut self, scenario: Arc<dyn Scenario>) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn with_scenarios(mut self, scenarios: impl IntoIterator<Item = Arc<dyn Scenario>>) -> Self {
        self.scenarios.extend(scenarios);
        self
    }

    /// Spawn one supervised task per scenario and return immediately.
    pub fn start(self) -> EngineHandle {
        let cancel = CancellationToken::new();
        let mut keepers = JoinSet::new();

        tracing::info!(
            scenarios = self.scenarios.len(),
            max_restarts = self.supervisor.max_restarts,
            "starting scenario engine"
        );

        for scenario in self.scenarios {
            let name = scenario.name();
            self.metrics.register(name);
            let ctx = ScenarioContext::new(name, self.pool.clone(), cancel.clone(), self.metrics.clone());
            keepers.spawn(keep(scenario, ctx, self.supervisor.clone()));
        }

        EngineHandle {
            cancel,
            keepers,
            stop_timeout: self.supervisor.stop_timeout,
        }
    }
}

/// Running engine.
pub struct EngineHandle {
    cancel: CancellationToken,
    keepers: JoinSet<(&'static str, KeeperExit)>,
    stop_timeout: std::time::Duration,
}

impl EngineHandle {
    /// Number of keepers still running.
    pub fn running(&self) -> usize {
        self.keepers.len()
    }

    /// Cancel every generator and wait for them, up to the stop timeout.
    ///
    /// Generators still running at the deadline are aborted; their open
    /// transactions are rolled back by the server when the connections drop.
    pub async fn shutdown(mut self) -> ShutdownReport {
        tracing::info!("shutting down scenario engine");
        self.cancel.cancel();

        let deadline = Instant::now() + self.stop_timeout;
        let mut report = ShutdownReport::default();

        loop {
            match tokio::time::timeout_at(deadline, self.keepers.join_next()).await {
                Ok(Some(joined)) => {
                    if let Some(exit) = keeper_result(joined) {
                        report.exits.push(exit);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    report.aborted = self.keepers.len();
                    tracing::warn!(
                        remaining = report.aborted,
                        timeout_secs = self.stop_timeout.as_secs(),
                        "generators did not stop in time, aborting"
                    );
                    self.keepers.abort_all();
                    while self.keepers.join_next().await.is_some() {}
                    break;
                }
            }
        }

        tracing::info!(stopped = report.exits.len(), aborted = report.aborted, "scenario engine stopped");
        report
    }

    /// Wait until every keeper has exited on its own.
    pub async fn wait(mut self) -> Vec<(&'static str, KeeperExit)> {
        let mut exits = Vec::new();
        while let Some(joined) = self.keepers.join_next().await {
            if let Some(exit) = keeper_result(joined) {
                exits.push(exit);
            }
        }
        exits
    }
}

fn keeper_result(
    joined: Result<(&'static str, KeeperExit), tokio::task::JoinError>,
) -> Option<(&'static str, KeeperExit)> {
    match joined {
        Ok(exit) => Some(exit),
        Err(e) => {
            tracing::error!(error = %e, "keeper task failed");
            None
        }
    }
}

/// Aborts the generator task when its keeper goes away.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn keep(scenario: Arc<dyn Scenario>, ctx: ScenarioContext, config: SupervisorConfig) -> (&'static str, KeeperExit) {
    let name = scenario.name();
    let mut restarts = 0u32;

    loop {
        let handle = tokio::spawn(run_generator(scenario.clone(), ctx.clone()));
        let _abort = AbortOnDrop(handle.abort_handle());

        let panic = match handle.await {
            Ok(()) => return (name, KeeperExit::Stopped),
            Err(e) if e.is_panic() => e.into_panic(),
            Err(e) => {
                tracing::warn!(scenario = name, error = %e, "generator task cancelled");
                return (name, KeeperExit::Stopped);
            }
        };

        tracing::error!(
            scenario = name,
            restarts,
            panic = %panic_message(&*panic),
            "generator panicked"
        );

        if ctx.is_cancelled() {
            return (name, KeeperExit::Stopped);
        }
        if restarts >= config.max_restarts {
            tracing::error!(scenario = name, restarts, "restart budget exhausted, giving up on generator");
            return (name, KeeperExit::GaveUp { restarts });
        }

        restarts += 1;
        ctx.record(ScenarioEvent::Restart);
        if ctx.sleep(config.restart_backoff).await.is_err() {
            return (name, KeeperExit::Stopped);
        }
        tracing::warn!(scenario = name, attempt = restarts, "restarting generator");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
