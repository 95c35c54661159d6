//! Supervisor behaviour with fake scenarios. The pool is connected lazily
//! and never used, so no database is needed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use pg_contention::config::{EngineConfig, SupervisorConfig};
use pg_contention::engine::{Engine, GeneratorState, KeeperExit, Scenario, ScenarioContext};
use pg_contention::error::ScenarioError;
use pg_contention::metrics::{MetricsCollector, ScenarioEvent};
use pg_contention::telemetry::init_test_tracing;

fn lazy_pool() -> sqlx::PgPool {
    let config = EngineConfig::from_lookup(|_| None);
    pg_contention::db::connect_lazy(&config.database, &config.pool).unwrap()
}

fn supervisor(max_restarts: u32) -> SupervisorConfig {
    SupervisorConfig {
        max_restarts,
        restart_backoff: Duration::from_millis(10),
        stop_timeout: Duration::from_secs(5),
    }
}

/// Succeeds every cycle.
struct Counting {
    cycles: Arc<AtomicUsize>,
    cooldown: Duration,
}

#[async_trait]
impl Scenario for Counting {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        ctx.set_state(GeneratorState::Work);
        self.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        self.cooldown
    }

    fn error_backoff(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

/// Fails every cycle; only the error backoff is short.
struct Failing;

#[async_trait]
impl Scenario for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn run_cycle(&self, _ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        Err(ScenarioError::StaleLock { user_id: 7 })
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn error_backoff(&self) -> Duration {
        Duration::from_millis(5)
    }
}

/// Panics on every cycle, or only on the first when `once` is set.
struct Panicking {
    once: bool,
    panicked: AtomicBool,
    cycles: Arc<AtomicUsize>,
}

#[async_trait]
impl Scenario for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn run_cycle(&self, _ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        if !self.once || !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("generator blew up");
        }
        self.cycles.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(5)
    }

    fn error_backoff(&self) -> Duration {
        Duration::from_millis(5)
    }
}

/// Ignores cancellation entirely.
struct Stuck;

#[async_trait]
impl Scenario for Stuck {
    fn name(&self) -> &'static str {
        "stuck"
    }

    async fn run_cycle(&self, _ctx: &ScenarioContext) -> Result<(), ScenarioError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        Duration::ZERO
    }

    fn error_backoff(&self) -> Duration {
        Duration::ZERO
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_generator_loops_until_shutdown() {
    init_test_tracing();
    let cycles = Arc::new(AtomicUsize::new(0));
    let metrics = MetricsCollector::new();

    let engine = Engine::new(lazy_pool(), metrics.clone(), supervisor(0))
        .with_scenario(Arc::new(Counting {
            cycles: cycles.clone(),
            cooldown: Duration::from_millis(5),
        }))
        .start();

    eventually(|| cycles.load(Ordering::SeqCst) >= 3).await;
    let report = engine.shutdown().await;

    assert_eq!(report.exits, vec![("counting", KeeperExit::Stopped)]);
    assert_eq!(report.aborted, 0);

    let snapshot = metrics.get_snapshot();
    let counting = snapshot.scenario("counting").unwrap();
    assert!(counting.cycles.completed >= 3);
    assert_eq!(counting.cycles.failed, 0);
    assert_eq!(counting.state, GeneratorState::Idle);
}

#[tokio::test]
async fn test_failed_cycle_uses_error_backoff() {
    init_test_tracing();
    let metrics = MetricsCollector::new();

    let engine = Engine::new(lazy_pool(), metrics.clone(), supervisor(0))
        .with_scenario(Arc::new(Failing))
        .start();

    // The regular cooldown is an hour, so repeated failures prove the
    // short backoff was used instead.
    eventually(|| {
        metrics
            .get_snapshot()
            .scenario("failing")
            .is_some_and(|s| s.cycles.failed >= 3)
    })
    .await;
    engine.shutdown().await;

    let snapshot = metrics.get_snapshot();
    let failing = snapshot.scenario("failing").unwrap();
    assert_eq!(failing.cycles.completed, 0);
    assert_eq!(failing.errors.get("stale_lock").copied(), Some(failing.cycles.failed));
}

#[tokio::test]
async fn test_panicking_generator_is_restarted() {
    init_test_tracing();
    let cycles = Arc::new(AtomicUsize::new(0));
    let metrics = MetricsCollector::new();

    let engine = Engine::new(lazy_pool(), metrics.clone(), supervisor(3))
        .with_scenario(Arc::new(Panicking {
            once: true,
            panicked: AtomicBool::new(false),
            cycles: cycles.clone(),
        }))
        .start();

    eventually(|| cycles.load(Ordering::SeqCst) >= 2).await;
    let report = engine.shutdown().await;

    assert_eq!(report.exits, vec![("panicking", KeeperExit::Stopped)]);
    let snapshot = metrics.get_snapshot();
    assert_eq!(
        snapshot.scenario("panicking").unwrap().event_count(ScenarioEvent::Restart),
        1
    );
}

#[tokio::test]
async fn test_supervisor_gives_up_after_max_restarts() {
    init_test_tracing();
    let metrics = MetricsCollector::new();

    let engine = Engine::new(lazy_pool(), metrics.clone(), supervisor(2))
        .with_scenario(Arc::new(Panicking {
            once: false,
            panicked: AtomicBool::new(false),
            cycles: Arc::new(AtomicUsize::new(0)),
        }))
        .start();

    let exits = tokio::time::timeout(Duration::from_secs(5), engine.wait())
        .await
        .expect("keeper should give up");

    assert_eq!(exits, vec![("panicking", KeeperExit::GaveUp { restarts: 2 })]);
    assert_eq!(
        metrics
            .get_snapshot()
            .scenario("panicking")
            .unwrap()
            .event_count(ScenarioEvent::Restart),
        2
    );
}

#[tokio::test]
async fn test_shutdown_interrupts_cooldown() {
    init_test_tracing();
    let cycles = Arc::new(AtomicUsize::new(0));

    let engine = Engine::new(lazy_pool(), MetricsCollector::new(), supervisor(0))
        .with_scenario(Arc::new(Counting {
            cycles: cycles.clone(),
            cooldown: Duration::from_secs(3600),
        }))
        .start();

    eventually(|| cycles.load(Ordering::SeqCst) == 1).await;

    let started = Instant::now();
    let report = engine.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.aborted, 0);
    assert_eq!(cycles.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_aborts_generators_that_ignore_cancellation() {
    init_test_tracing();
    let mut config = supervisor(0);
    config.stop_timeout = Duration::from_millis(100);

    let engine = Engine::new(lazy_pool(), MetricsCollector::new(), config)
        .with_scenario(Arc::new(Stuck))
        .with_scenario(Arc::new(Counting {
            cycles: Arc::new(AtomicUsize::new(0)),
            cooldown: Duration::from_millis(5),
        }))
        .start();
    assert_eq!(engine.running(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = engine.shutdown().await;

    assert_eq!(report.aborted, 1);
    assert_eq!(report.exits, vec![("counting", KeeperExit::Stopped)]);
}
