use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ranges::{serde_millis, DurationRange, IdRange};

/// Per-scenario timing, fan-out and row-range parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTuning {
    pub long_running: LongRunningTuning,
    pub lock_contention: LockContentionTuning,
    pub deadlock: DeadlockTuning,
    pub pool_exhaustion: PoolExhaustionTuning,
    pub heavy_write: HeavyWriteTuning,
    pub inefficient_query: InefficientQueryTuning,
    pub slow_scan: SlowScanTuning,
}

impl Default for ScenarioTuning {
    fn default() -> Self {
        default_profile()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRunningTuning {
    /// Users eligible for the long-held row lock
    pub user_ids: IdRange,
    /// How long the lock is held before any write happens
    #[serde(rename = "hold_ms", with = "serde_millis")]
    pub hold: Duration,
    /// Slow writes issued inside the held transaction
    pub updates: usize,
    #[serde(rename = "update_cadence_ms", with = "serde_millis")]
    pub update_cadence: Duration,
    pub cooldown: DurationRange,
    #[serde(rename = "error_backoff_ms", with = "serde_millis")]
    pub error_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockContentionTuning {
    /// Concurrent lock holders per round
    pub workers: usize,
    /// The hot key range every worker draws from
    pub hot_ids: IdRange,
    pub hold: DurationRange,
    pub max_increment: f64,
    /// Lock acquisitions slower than this are reported as lock waits
    #[serde(rename = "lock_wait_threshold_ms", with = "serde_millis")]
    pub lock_wait_threshold: Duration,
    pub cooldown: DurationRange,
    #[serde(rename = "error_backoff_ms", with = "serde_millis")]
    pub error_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockTuning {
    pub first_id: i32,
    pub second_id: i32,
    /// Delay before the second transaction starts
    #[serde(rename = "start_offset_ms", with = "serde_millis")]
    pub start_offset: Duration,
    /// Delay between each side's first and second row lock
    #[serde(rename = "hold_ms", with = "serde_millis")]
    pub hold: Duration,
    pub increment: f64,
    pub cooldown: DurationRange,
    #[serde(rename = "error_backoff_ms", with = "serde_millis")]
    pub error_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolExhaustionTuning {
    /// Concurrent sleepers; should exceed the pool's connection cap
    pub workers: usize,
    /// Server-side sleep each sleeper holds its connection for
    #[serde(rename = "sleep_ms", with = "serde_millis")]
    pub sleep: Duration,
    pub cooldown: DurationRange,
    #[serde(rename = "error_backoff_ms", with = "serde_millis")]
    pub error_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeavyWriteTuning {
    pub inserts: usize,
    pub updates: usize,
    pub user_ids: IdRange,
    /// Audit rows older than this are bulk-deleted at the end of a cycle
    #[serde(rename = "retention_ms", with = "serde_millis")]
    pub retention: Duration,
    pub cooldown: DurationRange,
    #[serde(rename = "error_backoff_ms", with = "serde_millis")]
    pub error_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InefficientQueryTuning {
    #[serde(rename = "per_row_delay_ms", with = "serde_millis")]
    pub per_row_delay: Duration,
    pub cooldown: DurationRange,
    #[serde(rename = "error_backoff_ms", with = "serde_millis")]
    pub error_backoff: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowScanTuning {
    #[serde(rename = "deadline_ms", with = "serde_millis")]
    pub deadline: Duration,
    /// How far back the aggregation window reaches
    #[serde(rename = "window_ms", with = "serde_millis")]
    pub window: Duration,
    pub cooldown: DurationRange,
    #[serde(rename = "error_backoff_ms", with = "serde_millis")]
    pub error_backoff: Duration,
}

/// Get scenario tuning by profile name.
///
/// Returns `None` for an unknown name so the caller can report it.
pub fn get_profile(profile: &str) -> Option<ScenarioTuning> {
    match profile {
        "default" => Some(default_profile()),
        "smoke" => Some(smoke_profile()),
        "stress" => Some(stress_profile()),
        _ => None,
    }
}

pub const PROFILE_NAMES: &[&str] = &["default", "smoke", "stress"];

/// Hand-tuned timings for PostgreSQL with its default one-second
/// `deadlock_timeout`:
/// - 30s row lock hold, 10 slow writes 2s apart
/// - 10 lock holders on users 1-10, holding 5-14s
/// - deadlock pair offset by 0.5s, 2s between row locks
/// - 60 sleepers of 15s against a 50-connection pool
/// - 1000 audit inserts, 500 balance updates per write cycle
/// - 100ms client-side delay per consumed row
/// - 45s deadline on the hourly aggregation
pub fn default_profile() -> ScenarioTuning {
    ScenarioTuning {
        long_running: LongRunningTuning {
            user_ids: IdRange::new(1, 100),
            hold: Duration::from_secs(30),
            updates: 10,
            update_cadence: Duration::from_secs(2),
            cooldown: DurationRange::secs(10, 10),
            error_backoff: Duration::from_secs(5),
        },
        lock_contention: LockContentionTuning {
            workers: 10,
            hot_ids: IdRange::new(1, 10),
            hold: DurationRange::secs(5, 14),
            max_increment: 100.0,
            lock_wait_threshold: Duration::from_millis(250),
            cooldown: DurationRange::secs(15, 15),
            error_backoff: Duration::from_secs(5),
        },
        deadlock: DeadlockTuning {
            first_id: 1,
            second_id: 2,
            start_offset: Duration::from_millis(500),
            hold: Duration::from_secs(2),
            increment: 10.0,
            cooldown: DurationRange::secs(30, 30),
            error_backoff: Duration::from_secs(5),
        },
        pool_exhaustion: PoolExhaustionTuning {
            workers: 60,
            sleep: Duration::from_secs(15),
            cooldown: DurationRange::secs(30, 30),
            error_backoff: Duration::from_secs(5),
        },
        heavy_write: HeavyWriteTuning {
            inserts: 1000,
            updates: 500,
            user_ids: IdRange::new(1, 1000),
            retention: Duration::from_secs(60),
            cooldown: DurationRange::secs(10, 10),
            error_backoff: Duration::from_secs(5),
        },
        inefficient_query: InefficientQueryTuning {
            per_row_delay: Duration::from_millis(100),
            cooldown: DurationRange::secs(20, 20),
            error_backoff: Duration::from_secs(5),
        },
        slow_scan: SlowScanTuning {
            deadline: Duration::from_secs(45),
            window: Duration::from_secs(24 * 60 * 60),
            cooldown: DurationRange::secs(25, 25),
            error_backoff: Duration::from_secs(5),
        },
    }
}

/// Short timers and small fan-outs so every scenario cycles within a
/// couple of minutes of observation. Deadlock timing is kept above the
/// server's detection interval.
pub fn smoke_profile() -> ScenarioTuning {
    let mut tuning = default_profile();

    tuning.long_running.hold = Duration::from_secs(3);
    tuning.long_running.updates = 3;
    tuning.long_running.update_cadence = Duration::from_millis(500);
    tuning.long_running.cooldown = DurationRange::secs(2, 2);
    tuning.long_running.error_backoff = Duration::from_secs(1);

    tuning.lock_contention.workers = 5;
    tuning.lock_contention.hold = DurationRange::millis(500, 1500);
    tuning.lock_contention.cooldown = DurationRange::secs(2, 4);
    tuning.lock_contention.error_backoff = Duration::from_secs(1);

    tuning.deadlock.start_offset = Duration::from_millis(200);
    tuning.deadlock.hold = Duration::from_millis(1500);
    tuning.deadlock.cooldown = DurationRange::secs(3, 3);
    tuning.deadlock.error_backoff = Duration::from_secs(1);

    tuning.pool_exhaustion.workers = 12;
    tuning.pool_exhaustion.sleep = Duration::from_secs(2);
    tuning.pool_exhaustion.cooldown = DurationRange::secs(5, 5);
    tuning.pool_exhaustion.error_backoff = Duration::from_secs(1);

    tuning.heavy_write.inserts = 100;
    tuning.heavy_write.updates = 50;
    tuning.heavy_write.retention = Duration::from_secs(10);
    tuning.heavy_write.cooldown = DurationRange::secs(2, 2);
    tuning.heavy_write.error_backoff = Duration::from_secs(1);

    tuning.inefficient_query.per_row_delay = Duration::from_millis(2);
    tuning.inefficient_query.cooldown = DurationRange::secs(3, 3);
    tuning.inefficient_query.error_backoff = Duration::from_secs(1);

    tuning.slow_scan.deadline = Duration::from_secs(10);
    tuning.slow_scan.cooldown = DurationRange::secs(3, 3);
    tuning.slow_scan.error_backoff = Duration::from_secs(1);

    tuning
}

/// Heavier fan-out and shorter cooldowns:
/// - 25 lock holders on users 1-5
/// - 100 pool sleepers
/// - 5000 inserts / 2500 updates per write cycle
/// - randomized cooldowns so generators drift out of phase
pub fn stress_profile() -> ScenarioTuning {
    let mut tuning = default_profile();

    tuning.long_running.cooldown = DurationRange::secs(2, 8);

    tuning.lock_contention.workers = 25;
    tuning.lock_contention.hot_ids = IdRange::new(1, 5);
    tuning.lock_contention.cooldown = DurationRange::secs(3, 10);

    tuning.deadlock.cooldown = DurationRange::secs(5, 15);

    tuning.pool_exhaustion.workers = 100;
    tuning.pool_exhaustion.cooldown = DurationRange::secs(10, 20);

    tuning.heavy_write.inserts = 5000;
    tuning.heavy_write.updates = 2500;
    tuning.heavy_write.cooldown = DurationRange::secs(2, 6);

    tuning.inefficient_query.cooldown = DurationRange::secs(5, 15);
    tuning.slow_scan.cooldown = DurationRange::secs(5, 15);

    tuning
}
