// Scenarios module
// One generator per contention pattern, all sharing the engine's pool

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::Scenario;

pub mod deadlock;
pub mod heavy_write;
pub mod inefficient_query;
pub mod lock_contention;
pub mod long_running;
pub mod pool_exhaustion;
pub mod slow_scan;

pub use deadlock::{DeadlockInduction, PairOutcome, SideOutcome};
pub use heavy_write::{ChurnReport, HeavyWrite};
pub use inefficient_query::InefficientQuery;
pub use lock_contention::{ContentionReport, LockContention};
pub use long_running::LongRunningTransaction;
pub use pool_exhaustion::{BurstReport, PoolExhaustion};
pub use slow_scan::{HourlyBucket, SlowAggregationScan};

/// Every scenario name, in start-up order.
pub const ALL_NAMES: &[&str] = &[
    LongRunningTransaction::NAME,
    LockContention::NAME,
    DeadlockInduction::NAME,
    PoolExhaustion::NAME,
    HeavyWrite::NAME,
    InefficientQuery::NAME,
    SlowAggregationScan::NAME,
];

/// Instantiate the enabled scenarios with the configured tuning.
pub fn build(config: &EngineConfig) -> Vec<Arc<dyn Scenario>> {
    let tuning = &config.tuning;
    let mut scenarios: Vec<Arc<dyn Scenario>> = Vec::new();

    for name in ALL_NAMES {
        if !config.is_enabled(name) {
            tracing::info!(scenario = name, "scenario disabled");
            continue;
        }
        let scenario: Arc<dyn Scenario> = match *name {
            LongRunningTransaction::NAME => {
                Arc::new(LongRunningTransaction::new(tuning.long_running.clone()))
            }
            LockContention::NAME => Arc::new(LockContention::new(tuning.lock_contention.clone())),
            DeadlockInduction::NAME => Arc::new(DeadlockInduction::new(tuning.deadlock.clone())),
            PoolExhaustion::NAME => Arc::new(PoolExhaustion::new(tuning.pool_exhaustion.clone())),
            HeavyWrite::NAME => Arc::new(HeavyWrite::new(tuning.heavy_write.clone())),
            InefficientQuery::NAME => {
                Arc::new(InefficientQuery::new(tuning.inefficient_query.clone()))
            }
            SlowAggregationScan::NAME => {
                Arc::new(SlowAggregationScan::new(tuning.slow_scan.clone()))
            }
            _ => continue,
        };
        scenarios.push(scenario);
    }

    scenarios
}
