//! Metric types

use std::collections::BTreeMap;
use std::fmt;

use crate::engine::GeneratorState;

/// Notable things that happen inside a cycle, beyond its overall outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScenarioEvent {
    Commit,
    Rollback,
    DeadlockAbort,
    LockWait,
    Timeout,
    Restart,
}

impl ScenarioEvent {
    pub const ALL: [ScenarioEvent; 6] = [
        ScenarioEvent::Commit,
        ScenarioEvent::Rollback,
        ScenarioEvent::DeadlockAbort,
        ScenarioEvent::LockWait,
        ScenarioEvent::Timeout,
        ScenarioEvent::Restart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioEvent::Commit => "commit",
            ScenarioEvent::Rollback => "rollback",
            ScenarioEvent::DeadlockAbort => "deadlock_abort",
            ScenarioEvent::LockWait => "lock_wait",
            ScenarioEvent::Timeout => "timeout",
            ScenarioEvent::Restart => "restart",
        }
    }
}

impl fmt::Display for ScenarioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleMetrics {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    pub cycles: CycleMetrics,
    /// Failed cycles keyed by error kind
    pub errors: BTreeMap<&'static str, u64>,
    pub events: BTreeMap<ScenarioEvent, u64>,
    pub state: GeneratorState,
}

impl ScenarioMetrics {
    pub fn event_count(&self, event: ScenarioEvent) -> u64 {
        self.events.get(&event).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub size: u32,
    pub idle: usize,
    /// Pool-exhaustion sleepers currently holding a connection
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    pub scenarios: BTreeMap<&'static str, ScenarioMetrics>,
    pub pool: PoolMetrics,
}

impl EngineMetrics {
    pub fn scenario(&self, name: &str) -> Option<&ScenarioMetrics> {
        self.scenarios.get(name)
    }

    pub fn total_event_count(&self, event: ScenarioEvent) -> u64 {
        self.scenarios.values().map(|s| s.event_count(event)).sum()
    }
}
