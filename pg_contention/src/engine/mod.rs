//! Generator runtime: the per-scenario state machine, the context handed to
//! every cycle, and the supervisor that keeps the generators alive.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScenarioError;

mod context;
mod generator;
mod state;
mod supervisor;

pub use context::ScenarioContext;
pub use generator::run_generator;
pub use state::GeneratorState;
pub use supervisor::{Engine, EngineHandle, KeeperExit, ShutdownReport};

/// One contention pattern, run forever by [`run_generator`].
#[async_trait]
pub trait Scenario: Send + Sync {
    /// Stable name used in logs, metrics and the `SCENARIOS` selector.
    fn name(&self) -> &'static str;

    /// Run a single cycle.
    ///
    /// Any error ends the cycle early; the generator logs it and backs off.
    /// Implementations must not leave a transaction open when they return.
    async fn run_cycle(&self, ctx: &ScenarioContext) -> Result<(), ScenarioError>;

    /// Pause after a successful cycle.
    fn cooldown(&self) -> Duration;

    /// Pause after a failed cycle.
    fn error_backoff(&self) -> Duration;
}
