//! Drives a PostgreSQL database into contention on purpose: long-held row
//! locks, hot-row lock queues, deadlocks, pool exhaustion, write churn and
//! slow scans, each produced by its own looping generator over one shared
//! connection pool.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod scenarios;
pub mod telemetry;

pub use config::EngineConfig;
pub use engine::{Engine, EngineHandle, Scenario, ScenarioContext};
pub use error::{BootstrapError, ScenarioError};
