// Metrics module
// Per-scenario counters, cycle latency histograms, log reports and the scrape endpoint

pub mod collector;
pub mod reporter;
pub mod server;
pub mod types;

pub use collector::{LatencyStats, MetricsCollector};
pub use types::{EngineMetrics, ScenarioEvent, ScenarioMetrics};
