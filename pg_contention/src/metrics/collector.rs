//! Metrics collector - thread-safe collection with cycle latency tracking

use super::types::{EngineMetrics, ScenarioEvent, ScenarioMetrics};
use crate::db::PoolStats;
use crate::engine::GeneratorState;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,
    cycle_latencies: Arc<RwLock<HashMap<&'static str, Histogram<u64>>>>,
    in_flight: Arc<InFlight>,
    start_time: Instant,
}

#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            cycle_latencies: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(InFlight::default()),
            start_time: Instant::now(),
        }
    }

    /// Make a scenario visible in snapshots before its first cycle.
    pub fn register(&self, scenario: &'static str) {
        self.metrics.write().scenarios.entry(scenario).or_default();
    }

    fn with_scenario(&self, scenario: &'static str, f: impl FnOnce(&mut ScenarioMetrics)) {
        let mut metrics = self.metrics.write();
        f(metrics.scenarios.entry(scenario).or_default());
    }

    pub fn cycle_started(&self, scenario: &'static str) {
        self.with_scenario(scenario, |m| m.cycles.started += 1);
    }

    pub fn cycle_completed(&self, scenario: &'static str, duration: Duration) {
        self.with_scenario(scenario, |m| m.cycles.completed += 1);
        self.record_latency(scenario, duration);
    }

    pub fn cycle_failed(&self, scenario: &'static str, kind: &'static str, duration: Duration) {
        self.with_scenario(scenario, |m| {
            m.cycles.failed += 1;
            *m.errors.entry(kind).or_insert(0) += 1;
        });
        // Still record latency for failed cycles
        self.record_latency(scenario, duration);
    }

    fn record_latency(&self, scenario: &'static str, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let mut latencies = self.cycle_latencies.write();
        let hist = latencies.entry(scenario).or_insert_with(|| {
            // 3 significant digits, auto-resizing
            Histogram::new(3).expect("3 significant digits is a valid histogram precision")
        });
        let _ = hist.record(millis);
    }

    pub fn record_event(&self, scenario: &'static str, event: ScenarioEvent) {
        self.with_scenario(scenario, |m| *m.events.entry(event).or_insert(0) += 1);
    }

    pub fn set_state(&self, scenario: &'static str, state: GeneratorState) {
        self.with_scenario(scenario, |m| m.state = state);
    }

    pub fn update_pool(&self, stats: PoolStats) {
        let mut metrics = self.metrics.write();
        metrics.pool.size = stats.size;
        metrics.pool.idle = stats.idle;
    }

    /// A pool-exhaustion sleeper got its connection. Returns the new count.
    pub fn in_flight_inc(&self) -> usize {
        let now = self.in_flight.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight.peak.fetch_max(now, Ordering::SeqCst);
        now
    }

    pub fn in_flight_dec(&self) {
        let _ = self
            .in_flight
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    pub fn get_snapshot(&self) -> EngineMetrics {
        let mut snapshot = self.metrics.read().clone();
        snapshot.pool.in_flight = self.in_flight.current.load(Ordering::SeqCst);
        snapshot.pool.peak_in_flight = self.in_flight.peak.load(Ordering::SeqCst);
        snapshot
    }

    pub fn get_cycle_latency(&self, scenario: &str) -> Option<LatencyStats> {
        let latencies = self.cycle_latencies.read();
        let hist = latencies.get(scenario)?;
        if hist.is_empty() {
            return None;
        }
        Some(LatencyStats {
            min: hist.min(),
            p50: hist.value_at_quantile(0.50),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            max: hist.max(),
            mean: hist.mean(),
            count: hist.len(),
        })
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Cycle latency summary in milliseconds
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub min: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
    pub mean: f64,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_outcomes_are_counted_per_scenario() {
        let collector = MetricsCollector::new();
        collector.cycle_started("lock_contention");
        collector.cycle_completed("lock_contention", Duration::from_millis(120));
        collector.cycle_started("lock_contention");
        collector.cycle_failed("lock_contention", "deadlock", Duration::from_millis(80));
        collector.cycle_started("heavy_write");

        let snapshot = collector.get_snapshot();
        let lock = snapshot.scenario("lock_contention").unwrap();
        assert_eq!(lock.cycles.started, 2);
        assert_eq!(lock.cycles.completed, 1);
        assert_eq!(lock.cycles.failed, 1);
        assert_eq!(lock.errors.get("deadlock"), Some(&1));
        assert_eq!(snapshot.scenario("heavy_write").unwrap().cycles.started, 1);

        let latency = collector.get_cycle_latency("lock_contention").unwrap();
        assert_eq!(latency.count, 2);
        assert!(latency.max >= 120);
        assert!(collector.get_cycle_latency("heavy_write").is_none());
    }

    #[test]
    fn test_latency_recorded_while_a_reader_holds_the_histograms() {
        let collector = MetricsCollector::new();
        collector.cycle_completed("inefficient_query", Duration::from_millis(10));

        let reading = collector.cycle_latencies.read();
        let writer = {
            let collector = collector.clone();
            std::thread::spawn(move || {
                collector.cycle_completed("inefficient_query", Duration::from_millis(20));
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        drop(reading);
        writer.join().unwrap();

        let completed = collector
            .get_snapshot()
            .scenario("inefficient_query")
            .unwrap()
            .cycles
            .completed;
        let latency = collector.get_cycle_latency("inefficient_query").unwrap();
        assert_eq!(completed, 2);
        assert_eq!(latency.count, completed);
    }

    #[test]
    fn test_events_and_state() {
        let collector = MetricsCollector::new();
        collector.register("deadlock_induction");
        assert_eq!(
            collector.get_snapshot().scenario("deadlock_induction").unwrap().state,
            GeneratorState::Idle
        );

        collector.record_event("deadlock_induction", ScenarioEvent::DeadlockAbort);
        collector.record_event("deadlock_induction", ScenarioEvent::Commit);
        collector.record_event("lock_contention", ScenarioEvent::DeadlockAbort);
        collector.set_state("deadlock_induction", GeneratorState::Work);

        let snapshot = collector.get_snapshot();
        let deadlock = snapshot.scenario("deadlock_induction").unwrap();
        assert_eq!(deadlock.state, GeneratorState::Work);
        assert_eq!(deadlock.event_count(ScenarioEvent::Commit), 1);
        assert_eq!(snapshot.total_event_count(ScenarioEvent::DeadlockAbort), 2);
    }

    #[test]
    fn test_in_flight_tracks_peak() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.in_flight_inc(), 1);
        assert_eq!(collector.in_flight_inc(), 2);
        collector.in_flight_dec();
        assert_eq!(collector.in_flight_inc(), 2);
        collector.in_flight_dec();
        collector.in_flight_dec();
        collector.in_flight_dec();

        let pool = collector.get_snapshot().pool;
        assert_eq!(pool.in_flight, 0);
        assert_eq!(pool.peak_in_flight, 2);
    }
}
