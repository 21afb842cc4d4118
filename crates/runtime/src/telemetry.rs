//! Region timing accumulation.
//!
//! `enter` subtracts the timestamp, `exit` adds it; a balanced pair nets
//! the elapsed microseconds. Wrapping arithmetic keeps partially-entered
//! regions harmless until their exit lands.

use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

/// Reserved engine-internal region ids; user regions start after them.
pub mod region {
    pub const START: u64 = 0;
    pub const CODEGEN: u64 = 1;
    pub const VARIANTS: u64 = 2;
    pub const CACHE_HIT: u64 = 3;
}

/// Monotonic microsecond clock. The hardware counter library backing
/// production deployments stays behind this trait.
pub trait MicrosClock: Send + Sync {
    fn now_us(&self) -> u64;
}

pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrosClock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionStat {
    pub name: String,
    /// Net accumulated duration; meaningful once enters and exits
    /// balance.
    pub duration_us: u64,
    /// Number of `enter` events.
    pub events: u64,
}

#[derive(Debug, Default)]
pub struct Telemetry {
    regions: Mutex<FxHashMap<u64, RegionStat>>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_region(&self, id: u64, name: &str) {
        let mut regions = self.regions.lock();
        regions.entry(id).or_default().name = name.to_string();
    }

    pub fn enter(&self, id: u64, t: u64) {
        let mut regions = self.regions.lock();
        let stat = regions.entry(id).or_default();
        stat.duration_us = stat.duration_us.wrapping_sub(t);
        stat.events += 1;
    }

    pub fn exit(&self, id: u64, t: u64) {
        let mut regions = self.regions.lock();
        let stat = regions.entry(id).or_default();
        stat.duration_us = stat.duration_us.wrapping_add(t);
    }

    /// A counter bump expressed as a zero-length interval of `step`.
    pub fn increment(&self, id: u64, step: u64) {
        self.enter(id, 0);
        self.exit(id, step);
    }

    pub fn snapshot(&self) -> Vec<(u64, RegionStat)> {
        let regions = self.regions.lock();
        let mut rows: Vec<(u64, RegionStat)> =
            regions.iter().map(|(&id, stat)| (id, stat.clone())).collect();
        rows.sort_by_key(|(id, _)| *id);
        rows
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("telemetry store error: {0}")]
    Store(String),
}

/// Persists the accumulated region map at shutdown. Sink failures are
/// logged once; the run's data is dropped, never fatal.
pub trait TelemetrySink: Send + Sync {
    fn store_run(&self, regions: &[(u64, RegionStat)]) -> Result<(), SinkError>;
}

pub struct NullSink;

impl TelemetrySink for NullSink {
    fn store_run(&self, _regions: &[(u64, RegionStat)]) -> Result<(), SinkError> {
        Ok(())
    }
}

pub(crate) fn flush_to_sink(sink: &dyn TelemetrySink, rows: &[(u64, RegionStat)]) {
    if let Err(err) = sink.store_run(rows) {
        warn!(error = %err, "telemetry sink unreachable; dropping run data");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_enter_exit_nets_elapsed() {
        let telemetry = Telemetry::new();
        telemetry.add_region(4, "kernel");
        telemetry.enter(4, 100);
        telemetry.exit(4, 350);
        telemetry.enter(4, 400);
        telemetry.exit(4, 450);

        let rows = telemetry.snapshot();
        let (_, stat) = rows.iter().find(|(id, _)| *id == 4).unwrap();
        assert_eq!(stat.duration_us, 300);
        assert_eq!(stat.events, 2);
        assert_eq!(stat.name, "kernel");
    }

    #[test]
    fn increment_counts_without_duration() {
        let telemetry = Telemetry::new();
        telemetry.increment(region::CACHE_HIT, 1);
        telemetry.increment(region::CACHE_HIT, 1);

        let rows = telemetry.snapshot();
        let (_, stat) = rows.iter().find(|(id, _)| *id == region::CACHE_HIT).unwrap();
        assert_eq!(stat.events, 2);
        assert_eq!(stat.duration_us, 2);
    }

    #[test]
    fn unbalanced_enter_wraps_instead_of_underflowing() {
        let telemetry = Telemetry::new();
        telemetry.enter(7, 1_000);
        // Still on the stack: the transient value is wrapped, and one
        // exit rebalances it.
        telemetry.exit(7, 1_250);
        let rows = telemetry.snapshot();
        let (_, stat) = rows.iter().find(|(id, _)| *id == 7).unwrap();
        assert_eq!(stat.duration_us, 250);
    }
}
