//! Diagnostics Registry
//!
//! A process-wide table of named counters. Recording is a no-op until
//! [`enable`] is called, and nothing in the scheduler reads the table back,
//! so it never affects correctness.
//!
//! Counters are keyed by static names such as `"rebuild.partial"` and track
//! the number of events, the sum of their values and the largest value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use dashmap::DashMap;
use serde::Serialize;

/// Aggregate of one named counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counter {
    /// Number of recorded events.
    pub count: u64,
    /// Sum of recorded values.
    pub total: u64,
    /// Largest recorded value.
    pub max: u64,
}

static ENABLED: AtomicBool = AtomicBool::new(false);
static REGISTRY: OnceLock<DashMap<&'static str, Counter>> = OnceLock::new();

fn registry() -> &'static DashMap<&'static str, Counter> {
    REGISTRY.get_or_init(DashMap::new)
}

/// Start recording.
pub fn enable() {
    ENABLED.store(true, Ordering::Release);
}

/// Stop recording. Existing counters are kept.
pub fn disable() {
    ENABLED.store(false, Ordering::Release);
}

/// True if recording is on.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Record one event with a value.
pub fn record(name: &'static str, value: u64) {
    if !is_enabled() {
        return;
    }
    let mut counter = registry().entry(name).or_default();
    counter.count += 1;
    counter.total += value;
    counter.max = counter.max.max(value);
}

/// Current value of one counter.
pub fn counter(name: &str) -> Option<Counter> {
    registry().get(name).map(|entry| *entry)
}

/// All counters sorted by name.
pub fn snapshot() -> Vec<(&'static str, Counter)> {
    let mut counters: Vec<_> = registry().iter().map(|entry| (*entry.key(), *entry.value())).collect();
    counters.sort_unstable_by_key(|(name, _)| *name);
    counters
}

/// All counters as a JSON object keyed by name.
pub fn snapshot_json() -> serde_json::Result<String> {
    let table: serde_json::Map<String, serde_json::Value> = snapshot()
        .into_iter()
        .map(|(name, counter)| Ok((name.to_string(), serde_json::to_value(counter)?)))
        .collect::<serde_json::Result<_>>()?;
    serde_json::to_string(&table)
}

/// Drop every counter.
pub fn reset() {
    registry().clear();
}
