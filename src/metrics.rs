//! Process-wide world counters.
//! Cheap relaxed atomics; read them through [`snapshot`].
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static ACTIONS_EXECUTED: AtomicU64 = AtomicU64::new(0);
static STIMULI_DELIVERED: AtomicU64 = AtomicU64::new(0);
static STIMULI_DROPPED: AtomicU64 = AtomicU64::new(0);
static TICKS_DELIVERED: AtomicU64 = AtomicU64::new(0);
static TICKS_SKIPPED: AtomicU64 = AtomicU64::new(0);
static STAGE_ADVANCES: AtomicU64 = AtomicU64::new(0);
static COMPLETIONS: AtomicU64 = AtomicU64::new(0);

pub fn inc_actions_executed() {
    ACTIONS_EXECUTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_stimuli_delivered() {
    STIMULI_DELIVERED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_stimuli_dropped() {
    STIMULI_DROPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn add_ticks_delivered(n: u64) {
    if n > 0 {
        TICKS_DELIVERED.fetch_add(n, Ordering::Relaxed);
    }
}

pub fn add_ticks_skipped(n: u64) {
    if n > 0 {
        TICKS_SKIPPED.fetch_add(n, Ordering::Relaxed);
    }
}

pub fn inc_stage_advances() {
    STAGE_ADVANCES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_completions() {
    COMPLETIONS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorldMetrics {
    pub actions_executed: u64,
    pub stimuli_delivered: u64,
    pub stimuli_dropped: u64,
    pub ticks_delivered: u64,
    pub ticks_skipped: u64,
    pub stage_advances: u64,
    pub completions: u64,
}

pub fn snapshot() -> WorldMetrics {
    WorldMetrics {
        actions_executed: ACTIONS_EXECUTED.load(Ordering::Relaxed),
        stimuli_delivered: STIMULI_DELIVERED.load(Ordering::Relaxed),
        stimuli_dropped: STIMULI_DROPPED.load(Ordering::Relaxed),
        ticks_delivered: TICKS_DELIVERED.load(Ordering::Relaxed),
        ticks_skipped: TICKS_SKIPPED.load(Ordering::Relaxed),
        stage_advances: STAGE_ADVANCES.load(Ordering::Relaxed),
        completions: COMPLETIONS.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are process-wide and other tests bump them concurrently, so
    // only monotonic growth is asserted.
    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_actions_executed();
        add_ticks_delivered(3);
        add_ticks_skipped(0);
        inc_completions();
        let after = snapshot();
        assert!(after.actions_executed >= before.actions_executed + 1);
        assert!(after.ticks_delivered >= before.ticks_delivered + 3);
        assert!(after.ticks_skipped >= before.ticks_skipped);
        assert!(after.completions >= before.completions + 1);
    }

    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_string(&snapshot()).unwrap();
        assert!(json.contains("\"stage_advances\""));
    }
}
