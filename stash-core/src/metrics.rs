//! Runtime counters and tick timing.
//!
//! Counters are lock-free `AtomicU64`s shared via `Arc` between the registry,
//! the coordinator and the host rule. The tick monitor keeps a small ring of
//! recent tick durations behind a `parking_lot::Mutex`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Atomic counters for slot and transition events.
#[derive(Debug)]
pub struct StashCounters {
    /// Assignments that placed an occupant in a slot.
    pub assignments_accepted: AtomicU64,
    /// Assignments refused (full, ineligible, held elsewhere).
    pub assignments_rejected: AtomicU64,
    /// Cycles that changed slot state.
    pub cycles: AtomicU64,
    /// Occupants evicted.
    pub evictions: AtomicU64,
    /// Secondary occupants auto-promoted after an eviction.
    pub auto_promotions: AtomicU64,
    /// Dangling transit reservations reclaimed on timeout.
    pub transit_reclaimed: AtomicU64,
    /// Occupants captured at world exit.
    pub captured: AtomicU64,
    /// Occupants reattached after world entry.
    pub rehydrated: AtomicU64,
    /// Records dropped during rehydration.
    pub rehydration_failures: AtomicU64,
    /// Seekers that timed out without finding their owner.
    pub seekers_timed_out: AtomicU64,
    /// Journal checkpoints written.
    pub journal_writes: AtomicU64,
}

impl StashCounters {
    /// Create a zeroed set of counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            assignments_accepted: AtomicU64::new(0),
            assignments_rejected: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            auto_promotions: AtomicU64::new(0),
            transit_reclaimed: AtomicU64::new(0),
            captured: AtomicU64::new(0),
            rehydrated: AtomicU64::new(0),
            rehydration_failures: AtomicU64::new(0),
            seekers_timed_out: AtomicU64::new(0),
            journal_writes: AtomicU64::new(0),
        }
    }

    /// Increment `counter` by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            assignments_accepted: self.assignments_accepted.load(Ordering::Relaxed),
            assignments_rejected: self.assignments_rejected.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            auto_promotions: self.auto_promotions.load(Ordering::Relaxed),
            transit_reclaimed: self.transit_reclaimed.load(Ordering::Relaxed),
            captured: self.captured.load(Ordering::Relaxed),
            rehydrated: self.rehydrated.load(Ordering::Relaxed),
            rehydration_failures: self.rehydration_failures.load(Ordering::Relaxed),
            seekers_timed_out: self.seekers_timed_out.load(Ordering::Relaxed),
            journal_writes: self.journal_writes.load(Ordering::Relaxed),
        }
    }
}

impl Default for StashCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Accepted assignments.
    pub assignments_accepted: u64,
    /// Rejected assignments.
    pub assignments_rejected: u64,
    /// State-changing cycles.
    pub cycles: u64,
    /// Evictions.
    pub evictions: u64,
    /// Auto-promotions.
    pub auto_promotions: u64,
    /// Reclaimed transit reservations.
    pub transit_reclaimed: u64,
    /// Captured occupants.
    pub captured: u64,
    /// Rehydrated occupants.
    pub rehydrated: u64,
    /// Failed rehydration records.
    pub rehydration_failures: u64,
    /// Timed-out seekers.
    pub seekers_timed_out: u64,
    /// Journal checkpoints.
    pub journal_writes: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 11] = [
            ("assignments_accepted", "Occupants placed in a slot", self.assignments_accepted),
            ("assignments_rejected", "Assignments refused", self.assignments_rejected),
            ("cycles", "State-changing slot cycles", self.cycles),
            ("evictions", "Occupants evicted", self.evictions),
            ("auto_promotions", "Secondaries promoted after eviction", self.auto_promotions),
            ("transit_reclaimed", "Transit reservations reclaimed", self.transit_reclaimed),
            ("captured", "Occupants captured at world exit", self.captured),
            ("rehydrated", "Occupants reattached at world entry", self.rehydrated),
            ("rehydration_failures", "Rehydration records dropped", self.rehydration_failures),
            ("seekers_timed_out", "Seekers that never found their owner", self.seekers_timed_out),
            ("journal_writes", "Transit journal checkpoints", self.journal_writes),
        ];
        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP stash_{name}_total {help}\n\
                 # TYPE stash_{name}_total counter\n\
                 stash_{name}_total {value}\n"
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tick Budget Monitor
// ---------------------------------------------------------------------------

const HISTORY_LEN: usize = 128;

/// Tracks time spent in the stash rule per simulation tick.
#[derive(Debug)]
pub struct TickBudgetMonitor {
    budget_ms: f64,
    history: Mutex<TickHistory>,
}

#[derive(Debug)]
struct TickHistory {
    timings: Vec<f64>,
    write_idx: usize,
    count: u64,
    over_budget: u64,
}

impl TickBudgetMonitor {
    /// Create a monitor with a per-tick budget in milliseconds.
    #[must_use]
    pub fn new(budget_ms: f64) -> Self {
        Self {
            budget_ms,
            history: Mutex::new(TickHistory {
                timings: vec![0.0; HISTORY_LEN],
                write_idx: 0,
                count: 0,
                over_budget: 0,
            }),
        }
    }

    /// Begin timing a tick; the guard records on drop.
    pub fn begin_tick(&self) -> TickGuard<'_> {
        TickGuard {
            monitor: self,
            start: Instant::now(),
        }
    }

    /// Record a tick duration manually (milliseconds).
    pub fn record(&self, ms: f64) {
        let mut h = self.history.lock();
        let idx = h.write_idx;
        h.timings[idx] = ms;
        h.write_idx = (idx + 1) % HISTORY_LEN;
        h.count += 1;
        if ms > self.budget_ms {
            h.over_budget += 1;
        }
    }

    /// Duration of the most recent tick.
    #[must_use]
    pub fn last_tick_ms(&self) -> f64 {
        let h = self.history.lock();
        if h.count == 0 {
            return 0.0;
        }
        h.timings[(h.write_idx + HISTORY_LEN - 1) % HISTORY_LEN]
    }

    /// Maximum duration in the recent history window.
    #[must_use]
    pub fn max_recent_ms(&self) -> f64 {
        let h = self.history.lock();
        let n = usize::try_from(h.count).unwrap_or(usize::MAX).min(HISTORY_LEN);
        h.timings[..n].iter().copied().fold(0.0, f64::max)
    }

    /// Ticks recorded so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.history.lock().count
    }

    /// Ticks that exceeded the budget.
    #[must_use]
    pub fn over_budget_count(&self) -> u64 {
        self.history.lock().over_budget
    }

    /// Configured budget in milliseconds.
    #[must_use]
    pub fn budget_ms(&self) -> f64 {
        self.budget_ms
    }
}

/// Records elapsed time into a [`TickBudgetMonitor`] when dropped.
#[derive(Debug)]
pub struct TickGuard<'a> {
    monitor: &'a TickBudgetMonitor,
    start: Instant,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.monitor.record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
