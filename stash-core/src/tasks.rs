//! Suspended tasks driven by the tick loop.
//!
//! Each task is a plain state machine that is polled once per tick, carries
//! its own deadline, and always reaches a defined terminal outcome.

use std::collections::VecDeque;

/// Result of polling a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPoll<T> {
    /// Not finished; poll again next tick.
    Pending,
    /// Finished with a terminal outcome.
    Ready(T),
}

impl<T> TaskPoll<T> {
    /// Whether the task finished.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// A tick budget starting at a fixed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: u64,
    budget: u64,
}

impl Deadline {
    /// A deadline `budget` ticks after `now`.
    #[must_use]
    pub fn after(now: u64, budget: u64) -> Self {
        Self {
            started: now,
            budget,
        }
    }

    /// Whether the budget is used up at `now`.
    #[must_use]
    pub fn expired(&self, now: u64) -> bool {
        now.saturating_sub(self.started) >= self.budget
    }

    /// Ticks left at `now`.
    #[must_use]
    pub fn remaining(&self, now: u64) -> u64 {
        self.budget.saturating_sub(now.saturating_sub(self.started))
    }

    /// Tick the deadline started at.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started
    }
}

// ---------------------------------------------------------------------------
// World-ready wait
// ---------------------------------------------------------------------------

/// How a world-ready wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldReady {
    /// At least one carrier is present.
    CarrierPresent {
        /// Ticks waited.
        waited: u64,
    },
    /// No carrier appeared in time; proceed anyway.
    BudgetExpired,
}

/// Waits for at least one carrier to spawn after world entry.
#[derive(Debug, Clone, Copy)]
pub struct WorldReadyWait {
    deadline: Deadline,
}

impl WorldReadyWait {
    /// Start waiting at `now` for at most `budget` ticks.
    #[must_use]
    pub fn new(now: u64, budget: u64) -> Self {
        Self {
            deadline: Deadline::after(now, budget),
        }
    }

    /// Poll with the current carrier presence.
    #[must_use]
    pub fn poll(&self, now: u64, carrier_present: bool) -> TaskPoll<WorldReady> {
        if carrier_present {
            TaskPoll::Ready(WorldReady::CarrierPresent {
                waited: now.saturating_sub(self.deadline.started()),
            })
        } else if self.deadline.expired(now) {
            TaskPoll::Ready(WorldReady::BudgetExpired)
        } else {
            TaskPoll::Pending
        }
    }
}

// ---------------------------------------------------------------------------
// Time-sliced scan
// ---------------------------------------------------------------------------

/// Spreads work over a list of items across ticks, a bounded slice per tick.
#[derive(Debug, Clone)]
pub struct TimeSlicedScan<T> {
    queue: VecDeque<T>,
    per_tick: usize,
    processed: usize,
}

impl<T> TimeSlicedScan<T> {
    /// Scan `items`, yielding at most `per_tick` per call (minimum one).
    pub fn new(items: impl IntoIterator<Item = T>, per_tick: usize) -> Self {
        Self {
            queue: items.into_iter().collect(),
            per_tick: per_tick.max(1),
            processed: 0,
        }
    }

    /// Items for this tick.
    pub fn next_slice(&mut self) -> Vec<T> {
        let n = self.per_tick.min(self.queue.len());
        self.processed += n;
        self.queue.drain(..n).collect()
    }

    /// Whether every item has been handed out.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.queue.is_empty()
    }

    /// Items not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// Items handed out so far.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed
    }
}
