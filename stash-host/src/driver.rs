//! Async tick driver.
//!
//! Runs a shared [`StashRule`] at its configured tick rate on the tokio
//! runtime. The rule lock is held only for the duration of one tick, so
//! gameplay tasks can push events between ticks.

use std::sync::Arc;

use parking_lot::Mutex;
use stash_core::sync::SyncChannel;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::rule::StashRule;
use crate::world::HostWorld;

/// Tick `rule` until `shutdown` flips to `true` or its sender is dropped.
///
/// Missed ticks are skipped rather than bursted. Returns the number of ticks
/// run.
pub async fn run_tick_loop<W, C>(rule: Arc<Mutex<StashRule<W, C>>>, mut shutdown: watch::Receiver<bool>) -> u64
where
    W: HostWorld,
    C: SyncChannel,
{
    let period = rule.lock().config().tick_interval();
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(period_us = period.as_micros(), "Stash tick loop started");

    let mut ticks = 0u64;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = rule.lock().tick();
                ticks += 1;
                if let Some(rehydration) = &report.rehydration {
                    debug!(
                        tick = report.tick,
                        reattached = rehydration.reattached,
                        partial = rehydration.is_partial(),
                        "Rehydration pass completed"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    warn!("Shutdown sender dropped, stopping tick loop");
                    break;
                }
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let guard = rule.lock();
    info!(
        ticks,
        over_budget = guard.budget().over_budget_count(),
        max_tick_ms = guard.budget().max_recent_ms(),
        "Stash tick loop stopped"
    );
    ticks
}
