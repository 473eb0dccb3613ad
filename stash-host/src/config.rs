//! Host-side configuration for the stash rule.
//!
//! Layers the participant role, tick rate and snapshot cadence on top of the
//! engine's [`StashConfig`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stash_core::config::StashConfig;
use stash_core::types::Role;

// ---------------------------------------------------------------------------
// Host config
// ---------------------------------------------------------------------------

/// Everything the host integration needs to run the stash rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Whether this participant owns slot state.
    pub role: Role,
    /// Simulation ticks per second driven by [`crate::driver::run_tick_loop`].
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: u32,
    /// Dirty carriers are snapshotted every this many ticks.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every_ticks: u64,
    /// Per-tick time budget for the rule (ms), used for overrun accounting.
    #[serde(default = "default_tick_budget")]
    pub tick_budget_ms: f64,
    /// Transit journal location; ignored unless the journal is enabled.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    /// Engine configuration.
    #[serde(default)]
    pub stash: StashConfig,
}

impl HostConfig {
    /// Presets for `role`.
    ///
    /// Clients mirror more often since they only consume snapshots.
    #[must_use]
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            tick_rate_hz: default_tick_rate(),
            snapshot_every_ticks: match role {
                Role::Host => default_snapshot_every(),
                Role::Client => 1,
            },
            tick_budget_ms: default_tick_budget(),
            journal_path: None,
            stash: StashConfig::default(),
        }
    }

    /// Replace the engine configuration.
    #[must_use]
    pub fn with_stash(mut self, stash: StashConfig) -> Self {
        self.stash = stash;
        self
    }

    /// Wall-clock length of one tick.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::for_role(Role::Host)
    }
}

fn default_tick_rate() -> u32 {
    30
}
fn default_snapshot_every() -> u64 {
    3
}
fn default_tick_budget() -> f64 {
    0.5
}
