//! Configuration for the stash inventory system.
//!
//! Maps directly to `stash.toml`. Every field has a serde default so partial
//! files are valid.

use serde::{Deserialize, Serialize};

use crate::types::Location;

/// Top-level stash configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StashConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Slot allocation and eviction policy.
    #[serde(default)]
    pub slots: SlotConfig,
    /// World-transition capture and rehydration.
    #[serde(default)]
    pub transition: TransitionConfig,
    /// Ownership seeker tuning.
    #[serde(default)]
    pub seeker: SeekerConfig,
    /// Transit journal settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Sync channel settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Capture eligibility rules.
    #[serde(default)]
    pub eligibility: EligibilityConfig,
}

impl StashConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `StashError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::StashError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the inventory system is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output: "plain" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            log_format: "plain".to_string(),
        }
    }
}

/// Slot allocation and eviction policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Promote the first remaining secondary occupant when the primary is evicted.
    #[serde(default = "default_true")]
    pub auto_promote_on_evict: bool,
    /// Fill secondary slots before the primary slot so the capture ability
    /// stays free for chain-grabbing.
    #[serde(default = "default_true")]
    pub prefer_secondary: bool,
    /// How long a thrown occupant keeps its dangling reservation (ticks).
    #[serde(default = "default_45")]
    pub transit_settle_ticks: u64,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            auto_promote_on_evict: true,
            prefer_secondary: true,
            transit_settle_ticks: 45,
        }
    }
}

/// World-transition capture and rehydration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Maximum ticks to wait for a carrier to appear after world entry.
    #[serde(default = "default_300")]
    pub world_ready_timeout_ticks: u64,
    /// Records reattached per tick (time-slice size).
    #[serde(default = "default_16_usize")]
    pub records_per_tick: usize,
    /// Re-run the grab path for rehydrated occupants (host only).
    #[serde(default = "default_true")]
    pub auto_grab: bool,
    /// Ticks between reattach and auto-grab.
    #[serde(default = "default_30")]
    pub auto_grab_settle_ticks: u64,
    /// Distance from the owner carrier at which occupants are placed.
    #[serde(default = "default_owner_offset")]
    pub owner_offset: f32,
    /// Random horizontal jitter so several occupants do not overlap.
    #[serde(default = "default_scatter_radius")]
    pub scatter_radius: f32,
    /// Where occupants without a present owner are parked.
    #[serde(default)]
    pub neutral_position: Location,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            world_ready_timeout_ticks: 300,
            records_per_tick: 16,
            auto_grab: true,
            auto_grab_settle_ticks: 30,
            owner_offset: 1.5,
            scatter_radius: 0.75,
            neutral_position: Location::ORIGIN,
        }
    }
}

/// Ownership seeker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeekerConfig {
    /// Ticks a seeker keeps looking for its owner.
    #[serde(default = "default_600")]
    pub timeout_ticks: u64,
    /// Ticks between owner lookups.
    #[serde(default = "default_10")]
    pub poll_interval_ticks: u64,
}

impl Default for SeekerConfig {
    fn default() -> Self {
        Self {
            timeout_ticks: 600,
            poll_interval_ticks: 10,
        }
    }
}

/// Transit journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Checkpoint the holding area to SQLite on every capture.
    #[serde(default)]
    pub journal_enabled: bool,
    /// Store a CRC-32 of each checkpoint.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// Enable SQLite WAL mode.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            journal_enabled: false,
            checksum_enabled: true,
            wal_mode: true,
        }
    }
}

/// Wire codec for sync messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCodec {
    /// MessagePack via `rmp-serde`.
    #[default]
    Msgpack,
    /// `bincode` fixed layout.
    Bincode,
}

/// Sync channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Codec used on the wire.
    #[serde(default)]
    pub codec: SyncCodec,
    /// Ownership tags kept by a mirroring participant.
    #[serde(default = "default_512_usize")]
    pub mirror_tag_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            codec: SyncCodec::Msgpack,
            mirror_tag_capacity: 512,
        }
    }
}

/// Capture eligibility rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityConfig {
    /// Entity kinds that can never be captured.
    #[serde(default)]
    pub blacklisted_kinds: Vec<String>,
    /// Refuse other carriers (player actors).
    #[serde(default = "default_true")]
    pub deny_carriers: bool,
    /// Refuse occupants whose oracle mass for the grabbing carrier exceeds
    /// this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mass: Option<f32>,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            blacklisted_kinds: Vec::new(),
            deny_carriers: true,
            max_mass: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "plain".to_string()
}
fn default_10() -> u64 {
    10
}
fn default_30() -> u64 {
    30
}
fn default_45() -> u64 {
    45
}
fn default_300() -> u64 {
    300
}
fn default_600() -> u64 {
    600
}
fn default_16_usize() -> usize {
    16
}
fn default_512_usize() -> usize {
    512
}
fn default_owner_offset() -> f32 {
    1.5
}
fn default_scatter_radius() -> f32 {
    0.75
}
