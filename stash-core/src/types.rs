//! Core type definitions for the stash inventory system.
//!
//! All identity types are serializable so they can cross the sync channel
//! and the transit journal unchanged.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Process-wide unique identity of an occupant (any grabbable world entity).
///
/// Stable for the lifetime of the entity, including across slot moves and
/// world transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OccupantId(pub Uuid);

impl OccupantId {
    /// Create a new random occupant ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OccupantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OccupantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a carrier actor in the live world.
///
/// Only meaningful while the actor exists; a respawned carrier in a new world
/// receives a fresh `CarrierId` and is matched to its occupants via its
/// [`PlayerId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CarrierId(pub Uuid);

impl CarrierId {
    /// Create a new random carrier ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CarrierId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable player identity that survives world transitions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl PlayerId {
    /// Wrap a player identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a world / scene the occupants were captured from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneId(pub String);

impl SceneId {
    /// Wrap a scene name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token returned by the world when an occupant is detached into the
/// transition-spanning holding area. Handed back on reattach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionHandle(pub u64);

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Which slot of a bag an occupant holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKind {
    /// The single visible slot; its occupant receives delegated abilities.
    Primary,
    /// A hidden, stashed slot.
    Secondary,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Cycling direction through a carrier's occupants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Next occupant in insertion order.
    Forward,
    /// Previous occupant in insertion order.
    Backward,
}

impl Direction {
    /// The opposite direction.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// Participant role in a networked session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The single authoritative participant; performs all slot mutation.
    Host,
    /// Mirrors state received over the sync channel; never mutates slots.
    Client,
}

impl Role {
    /// Whether this role may mutate slot state.
    #[must_use]
    pub fn is_authoritative(self) -> bool {
        matches!(self, Self::Host)
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A 3D position in the game world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Location {
    /// Origin of the world.
    pub const ORIGIN: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Create a location.
    #[must_use]
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Translate by the given offsets.
    #[must_use]
    pub fn offset(&self, dx: f32, dy: f32, dz: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Euclidean distance, wrapped for use as an ordering key.
    #[must_use]
    pub fn distance(&self, other: &Self) -> OrderedFloat<f32> {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        OrderedFloat((dx * dx + dy * dy + dz * dz).sqrt())
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::ORIGIN
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// In-game timestamp measured in simulation ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameTimestamp {
    /// Simulation tick (monotonically increasing within a session).
    pub tick: u64,
    /// Corresponding wall-clock time (journal metadata only).
    pub real_time: DateTime<Utc>,
}

impl GameTimestamp {
    /// Create a timestamp for `tick` at the current wall-clock time.
    #[must_use]
    pub fn now(tick: u64) -> Self {
        Self {
            tick,
            real_time: Utc::now(),
        }
    }

    /// Ticks elapsed since `other`, saturating at zero.
    #[must_use]
    pub fn ticks_since(&self, other: &Self) -> u64 {
        self.tick.saturating_sub(other.tick)
    }
}
