//! Game events that drive the stash rule.
//!
//! The host's gameplay code pushes these as they happen; the rule applies
//! them on its next tick in phase order, so an eviction always lands before a
//! grab or cycle queued in the same tick.

use stash_core::eviction::EvictionReason;
use stash_core::types::{CarrierId, Direction, Location, OccupantId, PlayerId, SceneId};

/// Something that happened in the game and may change slot state.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// A carrier spawned (or a player joined).
    CarrierSpawned {
        /// The carrier.
        carrier: CarrierId,
        /// Controlling player, if any.
        player: Option<PlayerId>,
        /// Where it spawned.
        position: Location,
    },
    /// A carrier despawned (player left or died for good).
    CarrierLeft {
        /// The carrier.
        carrier: CarrierId,
    },
    /// An occupant left its bag outside the carrier's control.
    Evict {
        /// The occupant.
        occupant: OccupantId,
        /// Why.
        reason: EvictionReason,
    },
    /// A carrier grabbed an occupant.
    Grab {
        /// The grabbing carrier.
        carrier: CarrierId,
        /// The grabbed occupant.
        occupant: OccupantId,
    },
    /// A carrier pressed a cycle key.
    Cycle {
        /// The cycling carrier.
        carrier: CarrierId,
        /// Direction pressed.
        direction: Direction,
    },
    /// A thrown occupant hit the ground.
    ThrowLanded {
        /// The occupant.
        occupant: OccupantId,
    },
    /// The capacity oracle may now answer differently for `carrier`.
    CapacityChanged {
        /// The carrier.
        carrier: CarrierId,
    },
    /// The party is about to leave the current world.
    WorldExit {
        /// Scene being left.
        scene: SceneId,
    },
    /// A new world finished loading.
    WorldEnter {
        /// Scene entered.
        scene: SceneId,
    },
}

/// Processing order within a tick. Lower phases run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPhase {
    /// Carrier arrival and departure.
    Lifecycle,
    /// Evictions and landings.
    Eviction,
    /// Grabs.
    Grab,
    /// Cycle steps.
    Cycle,
    /// Capacity re-checks.
    Capacity,
    /// World exit and enter.
    Transition,
}

impl GameEvent {
    /// The phase this event is applied in.
    #[must_use]
    pub fn phase(&self) -> EventPhase {
        match self {
            Self::CarrierSpawned { .. } | Self::CarrierLeft { .. } => EventPhase::Lifecycle,
            Self::Evict { .. } | Self::ThrowLanded { .. } => EventPhase::Eviction,
            Self::Grab { .. } => EventPhase::Grab,
            Self::Cycle { .. } => EventPhase::Cycle,
            Self::CapacityChanged { .. } => EventPhase::Capacity,
            Self::WorldExit { .. } | Self::WorldEnter { .. } => EventPhase::Transition,
        }
    }

    /// Whether only the authoritative participant applies this event.
    #[must_use]
    pub fn is_host_only(&self) -> bool {
        matches!(
            self,
            Self::Evict { .. } | Self::Grab { .. } | Self::Cycle { .. } | Self::ThrowLanded { .. } | Self::CapacityChanged { .. }
        )
    }
}

/// Sort `events` into phase order, keeping arrival order within a phase.
pub fn order_for_tick(events: &mut [GameEvent]) {
    events.sort_by_key(GameEvent::phase);
}
