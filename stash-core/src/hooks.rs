//! Integration points with the host engine.
//!
//! The core never owns the world. Capacity numbers, eligibility verdicts,
//! attach/detach and ability delegation all come from the host through the
//! traits in this module.

use crate::types::{CarrierId, Location, OccupantId, PlayerId, TransitionHandle};

/// Capacity and mass numbers from the external balance subsystem.
///
/// Values are read once per decision and never cached by the core.
pub trait CapacityOracle {
    /// Current slot capacity of `carrier` (primary plus secondary slots).
    fn capacity(&self, carrier: CarrierId) -> u32;

    /// Mass contribution of `occupant` when held by `carrier`. Compared
    /// against the configured mass limit on every assignment.
    fn mass(&self, carrier: CarrierId, occupant: OccupantId) -> f32;
}

/// Decides whether an occupant may be captured at all.
///
/// An ineligible occupant is rejected on the same path as a full bag.
pub trait EligibilityPredicate {
    /// `true` if `occupant` may enter a bag.
    fn is_eligible(&self, occupant: OccupantId) -> bool;
}

/// Receives ability delegation changes for primary-slot occupants.
pub trait DelegationHook {
    /// `occupant` entered the primary slot of `carrier`.
    fn grant(&mut self, carrier: CarrierId, occupant: OccupantId);

    /// `occupant` left the primary slot of `carrier`.
    fn revoke(&mut self, carrier: CarrierId, occupant: OccupantId);
}

/// Reasons the world can refuse to reattach an occupant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// The holding area no longer has an entity for this handle.
    Unresolvable,
    /// The world refused placement.
    Refused(String),
}

/// A carrier present in the live world.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierPresence {
    /// Live identity.
    pub carrier: CarrierId,
    /// Owning player, if any.
    pub player: Option<PlayerId>,
    /// Current position.
    pub position: Location,
}

/// Attach/detach and lookup surface of the host's live world graph.
pub trait WorldGraph {
    /// Detach `occupant` from the live world into the transition-spanning
    /// holding area. `None` if the entity cannot be detached.
    fn detach(&mut self, occupant: OccupantId) -> Option<TransitionHandle>;

    /// Reattach a held entity into the current world at `position`.
    ///
    /// # Errors
    /// Returns [`AttachError`] when the handle no longer resolves or the world
    /// refuses placement.
    fn attach(
        &mut self,
        occupant: OccupantId,
        handle: TransitionHandle,
        position: Location,
    ) -> std::result::Result<(), AttachError>;

    /// Move an already attached occupant. Returns `false` if it is gone.
    fn reposition(&mut self, occupant: OccupantId, position: Location) -> bool;

    /// All carriers currently present in the live world.
    fn carriers(&self) -> Vec<CarrierPresence>;

    /// The live carrier controlled by `player`, if it has spawned.
    fn carrier_of(&self, player: &PlayerId) -> Option<CarrierPresence> {
        self.carriers()
            .into_iter()
            .find(|c| c.player.as_ref() == Some(player))
    }
}

/// A delegation hook that ignores every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelegation;

impl DelegationHook for NoDelegation {
    fn grant(&mut self, _carrier: CarrierId, _occupant: OccupantId) {}
    fn revoke(&mut self, _carrier: CarrierId, _occupant: OccupantId) {}
}

/// A capacity oracle returning the same capacity for every carrier.
#[derive(Debug, Clone, Copy)]
pub struct FixedCapacity(pub u32);

impl CapacityOracle for FixedCapacity {
    fn capacity(&self, _carrier: CarrierId) -> u32 {
        self.0
    }

    fn mass(&self, _carrier: CarrierId, _occupant: OccupantId) -> f32 {
        0.0
    }
}

/// An eligibility predicate that admits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllEligible;

impl EligibilityPredicate for AllEligible {
    fn is_eligible(&self, _occupant: OccupantId) -> bool {
        true
    }
}
