//! In-memory world the rule runs against.
//!
//! [`SimWorld`] stands in for the game's scene graph, balance tables and
//! ability system. It is split into disjoint parts so the rule can hand the
//! graph out mutably while the capacity oracle and catalog are borrowed for
//! the same tick.

use std::collections::HashMap;

use stash_core::eligibility::{OccupantCatalog, OccupantInfo};
use stash_core::hooks::{AttachError, CapacityOracle, CarrierPresence, DelegationHook, WorldGraph};
use stash_core::types::{CarrierId, Location, OccupantId, PlayerId, TransitionHandle};
use tracing::debug;

/// Borrowed views of a host world for one tick.
pub struct WorldParts<'a> {
    /// Live scene graph.
    pub graph: &'a mut dyn WorldGraph,
    /// Capacity and mass answers.
    pub oracle: &'a dyn CapacityOracle,
    /// Entity descriptions for eligibility.
    pub catalog: &'a dyn OccupantCatalog,
    /// Ability delegation.
    pub delegation: &'a mut dyn DelegationHook,
}

/// A world the stash rule can drive.
pub trait HostWorld: Send {
    /// Split into independently borrowable parts.
    fn parts(&mut self) -> WorldParts<'_>;
}

// ---------------------------------------------------------------------------
// Scene graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SimEntity {
    kind: String,
    mass: f32,
    position: Location,
}

/// Live entities, carriers and the holding area.
#[derive(Debug, Default)]
pub struct SimGraph {
    live: HashMap<OccupantId, SimEntity>,
    held: HashMap<TransitionHandle, (OccupantId, SimEntity)>,
    carriers: HashMap<CarrierId, CarrierPresence>,
    next_handle: u64,
}

impl SimGraph {
    /// Position of a live occupant.
    #[must_use]
    pub fn position_of(&self, occupant: OccupantId) -> Option<Location> {
        self.live.get(&occupant).map(|e| e.position)
    }

    /// Whether `occupant` is live in the current scene.
    #[must_use]
    pub fn is_live(&self, occupant: OccupantId) -> bool {
        self.live.contains_key(&occupant)
    }

    /// Whether `occupant` sits in the holding area.
    #[must_use]
    pub fn is_held(&self, occupant: OccupantId) -> bool {
        self.held.values().any(|(o, _)| *o == occupant)
    }
}

impl WorldGraph for SimGraph {
    fn detach(&mut self, occupant: OccupantId) -> Option<TransitionHandle> {
        let entity = self.live.remove(&occupant)?;
        self.next_handle += 1;
        let handle = TransitionHandle(self.next_handle);
        self.held.insert(handle, (occupant, entity));
        Some(handle)
    }

    fn attach(&mut self, occupant: OccupantId, handle: TransitionHandle, position: Location) -> Result<(), AttachError> {
        match self.held.remove(&handle) {
            Some((held, mut entity)) if held == occupant => {
                entity.position = position;
                self.live.insert(occupant, entity);
                Ok(())
            }
            Some(other) => {
                self.held.insert(handle, other);
                Err(AttachError::Refused(format!("handle {} holds another entity", handle.0)))
            }
            None => Err(AttachError::Unresolvable),
        }
    }

    fn reposition(&mut self, occupant: OccupantId, position: Location) -> bool {
        let Some(entity) = self.live.get_mut(&occupant) else {
            return false;
        };
        entity.position = position;
        true
    }

    fn carriers(&self) -> Vec<CarrierPresence> {
        let mut carriers: Vec<_> = self.carriers.values().cloned().collect();
        carriers.sort_by_key(|c| c.carrier);
        carriers
    }
}

// ---------------------------------------------------------------------------
// Balance tables
// ---------------------------------------------------------------------------

/// Capacities and entity descriptions.
#[derive(Debug)]
pub struct SimRoster {
    default_capacity: u32,
    capacities: HashMap<CarrierId, u32>,
    entities: HashMap<OccupantId, OccupantInfo>,
}

impl SimRoster {
    fn new(default_capacity: u32) -> Self {
        Self {
            default_capacity,
            capacities: HashMap::new(),
            entities: HashMap::new(),
        }
    }
}

impl CapacityOracle for SimRoster {
    fn capacity(&self, carrier: CarrierId) -> u32 {
        self.capacities.get(&carrier).copied().unwrap_or(self.default_capacity)
    }

    fn mass(&self, _carrier: CarrierId, occupant: OccupantId) -> f32 {
        self.entities.get(&occupant).map_or(0.0, |e| e.mass)
    }
}

impl OccupantCatalog for SimRoster {
    fn describe(&self, occupant: OccupantId) -> Option<OccupantInfo> {
        self.entities.get(&occupant).cloned()
    }
}

// ---------------------------------------------------------------------------
// Ability delegation
// ---------------------------------------------------------------------------

/// Tracks which occupant's abilities each carrier currently controls.
#[derive(Debug, Default)]
pub struct DelegationLog {
    active: HashMap<CarrierId, OccupantId>,
    calls: u64,
}

impl DelegationLog {
    /// The occupant `carrier` currently controls.
    #[must_use]
    pub fn active(&self, carrier: CarrierId) -> Option<OccupantId> {
        self.active.get(&carrier).copied()
    }

    /// Total grant and revoke calls.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DelegationHook for DelegationLog {
    fn grant(&mut self, carrier: CarrierId, occupant: OccupantId) {
        self.calls += 1;
        if let Some(previous) = self.active.insert(carrier, occupant) {
            debug!(carrier = %carrier, previous = %previous, "Grant without revoke");
        }
    }

    fn revoke(&mut self, carrier: CarrierId, occupant: OccupantId) {
        self.calls += 1;
        if self.active.get(&carrier) == Some(&occupant) {
            self.active.remove(&carrier);
        }
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The whole simulated world.
#[derive(Debug)]
pub struct SimWorld {
    /// Scene graph.
    pub graph: SimGraph,
    /// Capacities and descriptions.
    pub roster: SimRoster,
    /// Delegation state.
    pub delegation: DelegationLog,
}

impl SimWorld {
    /// An empty world where every carrier has `default_capacity` slots.
    #[must_use]
    pub fn new(default_capacity: u32) -> Self {
        Self {
            graph: SimGraph::default(),
            roster: SimRoster::new(default_capacity),
            delegation: DelegationLog::default(),
        }
    }

    /// Spawn a capturable entity.
    pub fn spawn(&mut self, kind: &str, mass: f32, position: Location) -> OccupantId {
        let id = OccupantId::new();
        self.graph.live.insert(
            id,
            SimEntity {
                kind: kind.to_string(),
                mass,
                position,
            },
        );
        self.roster.entities.insert(
            id,
            OccupantInfo {
                id,
                kind: kind.to_string(),
                is_carrier: false,
                mass,
            },
        );
        id
    }

    /// Spawn a carrier controlled by `player`.
    pub fn spawn_carrier(&mut self, player: Option<PlayerId>, position: Location) -> CarrierId {
        let carrier = CarrierId::new();
        self.place_carrier(carrier, player, position);
        carrier
    }

    /// Put an existing carrier identity into the current scene.
    pub fn place_carrier(&mut self, carrier: CarrierId, player: Option<PlayerId>, position: Location) {
        self.graph.carriers.insert(
            carrier,
            CarrierPresence {
                carrier,
                player,
                position,
            },
        );
        self.roster.entities.insert(
            OccupantId(carrier.0),
            OccupantInfo {
                id: OccupantId(carrier.0),
                kind: "carrier".to_string(),
                is_carrier: true,
                mass: 80.0,
            },
        );
    }

    /// Move a carrier.
    pub fn move_carrier(&mut self, carrier: CarrierId, position: Location) -> bool {
        let Some(presence) = self.graph.carriers.get_mut(&carrier) else {
            return false;
        };
        presence.position = position;
        true
    }

    /// Override one carrier's capacity.
    pub fn set_capacity(&mut self, carrier: CarrierId, capacity: u32) {
        self.roster.capacities.insert(carrier, capacity);
    }

    /// Kill an entity: it leaves the scene and the catalog.
    pub fn kill(&mut self, occupant: OccupantId) -> bool {
        self.roster.entities.remove(&occupant);
        self.graph.live.remove(&occupant).is_some()
    }

    /// Tear down the current scene. Held entities survive; everything else,
    /// carriers included, is gone.
    pub fn unload_scene(&mut self) -> usize {
        let dropped = self.graph.live.len();
        for id in self.graph.live.keys() {
            self.roster.entities.remove(id);
        }
        self.graph.live.clear();
        self.graph.carriers.clear();
        dropped
    }
}

impl HostWorld for SimWorld {
    fn parts(&mut self) -> WorldParts<'_> {
        WorldParts {
            graph: &mut self.graph,
            oracle: &self.roster,
            catalog: &self.roster,
            delegation: &mut self.delegation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_attach_moves_through_holding_area() {
        let mut world = SimWorld::new(2);
        let a = world.spawn("crate", 10.0, Location::ORIGIN);

        let handle = world.graph.detach(a).expect("detached");
        assert!(world.graph.is_held(a));
        assert!(!world.graph.is_live(a));
        assert!(world.graph.detach(a).is_none());

        let target = Location::new(3.0, 0.0, 4.0);
        world.graph.attach(a, handle, target).expect("attached");
        assert_eq!(world.graph.position_of(a), Some(target));
        assert_eq!(world.graph.attach(a, handle, target), Err(AttachError::Unresolvable));
    }

    #[test]
    fn unload_keeps_only_held_entities() {
        let mut world = SimWorld::new(2);
        let kept = world.spawn("crate", 1.0, Location::ORIGIN);
        let lost = world.spawn("crate", 1.0, Location::ORIGIN);
        world.spawn_carrier(Some(PlayerId::new("p1")), Location::ORIGIN);
        world.graph.detach(kept).expect("detached");

        assert_eq!(world.unload_scene(), 1);
        assert!(world.graph.carriers().is_empty());
        assert!(world.roster.describe(lost).is_none());
        assert!(world.roster.describe(kept).is_some());
    }

    #[test]
    fn delegation_tracks_active_primary() {
        let mut log = DelegationLog::default();
        let carrier = CarrierId::new();
        let (a, b) = (OccupantId::new(), OccupantId::new());
        log.grant(carrier, a);
        log.revoke(carrier, a);
        log.grant(carrier, b);
        assert_eq!(log.active(carrier), Some(b));
        assert_eq!(log.calls(), 3);
    }

    #[test]
    fn carriers_describe_themselves_as_carriers() {
        let mut world = SimWorld::new(3);
        let carrier = world.spawn_carrier(None, Location::ORIGIN);
        let info = world.roster.describe(OccupantId(carrier.0)).expect("described");
        assert!(info.is_carrier);
        world.set_capacity(carrier, 5);
        assert_eq!(world.roster.capacity(carrier), 5);
        assert_eq!(world.roster.capacity(CarrierId::new()), 3);
    }
}
