//! The authoritative slot registry.
//!
//! Bags live in a generational arena indexed by carrier. Callers address bags
//! by [`CarrierId`] or by a [`CarrierHandle`]; a handle issued for a carrier
//! that has since left the world is rejected as stale.
//!
//! Every mutation queues [`SlotEvent`]s in an outbox and marks the carrier
//! dirty so the host can forward delegation changes and broadcast a fresh
//! [`SlotSnapshot`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bag::{Bag, EntryState};
use crate::config::SlotConfig;
use crate::error::{Rejected, Result, StashError};
use crate::hooks::{CapacityOracle, DelegationHook, EligibilityPredicate};
use crate::metrics::StashCounters;
use crate::sync::SlotSnapshot;
use crate::types::{CarrierId, Direction, OccupantId, PlayerId, SlotKind};

// ---------------------------------------------------------------------------
// Handles & Context
// ---------------------------------------------------------------------------

/// Generational index of a bag in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CarrierHandle {
    index: u32,
    generation: u32,
}

impl CarrierHandle {
    /// Arena index.
    #[must_use]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation the handle was issued for.
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug)]
struct ArenaSlot {
    generation: u32,
    bag: Option<Bag>,
}

/// Per-decision inputs supplied by the host.
#[derive(Clone, Copy)]
pub struct SlotContext<'a> {
    /// Capacity source, consulted fresh on every decision.
    pub oracle: &'a dyn CapacityOracle,
    /// Capture eligibility.
    pub eligibility: &'a dyn EligibilityPredicate,
    /// Current simulation tick.
    pub tick: u64,
    /// Heaviest occupant a carrier may take, per [`CapacityOracle::mass`].
    pub max_mass: Option<f32>,
}

impl<'a> SlotContext<'a> {
    /// Bundle the collaborators for one tick.
    #[must_use]
    pub fn new(
        oracle: &'a dyn CapacityOracle,
        eligibility: &'a dyn EligibilityPredicate,
        tick: u64,
    ) -> Self {
        Self {
            oracle,
            eligibility,
            tick,
            max_mass: None,
        }
    }

    /// Refuse occupants whose mass for the grabbing carrier exceeds `limit`.
    #[must_use]
    pub fn with_max_mass(mut self, limit: Option<f32>) -> Self {
        self.max_mass = limit;
        self
    }

    /// Whether `occupant` passes eligibility and the mass limit for `carrier`.
    #[must_use]
    pub fn admits(&self, carrier: CarrierId, occupant: OccupantId) -> bool {
        self.eligibility.is_eligible(occupant)
            && self
                .max_mass
                .is_none_or(|limit| self.oracle.mass(carrier, occupant) <= limit)
    }
}

impl std::fmt::Debug for SlotContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotContext")
            .field("tick", &self.tick)
            .field("max_mass", &self.max_mass)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A slot change the host must reflect in the live world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    /// The occupant entered the primary slot; grant delegated abilities.
    DelegationGranted {
        /// Carrier.
        carrier: CarrierId,
        /// Occupant.
        occupant: OccupantId,
    },
    /// The occupant left the primary slot; revoke delegated abilities.
    DelegationRevoked {
        /// Carrier.
        carrier: CarrierId,
        /// Occupant.
        occupant: OccupantId,
    },
    /// The occupant moved into a secondary slot; hide it.
    Stashed {
        /// Carrier.
        carrier: CarrierId,
        /// Occupant.
        occupant: OccupantId,
    },
    /// The occupant came out of a secondary slot; show it.
    Unstashed {
        /// Carrier.
        carrier: CarrierId,
        /// Occupant.
        occupant: OccupantId,
    },
    /// The occupant left the bag.
    Released {
        /// Carrier.
        carrier: CarrierId,
        /// Occupant.
        occupant: OccupantId,
    },
}

impl SlotEvent {
    /// Carrier the event concerns.
    #[must_use]
    pub fn carrier(&self) -> CarrierId {
        match *self {
            Self::DelegationGranted { carrier, .. }
            | Self::DelegationRevoked { carrier, .. }
            | Self::Stashed { carrier, .. }
            | Self::Unstashed { carrier, .. }
            | Self::Released { carrier, .. } => carrier,
        }
    }

    /// Occupant the event concerns.
    #[must_use]
    pub fn occupant(&self) -> OccupantId {
        match *self {
            Self::DelegationGranted { occupant, .. }
            | Self::DelegationRevoked { occupant, .. }
            | Self::Stashed { occupant, .. }
            | Self::Unstashed { occupant, .. }
            | Self::Released { occupant, .. } => occupant,
        }
    }
}

/// Forward the delegation subset of `events` to `hook`, in order.
pub fn forward_delegation(events: &[SlotEvent], hook: &mut dyn DelegationHook) {
    for event in events {
        match *event {
            SlotEvent::DelegationGranted { carrier, occupant } => hook.grant(carrier, occupant),
            SlotEvent::DelegationRevoked { carrier, occupant } => hook.revoke(carrier, occupant),
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Authoritative record of every carrier's bag.
#[derive(Debug)]
pub struct SlotRegistry {
    config: SlotConfig,
    arena: Vec<ArenaSlot>,
    free: Vec<u32>,
    by_carrier: HashMap<CarrierId, CarrierHandle>,
    /// Every tracked occupant (settled or in transit) and its bag.
    holders: HashMap<OccupantId, CarrierId>,
    outbox: Vec<SlotEvent>,
    dirty: BTreeMap<CarrierId, Option<Direction>>,
    counters: Arc<StashCounters>,
}

impl SlotRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: SlotConfig) -> Self {
        Self::with_counters(config, Arc::new(StashCounters::new()))
    }

    /// Create an empty registry reporting into shared counters.
    #[must_use]
    pub fn with_counters(config: SlotConfig, counters: Arc<StashCounters>) -> Self {
        Self {
            config,
            arena: Vec::new(),
            free: Vec::new(),
            by_carrier: HashMap::new(),
            holders: HashMap::new(),
            outbox: Vec::new(),
            dirty: BTreeMap::new(),
            counters,
        }
    }

    /// Slot policy in effect.
    #[must_use]
    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<StashCounters> {
        &self.counters
    }

    // -- arena ------------------------------------------------------------

    /// Give `carrier` an empty bag. Registering an existing carrier only
    /// updates its owner and returns the existing handle.
    pub fn register_carrier(&mut self, carrier: CarrierId, owner: Option<PlayerId>) -> CarrierHandle {
        if let Some(&handle) = self.by_carrier.get(&carrier) {
            if let Some(bag) = self.bag_mut(carrier) {
                bag.set_owner(owner);
            }
            return handle;
        }

        let bag = Bag::new(carrier, owner);
        let handle = if let Some(index) = self.free.pop() {
            let slot = &mut self.arena[index as usize];
            slot.bag = Some(bag);
            CarrierHandle {
                index,
                generation: slot.generation,
            }
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let index = self.arena.len() as u32;
            self.arena.push(ArenaSlot {
                generation: 0,
                bag: Some(bag),
            });
            CarrierHandle {
                index,
                generation: 0,
            }
        };
        self.by_carrier.insert(carrier, handle);
        debug!(carrier = %carrier, index = handle.index, generation = handle.generation, "Carrier registered");
        handle
    }

    /// Drop `carrier`'s bag, invalidating its handle.
    ///
    /// Tracked occupants are forgotten. Every settled occupant gets leave
    /// events, primary first.
    pub fn unregister_carrier(&mut self, carrier: CarrierId) -> Option<Bag> {
        let handle = self.by_carrier.remove(&carrier)?;
        let slot = self.arena.get_mut(handle.index as usize)?;
        let bag = slot.bag.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);

        for occupant in bag.in_transit() {
            self.holders.remove(&occupant);
        }
        let leaving = bag
            .primary()
            .map(|primary| (primary, SlotKind::Primary))
            .into_iter()
            .chain(bag.secondary().into_iter().map(|o| (o, SlotKind::Secondary)));
        for (occupant, slot) in leaving {
            self.holders.remove(&occupant);
            self.emit_leave(carrier, occupant, slot);
        }
        self.dirty.remove(&carrier);
        debug!(carrier = %carrier, occupants = bag.settled_count(), "Carrier unregistered");
        Some(bag)
    }

    /// Current handle of `carrier`.
    #[must_use]
    pub fn handle(&self, carrier: CarrierId) -> Option<CarrierHandle> {
        self.by_carrier.get(&carrier).copied()
    }

    /// Bag of `carrier`.
    #[must_use]
    pub fn bag(&self, carrier: CarrierId) -> Option<&Bag> {
        let handle = self.by_carrier.get(&carrier)?;
        self.arena.get(handle.index as usize)?.bag.as_ref()
    }

    /// Resolve a handle.
    ///
    /// # Errors
    /// Returns [`StashError::StaleHandle`] if the carrier behind `handle` has
    /// been unregistered.
    pub fn bag_by_handle(&self, handle: CarrierHandle) -> Result<&Bag> {
        self.arena
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.bag.as_ref())
            .ok_or(StashError::StaleHandle {
                index: handle.index,
                generation: handle.generation,
            })
    }

    pub(crate) fn bag_mut(&mut self, carrier: CarrierId) -> Option<&mut Bag> {
        let handle = self.by_carrier.get(&carrier)?;
        self.arena.get_mut(handle.index as usize)?.bag.as_mut()
    }

    /// Registered carriers in arena order.
    #[must_use]
    pub fn carriers(&self) -> Vec<CarrierId> {
        self.arena
            .iter()
            .filter_map(|slot| slot.bag.as_ref().map(Bag::carrier))
            .collect()
    }

    /// Number of registered carriers.
    #[must_use]
    pub fn carrier_count(&self) -> usize {
        self.by_carrier.len()
    }

    /// Registered carrier controlled by `player`.
    #[must_use]
    pub fn carrier_of_player(&self, player: &PlayerId) -> Option<CarrierId> {
        self.arena
            .iter()
            .filter_map(|slot| slot.bag.as_ref())
            .find(|bag| bag.owner() == Some(player))
            .map(Bag::carrier)
    }

    // -- queries ----------------------------------------------------------

    /// Primary occupant of `carrier`.
    #[must_use]
    pub fn primary_of(&self, carrier: CarrierId) -> Option<OccupantId> {
        self.bag(carrier).and_then(Bag::primary)
    }

    /// Secondary occupants of `carrier`.
    #[must_use]
    pub fn secondary_set_of(&self, carrier: CarrierId) -> HashSet<OccupantId> {
        self.bag(carrier).map(Bag::secondary_set).unwrap_or_default()
    }

    /// Carrier tracking `occupant`, including in-transit entries.
    #[must_use]
    pub fn holder_of(&self, occupant: OccupantId) -> Option<CarrierId> {
        self.holders.get(&occupant).copied()
    }

    /// Carrier and slot of a settled occupant.
    #[must_use]
    pub fn slot_of(&self, occupant: OccupantId) -> Option<(CarrierId, SlotKind)> {
        let carrier = self.holder_of(occupant)?;
        let slot = self.bag(carrier)?.slot_of(occupant)?;
        Some((carrier, slot))
    }

    // -- mutation ---------------------------------------------------------

    /// Place `occupant` in one of `carrier`'s slots.
    ///
    /// Re-assigning an occupant already settled in this bag returns its current
    /// slot unchanged. An in-transit entry in this bag is re-settled in its
    /// original order position; one in another bag is dropped once this bag
    /// accepts the occupant.
    ///
    /// # Errors
    /// Returns a [`Rejected`] reason; rejections never mutate state.
    pub fn assign(
        &mut self,
        carrier: CarrierId,
        occupant: OccupantId,
        ctx: &SlotContext<'_>,
    ) -> std::result::Result<SlotKind, Rejected> {
        let result = self.try_assign(carrier, occupant, ctx);
        match &result {
            Ok(slot) => {
                debug!(carrier = %carrier, occupant = %occupant, slot = %slot, "Occupant assigned");
            }
            Err(reason) => {
                StashCounters::add(&self.counters.assignments_rejected, 1);
                debug!(carrier = %carrier, occupant = %occupant, reason = %reason, "Assignment rejected");
            }
        }
        result
    }

    fn try_assign(
        &mut self,
        carrier: CarrierId,
        occupant: OccupantId,
        ctx: &SlotContext<'_>,
    ) -> std::result::Result<SlotKind, Rejected> {
        // A thrown occupant holds no slot; another carrier may catch it.
        let mut caught_from = None;
        if let Some(&holder) = self.holders.get(&occupant)
            && holder != carrier
        {
            let in_flight = self
                .bag(holder)
                .and_then(|bag| bag.entry_state(occupant))
                .is_some_and(|state| matches!(state, EntryState::InTransit { .. }));
            if !in_flight {
                return Err(Rejected::AlreadyElsewhere { holder });
            }
            caught_from = Some(holder);
        }
        let prefer_secondary = self.config.prefer_secondary;
        let bag = self.bag(carrier).ok_or(Rejected::UnknownCarrier(carrier))?;
        if let Some(slot) = bag.slot_of(occupant) {
            return Ok(slot);
        }
        if !ctx.admits(carrier, occupant) {
            return Err(Rejected::Ineligible);
        }
        let capacity = ctx.oracle.capacity(carrier);
        if bag.settled_count() >= capacity as usize {
            return Err(Rejected::Full { capacity });
        }

        let slot = if bag.primary().is_none()
            && !(prefer_secondary && bag.has_free_secondary(capacity))
        {
            SlotKind::Primary
        } else {
            SlotKind::Secondary
        };
        let in_transit = bag.tracks(occupant);

        if let Some(holder) = caught_from {
            if let Some(thrower) = self.bag_mut(holder) {
                thrower.remove(occupant);
            }
            self.forget_holder(occupant);
            debug!(thrower = %holder, carrier = %carrier, occupant = %occupant, "In-flight occupant caught by another carrier");
        }
        let Some(bag) = self.bag_mut(carrier) else {
            return Err(Rejected::UnknownCarrier(carrier));
        };
        if in_transit {
            bag.resettle(occupant, slot);
        } else {
            bag.push_settled(occupant, slot);
        }
        self.holders.insert(occupant, carrier);
        self.emit_enter(carrier, occupant, slot);
        self.touch(carrier, None);
        StashCounters::add(&self.counters.assignments_accepted, 1);
        Ok(slot)
    }

    /// Remove `occupant` from `carrier`'s bag without auto-promotion.
    ///
    /// Returns the slot it held; `None` when it was untracked or in transit.
    pub fn remove(&mut self, carrier: CarrierId, occupant: OccupantId) -> Option<SlotKind> {
        let bag = self.bag_mut(carrier)?;
        let slot = bag.remove(occupant)?;
        self.holders.remove(&occupant);
        if let Some(slot) = slot {
            self.emit_leave(carrier, occupant, slot);
            self.touch(carrier, None);
        }
        debug!(carrier = %carrier, occupant = %occupant, ?slot, "Occupant removed");
        slot
    }

    /// Move `occupant` from `from`'s bag into `to`'s bag.
    ///
    /// The destination is checked first so a refused transfer leaves the
    /// source bag untouched.
    ///
    /// # Errors
    /// Returns a [`Rejected`] reason if `to` cannot accept the occupant.
    pub fn transfer(
        &mut self,
        from: CarrierId,
        to: CarrierId,
        occupant: OccupantId,
        ctx: &SlotContext<'_>,
    ) -> std::result::Result<SlotKind, Rejected> {
        if from == to {
            return self.assign(to, occupant, ctx);
        }
        match self.holder_of(occupant) {
            Some(holder) if holder != from => return Err(Rejected::AlreadyElsewhere { holder }),
            _ => {}
        }
        let dest = self.bag(to).ok_or(Rejected::UnknownCarrier(to))?;
        if !ctx.admits(to, occupant) {
            return Err(Rejected::Ineligible);
        }
        let capacity = ctx.oracle.capacity(to);
        if dest.settled_count() >= capacity as usize {
            return Err(Rejected::Full { capacity });
        }

        self.remove(from, occupant);
        self.assign(to, occupant, ctx)
    }

    /// Release every occupant of `carrier`, primary first.
    ///
    /// In-transit entries are dropped without events.
    pub fn release_all(&mut self, carrier: CarrierId) -> Vec<(OccupantId, SlotKind)> {
        let Some(bag) = self.bag_mut(carrier) else {
            return Vec::new();
        };
        let transit = bag.in_transit();
        let released = bag.drain_settled();
        for occupant in transit {
            self.holders.remove(&occupant);
        }
        for &(occupant, slot) in &released {
            self.holders.remove(&occupant);
            self.emit_leave(carrier, occupant, slot);
        }
        if !released.is_empty() {
            self.touch(carrier, None);
        }
        released
    }

    /// Move a settled secondary occupant of `carrier` into the primary slot,
    /// demoting the current primary.
    ///
    /// Returns `false` without mutation if `occupant` is not a settled
    /// secondary of `carrier`.
    pub fn promote(&mut self, carrier: CarrierId, occupant: OccupantId) -> bool {
        let Some(bag) = self.bag(carrier) else {
            return false;
        };
        if bag.slot_of(occupant) != Some(SlotKind::Secondary) {
            return false;
        }
        let previous = bag.primary();
        self.set_primary(carrier, Some(occupant));
        if let Some(previous) = previous {
            self.emit_demote(carrier, previous);
        }
        self.emit_promote(carrier, occupant);
        self.touch(carrier, None);
        debug!(carrier = %carrier, occupant = %occupant, demoted = ?previous, "Occupant promoted");
        true
    }

    /// Update the owning player of `carrier`.
    pub fn set_owner(&mut self, carrier: CarrierId, owner: Option<PlayerId>) -> bool {
        let Some(bag) = self.bag_mut(carrier) else {
            return false;
        };
        bag.set_owner(owner);
        true
    }

    // -- transit ----------------------------------------------------------

    /// A thrown occupant landed; drop its dangling reservation.
    ///
    /// Returns `false` if the occupant had no in-transit entry.
    pub fn settle(&mut self, occupant: OccupantId) -> bool {
        let Some(carrier) = self.holder_of(occupant) else {
            return false;
        };
        let Some(bag) = self.bag_mut(carrier) else {
            return false;
        };
        if !matches!(bag.entry_state(occupant), Some(EntryState::InTransit { .. })) {
            return false;
        }
        bag.remove(occupant);
        self.holders.remove(&occupant);
        debug!(carrier = %carrier, occupant = %occupant, "Transit reservation settled");
        true
    }

    /// Drop in-transit entries older than the configured settle window.
    pub fn reclaim_expired(&mut self, now: u64) -> Vec<(CarrierId, OccupantId)> {
        let settle_ticks = self.config.transit_settle_ticks;
        let mut reclaimed = Vec::new();
        for slot in &mut self.arena {
            let Some(bag) = slot.bag.as_mut() else {
                continue;
            };
            let carrier = bag.carrier();
            reclaimed.extend(
                bag.take_expired_transit(now, settle_ticks)
                    .into_iter()
                    .map(|occupant| (carrier, occupant)),
            );
        }
        for (carrier, occupant) in &reclaimed {
            self.holders.remove(occupant);
            debug!(carrier = %carrier, occupant = %occupant, "Transit reservation expired");
        }
        StashCounters::add(&self.counters.transit_reclaimed, reclaimed.len() as u64);
        reclaimed
    }

    // -- capacity ---------------------------------------------------------

    /// Occupants that no longer fit after `carrier`'s capacity shrank,
    /// newest secondary first. The primary is listed only when capacity is 0.
    #[must_use]
    pub fn overflow(&self, carrier: CarrierId, oracle: &dyn CapacityOracle) -> Vec<OccupantId> {
        let Some(bag) = self.bag(carrier) else {
            return Vec::new();
        };
        let capacity = oracle.capacity(carrier) as usize;
        let mut excess = bag.settled_count().saturating_sub(capacity);
        if excess == 0 {
            return Vec::new();
        }

        let mut out: Vec<OccupantId> = bag.secondary().into_iter().rev().take(excess).collect();
        excess -= out.len();
        if excess > 0
            && let Some(primary) = bag.primary()
        {
            out.push(primary);
        }
        out
    }

    // -- outbox -----------------------------------------------------------

    /// Take all queued slot events.
    pub fn drain_events(&mut self) -> Vec<SlotEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Queued slot events.
    #[must_use]
    pub fn pending_events(&self) -> &[SlotEvent] {
        &self.outbox
    }

    /// Take the carriers mutated since the last call, with the direction of
    /// the last cycle applied to each (if any).
    pub fn take_dirty(&mut self) -> Vec<(CarrierId, Option<Direction>)> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Broadcastable read-state of `carrier`.
    #[must_use]
    pub fn snapshot(&self, carrier: CarrierId, direction: Option<Direction>) -> Option<SlotSnapshot> {
        let bag = self.bag(carrier)?;
        Some(SlotSnapshot {
            carrier,
            primary: bag.primary(),
            secondary: bag.secondary(),
            cycle_direction: direction,
            sequence: bag.revision(),
        })
    }

    pub(crate) fn touch(&mut self, carrier: CarrierId, direction: Option<Direction>) {
        if let Some(bag) = self.bag_mut(carrier) {
            bag.bump_revision();
        }
        let entry = self.dirty.entry(carrier).or_insert(None);
        if direction.is_some() {
            *entry = direction;
        }
    }

    pub(crate) fn emit_enter(&mut self, carrier: CarrierId, occupant: OccupantId, slot: SlotKind) {
        self.outbox.push(match slot {
            SlotKind::Primary => SlotEvent::DelegationGranted { carrier, occupant },
            SlotKind::Secondary => SlotEvent::Stashed { carrier, occupant },
        });
    }

    pub(crate) fn emit_leave(&mut self, carrier: CarrierId, occupant: OccupantId, slot: SlotKind) {
        self.outbox.push(match slot {
            SlotKind::Primary => SlotEvent::DelegationRevoked { carrier, occupant },
            SlotKind::Secondary => SlotEvent::Unstashed { carrier, occupant },
        });
        self.outbox.push(SlotEvent::Released { carrier, occupant });
    }

    /// Primary occupant moves down to a secondary slot.
    pub(crate) fn emit_demote(&mut self, carrier: CarrierId, occupant: OccupantId) {
        self.outbox.push(SlotEvent::DelegationRevoked { carrier, occupant });
        self.outbox.push(SlotEvent::Stashed { carrier, occupant });
    }

    /// Secondary occupant moves up to the primary slot.
    pub(crate) fn emit_promote(&mut self, carrier: CarrierId, occupant: OccupantId) {
        self.outbox.push(SlotEvent::Unstashed { carrier, occupant });
        self.outbox.push(SlotEvent::DelegationGranted { carrier, occupant });
    }

    pub(crate) fn forget_holder(&mut self, occupant: OccupantId) {
        self.holders.remove(&occupant);
    }

    // -- diagnostics ------------------------------------------------------

    /// Check the structural invariants of every bag.
    ///
    /// # Errors
    /// Returns a description of the first violation found.
    pub fn verify(&self, oracle: &dyn CapacityOracle) -> std::result::Result<(), String> {
        let mut seen: HashMap<OccupantId, CarrierId> = HashMap::new();
        for bag in self.arena.iter().filter_map(|slot| slot.bag.as_ref()) {
            let carrier = bag.carrier();
            let capacity = oracle.capacity(carrier) as usize;
            if bag.settled_count() > capacity {
                return Err(format!(
                    "carrier {carrier} holds {} settled occupants over capacity {capacity}",
                    bag.settled_count()
                ));
            }
            if let Some(primary) = bag.primary()
                && bag.entry_state(primary) != Some(EntryState::Settled)
            {
                return Err(format!("carrier {carrier} primary {primary} is not settled"));
            }
            for occupant in bag.settled().into_iter().chain(bag.in_transit()) {
                if let Some(other) = seen.insert(occupant, carrier) {
                    return Err(format!("occupant {occupant} tracked by {other} and {carrier}"));
                }
                if self.holders.get(&occupant) != Some(&carrier) {
                    return Err(format!("holder index out of sync for occupant {occupant}"));
                }
            }
        }
        if seen.len() != self.holders.len() {
            warn!(indexed = self.holders.len(), tracked = seen.len(), "Holder index has orphans");
            return Err("holder index has orphaned entries".to_string());
        }
        Ok(())
    }
}
