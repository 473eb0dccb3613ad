//! The per-carrier [`Bag`].
//!
//! A bag keeps its occupants in insertion order. The primary slot is a
//! pointer into that order; every other settled entry is a secondary slot.
//! Entries flagged in-transit (a thrown occupant that has not landed yet)
//! keep their place in the order but hold no slot and do not count toward
//! capacity.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{CarrierId, OccupantId, PlayerId, SlotKind};

/// Whether an entry occupies a slot or is between slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    /// Holds a slot and counts toward capacity.
    Settled,
    /// Thrown and not yet landed; a dangling reservation.
    InTransit {
        /// Tick at which the throw started.
        since: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    occupant: OccupantId,
    state: EntryState,
}

/// One carrier's inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bag {
    carrier: CarrierId,
    owner: Option<PlayerId>,
    entries: Vec<Entry>,
    primary: Option<OccupantId>,
    revision: u64,
}

impl Bag {
    /// Create an empty bag for `carrier`.
    #[must_use]
    pub fn new(carrier: CarrierId, owner: Option<PlayerId>) -> Self {
        Self {
            carrier,
            owner,
            entries: Vec::new(),
            primary: None,
            revision: 0,
        }
    }

    /// The carrier that owns this bag.
    #[must_use]
    pub fn carrier(&self) -> CarrierId {
        self.carrier
    }

    /// The player controlling the carrier, if any.
    #[must_use]
    pub fn owner(&self) -> Option<&PlayerId> {
        self.owner.as_ref()
    }

    /// Current primary occupant.
    #[must_use]
    pub fn primary(&self) -> Option<OccupantId> {
        self.primary
    }

    /// Settled occupants in insertion order (the cycling sequence).
    #[must_use]
    pub fn settled(&self) -> Vec<OccupantId> {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Settled)
            .map(|e| e.occupant)
            .collect()
    }

    /// Secondary occupants in insertion order.
    #[must_use]
    pub fn secondary(&self) -> Vec<OccupantId> {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Settled && Some(e.occupant) != self.primary)
            .map(|e| e.occupant)
            .collect()
    }

    /// Secondary occupants as a set.
    #[must_use]
    pub fn secondary_set(&self) -> HashSet<OccupantId> {
        self.secondary().into_iter().collect()
    }

    /// Occupants currently between slots.
    #[must_use]
    pub fn in_transit(&self) -> Vec<OccupantId> {
        self.entries
            .iter()
            .filter(|e| matches!(e.state, EntryState::InTransit { .. }))
            .map(|e| e.occupant)
            .collect()
    }

    /// Number of occupants counted against capacity.
    #[must_use]
    pub fn settled_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Settled)
            .count()
    }

    /// Number of occupied secondary slots.
    #[must_use]
    pub fn secondary_count(&self) -> usize {
        self.settled_count() - usize::from(self.primary.is_some())
    }

    /// Whether a secondary slot is free under `capacity`.
    ///
    /// A bag of capacity `c` has one primary slot and `c - 1` secondary slots.
    #[must_use]
    pub fn has_free_secondary(&self, capacity: u32) -> bool {
        (self.secondary_count() as u64) < u64::from(capacity.saturating_sub(1))
    }

    /// Whether the occupant has an entry here (settled or in transit).
    #[must_use]
    pub fn tracks(&self, occupant: OccupantId) -> bool {
        self.entries.iter().any(|e| e.occupant == occupant)
    }

    /// Slot held by `occupant`, `None` if absent or in transit.
    #[must_use]
    pub fn slot_of(&self, occupant: OccupantId) -> Option<SlotKind> {
        if self.primary == Some(occupant) {
            return Some(SlotKind::Primary);
        }
        self.entries
            .iter()
            .find(|e| e.occupant == occupant && e.state == EntryState::Settled)
            .map(|_| SlotKind::Secondary)
    }

    /// State of the occupant's entry.
    #[must_use]
    pub fn entry_state(&self, occupant: OccupantId) -> Option<EntryState> {
        self.entries
            .iter()
            .find(|e| e.occupant == occupant)
            .map(|e| e.state)
    }

    /// Monotonic mutation counter, used as the sync snapshot sequence.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True when the bag tracks nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ------------------------------------------------------------------
    // Mutation (registry only)
    // ------------------------------------------------------------------

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    pub(crate) fn set_owner(&mut self, owner: Option<PlayerId>) {
        self.owner = owner;
    }

    /// Append a settled entry.
    pub(crate) fn push_settled(&mut self, occupant: OccupantId, slot: SlotKind) {
        self.entries.push(Entry {
            occupant,
            state: EntryState::Settled,
        });
        if slot == SlotKind::Primary {
            self.primary = Some(occupant);
        }
    }

    /// Settle an in-transit entry in place, keeping its order position.
    pub(crate) fn resettle(&mut self, occupant: OccupantId, slot: SlotKind) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.occupant == occupant) else {
            return false;
        };
        entry.state = EntryState::Settled;
        if slot == SlotKind::Primary {
            self.primary = Some(occupant);
        }
        true
    }

    /// Remove an entry entirely, returning the slot it held.
    pub(crate) fn remove(&mut self, occupant: OccupantId) -> Option<Option<SlotKind>> {
        let idx = self.entries.iter().position(|e| e.occupant == occupant)?;
        let slot = self.slot_of(occupant);
        self.entries.remove(idx);
        if self.primary == Some(occupant) {
            self.primary = None;
        }
        Some(slot)
    }

    /// Flag an entry in-transit, vacating its slot.
    pub(crate) fn mark_in_transit(&mut self, occupant: OccupantId, tick: u64) -> Option<SlotKind> {
        let slot = self.slot_of(occupant);
        let entry = self.entries.iter_mut().find(|e| e.occupant == occupant)?;
        entry.state = EntryState::InTransit { since: tick };
        if self.primary == Some(occupant) {
            self.primary = None;
        }
        slot
    }

    pub(crate) fn set_primary(&mut self, occupant: Option<OccupantId>) {
        self.primary = occupant;
    }

    /// Drop in-transit entries older than `settle_ticks`.
    pub(crate) fn take_expired_transit(&mut self, now: u64, settle_ticks: u64) -> Vec<OccupantId> {
        let mut expired = Vec::new();
        self.entries.retain(|e| match e.state {
            EntryState::InTransit { since } if now.saturating_sub(since) >= settle_ticks => {
                expired.push(e.occupant);
                false
            }
            _ => true,
        });
        expired
    }

    /// Remove every entry, returning the settled occupants primary-first.
    pub(crate) fn drain_settled(&mut self) -> Vec<(OccupantId, SlotKind)> {
        let mut out = Vec::with_capacity(self.entries.len());
        if let Some(primary) = self.primary {
            out.push((primary, SlotKind::Primary));
        }
        out.extend(
            self.secondary()
                .into_iter()
                .map(|occ| (occ, SlotKind::Secondary)),
        );
        self.entries.clear();
        self.primary = None;
        out
    }
}
