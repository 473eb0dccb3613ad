//! Eviction of occupants on death, destruction, ejection or throw.
//!
//! A thrown occupant keeps a dangling in-transit entry until it lands or the
//! settle window expires; every other reason frees the slot immediately.
//! The entry holds no slot, so any carrier may catch the occupant in flight.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bag::EntryState;
use crate::metrics::StashCounters;
use crate::registry::SlotRegistry;
use crate::types::{CarrierId, OccupantId, SlotKind};

/// Why an occupant is leaving its bag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvictionReason {
    /// The occupant died.
    Died,
    /// The occupant was destroyed.
    Destroyed,
    /// Something outside the carrier pulled it out (including capacity overflow).
    ExternalEject,
    /// The carrier threw it; it is mid-transit until it lands.
    ManualThrow,
}

impl EvictionReason {
    /// Whether the evicted occupant stays tracked while in motion.
    #[must_use]
    pub fn holds_transit(self) -> bool {
        matches!(self, Self::ManualThrow)
    }
}

/// What an eviction changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionOutcome {
    /// Carrier the occupant left.
    pub carrier: CarrierId,
    /// Slot it held.
    pub slot: SlotKind,
    /// Secondary occupant auto-promoted into the vacated primary slot.
    pub promoted: Option<OccupantId>,
    /// Whether an in-transit entry was left behind.
    pub transit_held: bool,
}

impl SlotRegistry {
    /// Evict `occupant` from `carrier`'s bag.
    ///
    /// Returns `None` (a no-op) when the occupant holds no slot there. An
    /// in-transit entry evicted for any reason other than a throw is dropped.
    pub fn evict(
        &mut self,
        carrier: CarrierId,
        occupant: OccupantId,
        reason: EvictionReason,
        tick: u64,
    ) -> Option<EvictionOutcome> {
        let auto_promote = self.config().auto_promote_on_evict;
        let bag = self.bag_mut(carrier)?;

        let slot = match bag.entry_state(occupant)? {
            EntryState::InTransit { .. } => {
                if !reason.holds_transit() {
                    bag.remove(occupant);
                    self.forget_holder(occupant);
                    debug!(carrier = %carrier, occupant = %occupant, ?reason, "In-transit occupant dropped");
                }
                return None;
            }
            EntryState::Settled => {
                if reason.holds_transit() {
                    bag.mark_in_transit(occupant, tick)?
                } else {
                    let slot = bag.remove(occupant).flatten()?;
                    self.forget_holder(occupant);
                    slot
                }
            }
        };
        self.emit_leave(carrier, occupant, slot);

        let mut promoted = None;
        if slot == SlotKind::Primary && auto_promote {
            promoted = self.bag(carrier).and_then(|bag| bag.secondary().first().copied());
            if let Some(next) = promoted {
                self.set_primary(carrier, Some(next));
                self.emit_promote(carrier, next);
                StashCounters::add(&self.counters().auto_promotions, 1);
            }
        }
        self.touch(carrier, None);
        StashCounters::add(&self.counters().evictions, 1);

        debug!(
            carrier = %carrier,
            occupant = %occupant,
            ?reason,
            slot = %slot,
            promoted = ?promoted,
            "Occupant evicted"
        );
        Some(EvictionOutcome {
            carrier,
            slot,
            promoted,
            transit_held: reason.holds_transit(),
        })
    }

    /// Evict `occupant` from whichever bag tracks it.
    pub fn evict_everywhere(
        &mut self,
        occupant: OccupantId,
        reason: EvictionReason,
        tick: u64,
    ) -> Option<EvictionOutcome> {
        let carrier = self.holder_of(occupant)?;
        self.evict(carrier, occupant, reason, tick)
    }
}
