//! Circular cycling through a carrier's occupants.
//!
//! The settled occupants in insertion order, plus one virtual empty position
//! at the end, form a ring of `N + 1` positions. The current position is the
//! primary occupant's index, or the empty position when the primary slot is
//! unoccupied. A cycle moves one step around the ring.
//!
//! The empty position is only reachable when demoting the primary leaves it a
//! secondary slot to go to, i.e. when `N < capacity`. Otherwise it is skipped.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::StashCounters;
use crate::registry::{SlotContext, SlotRegistry};
use crate::types::{CarrierId, Direction, OccupantId};

/// Result of one cycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// The primary slot was empty; a secondary occupant was promoted.
    AssignFromEmpty {
        /// New primary.
        promoted: OccupantId,
    },
    /// Primary and a secondary occupant exchanged slots.
    Swap {
        /// Old primary, now secondary.
        demoted: OccupantId,
        /// Old secondary, now primary.
        promoted: OccupantId,
    },
    /// The primary occupant moved to a free secondary slot.
    DemoteToEmpty {
        /// Old primary.
        demoted: OccupantId,
    },
    /// Nothing to cycle to.
    NoOp,
}

impl Transition {
    /// Whether slot state changed.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }
}

/// Pure ring arithmetic: the position after one step from `current`.
///
/// Positions `0..len` are occupants and `len` is the empty position.
fn next_position(current: usize, len: usize, direction: Direction, empty_allowed: bool) -> usize {
    let ring = len + 1;
    let step = |pos: usize| match direction {
        Direction::Forward => (pos + 1) % ring,
        Direction::Backward => (pos + ring - 1) % ring,
    };
    let next = step(current);
    if next == len && !empty_allowed {
        step(next)
    } else {
        next
    }
}

impl SlotRegistry {
    /// Advance `carrier`'s primary slot one step in `direction`.
    ///
    /// The swap is applied in one step: no intermediate state with two
    /// primaries or a spuriously empty bag is ever observable.
    pub fn cycle(&mut self, carrier: CarrierId, direction: Direction, ctx: &SlotContext<'_>) -> Transition {
        let start = Instant::now();
        let transition = self.plan_cycle(carrier, direction, ctx);

        match transition {
            Transition::NoOp => return transition,
            Transition::AssignFromEmpty { promoted } => {
                self.set_primary(carrier, Some(promoted));
                self.emit_promote(carrier, promoted);
            }
            Transition::Swap { demoted, promoted } => {
                self.set_primary(carrier, Some(promoted));
                self.emit_demote(carrier, demoted);
                self.emit_promote(carrier, promoted);
            }
            Transition::DemoteToEmpty { demoted } => {
                self.set_primary(carrier, None);
                self.emit_demote(carrier, demoted);
            }
        }
        self.touch(carrier, Some(direction));
        StashCounters::add(&self.counters().cycles, 1);

        debug!(
            carrier = %carrier,
            ?direction,
            ?transition,
            elapsed_us = start.elapsed().as_micros(),
            "Cycled"
        );
        transition
    }

    /// Compute the transition `cycle` would apply, without applying it.
    #[must_use]
    pub fn plan_cycle(&self, carrier: CarrierId, direction: Direction, ctx: &SlotContext<'_>) -> Transition {
        let Some(bag) = self.bag(carrier) else {
            return Transition::NoOp;
        };
        let sequence = bag.settled();
        let len = sequence.len();
        if len == 0 {
            return Transition::NoOp;
        }

        let capacity = ctx.oracle.capacity(carrier) as usize;
        let empty_allowed = len < capacity;
        let current = bag
            .primary()
            .and_then(|p| sequence.iter().position(|&o| o == p))
            .unwrap_or(len);
        let next = next_position(current, len, direction, empty_allowed);

        match (current == len, next == len) {
            _ if next == current => Transition::NoOp,
            (true, false) => Transition::AssignFromEmpty {
                promoted: sequence[next],
            },
            (false, true) => Transition::DemoteToEmpty {
                demoted: sequence[current],
            },
            (false, false) => Transition::Swap {
                demoted: sequence[current],
                promoted: sequence[next],
            },
            (true, true) => Transition::NoOp,
        }
    }

    pub(crate) fn set_primary(&mut self, carrier: CarrierId, occupant: Option<OccupantId>) {
        if let Some(bag) = self.bag_mut(carrier) {
            bag.set_primary(occupant);
        }
    }
}
