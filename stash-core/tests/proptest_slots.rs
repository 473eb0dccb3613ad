//! Property-based tests for slot invariants.
//!
//! Random sequences of grabs, cycles, evictions, throws and capacity changes
//! must never break the capacity bound or place one occupant in two slots,
//! and a forward/backward cycle pair must be a round trip.

use std::collections::HashSet;

use proptest::prelude::*;

use stash_core::config::SlotConfig;
use stash_core::eviction::EvictionReason;
use stash_core::hooks::{AllEligible, FixedCapacity};
use stash_core::registry::{SlotContext, SlotRegistry};
use stash_core::types::{CarrierId, Direction, OccupantId};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Grab { carrier: usize, occupant: usize },
    Cycle { carrier: usize, forward: bool },
    Evict { occupant: usize },
    Throw { occupant: usize },
    Settle { occupant: usize },
    Shrink { capacity: u32 },
    Tick,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..2usize, 0..6usize).prop_map(|(carrier, occupant)| Op::Grab { carrier, occupant }),
        3 => (0..2usize, any::<bool>()).prop_map(|(carrier, forward)| Op::Cycle { carrier, forward }),
        1 => (0..6usize).prop_map(|occupant| Op::Evict { occupant }),
        1 => (0..6usize).prop_map(|occupant| Op::Throw { occupant }),
        1 => (0..6usize).prop_map(|occupant| Op::Settle { occupant }),
        1 => (1..5u32).prop_map(|capacity| Op::Shrink { capacity }),
        1 => Just(Op::Tick),
    ]
}

struct Harness {
    registry: SlotRegistry,
    carriers: [CarrierId; 2],
    occupants: Vec<OccupantId>,
    capacity: u32,
    tick: u64,
}

impl Harness {
    fn new(capacity: u32) -> Self {
        let mut registry = SlotRegistry::new(SlotConfig {
            transit_settle_ticks: 3,
            ..SlotConfig::default()
        });
        let carriers = [CarrierId::new(), CarrierId::new()];
        for c in carriers {
            registry.register_carrier(c, None);
        }
        Self {
            registry,
            carriers,
            occupants: (0..6).map(|_| OccupantId::new()).collect(),
            capacity,
            tick: 0,
        }
    }

    fn apply(&mut self, op: &Op) {
        let oracle = FixedCapacity(self.capacity);
        let ctx = SlotContext::new(&oracle, &AllEligible, self.tick);
        match *op {
            Op::Grab { carrier, occupant } => {
                let _ = self.registry.assign(self.carriers[carrier], self.occupants[occupant], &ctx);
            }
            Op::Cycle { carrier, forward } => {
                let direction = if forward { Direction::Forward } else { Direction::Backward };
                self.registry.cycle(self.carriers[carrier], direction, &ctx);
            }
            Op::Evict { occupant } => {
                self.registry
                    .evict_everywhere(self.occupants[occupant], EvictionReason::Died, self.tick);
            }
            Op::Throw { occupant } => {
                self.registry
                    .evict_everywhere(self.occupants[occupant], EvictionReason::ManualThrow, self.tick);
            }
            Op::Settle { occupant } => {
                self.registry.settle(self.occupants[occupant]);
            }
            Op::Shrink { capacity } => {
                // Mirrors the host's overflow step after a capacity change.
                self.capacity = capacity;
                let oracle = FixedCapacity(capacity);
                for carrier in self.carriers {
                    for occupant in self.registry.overflow(carrier, &oracle) {
                        self.registry.evict(carrier, occupant, EvictionReason::ExternalEject, self.tick);
                    }
                }
            }
            Op::Tick => {
                self.tick += 1;
                self.registry.reclaim_expired(self.tick);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Property: capacity bound and exclusive placement hold after every step
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn invariants_hold_under_random_ops(
        capacity in 1..5u32,
        ops in proptest::collection::vec(arb_op(), 1..80),
    ) {
        let mut h = Harness::new(capacity);
        for op in &ops {
            h.apply(op);
            let oracle = FixedCapacity(h.capacity);
            prop_assert!(h.registry.verify(&oracle).is_ok(), "after {:?}: {:?}", op, h.registry.verify(&oracle));

            let mut seen = HashSet::new();
            for carrier in h.carriers {
                let bag = h.registry.bag(carrier).expect("registered");
                prop_assert!(bag.settled_count() <= h.capacity as usize);
                for occupant in bag.settled().into_iter().chain(bag.in_transit()) {
                    prop_assert!(seen.insert(occupant), "occupant in two bags");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Property: forward then backward restores the assignment
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn cycle_round_trip(
        capacity in 1..6u32,
        occupants in 1..6usize,
        pre_cycles in 0..6usize,
        forward_first in any::<bool>(),
    ) {
        let mut h = Harness::new(capacity);
        let carrier = h.carriers[0];
        for i in 0..occupants.min(capacity as usize) {
            h.apply(&Op::Grab { carrier: 0, occupant: i });
        }
        for _ in 0..pre_cycles {
            h.apply(&Op::Cycle { carrier: 0, forward: true });
        }

        let before = (h.registry.primary_of(carrier), h.registry.secondary_set_of(carrier));
        h.apply(&Op::Cycle { carrier: 0, forward: forward_first });
        h.apply(&Op::Cycle { carrier: 0, forward: !forward_first });
        let after = (h.registry.primary_of(carrier), h.registry.secondary_set_of(carrier));
        prop_assert_eq!(before, after);
    }
}

// ---------------------------------------------------------------------------
// Property: evicting an untracked occupant changes nothing
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn evicting_untracked_is_noop(grabs in 0..4usize) {
        let mut h = Harness::new(3);
        for i in 0..grabs {
            h.apply(&Op::Grab { carrier: 0, occupant: i });
        }
        let revision = h.registry.bag(h.carriers[0]).expect("bag").revision();
        let stranger = OccupantId::new();
        prop_assert!(h.registry.evict_everywhere(stranger, EvictionReason::Destroyed, 0).is_none());
        prop_assert!(h.registry.evict(h.carriers[0], stranger, EvictionReason::Died, 0).is_none());
        prop_assert_eq!(h.registry.bag(h.carriers[0]).expect("bag").revision(), revision);
    }
}
