//! Integration tests: end-to-end carrier flows.
//!
//! Grab, cycle, evict, capture on world exit and rehydrate on world enter,
//! driven through the public API the way a host tick loop would.

use std::collections::HashMap;
use std::sync::Arc;

use stash_core::config::{SeekerConfig, SlotConfig, TransitionConfig};
use stash_core::error::Rejected;
use stash_core::eviction::EvictionReason;
use stash_core::hooks::{AllEligible, AttachError, CarrierPresence, FixedCapacity, WorldGraph};
use stash_core::metrics::StashCounters;
use stash_core::registry::{SlotContext, SlotEvent, SlotRegistry};
use stash_core::scene::{SceneTransitionCoordinator, WorldReadySignal};
use stash_core::seeker::Placement;
use stash_core::sync::{LoopbackChannel, MirrorState, SyncMessage, SyncPort};
use stash_core::types::{CarrierId, Direction, Location, OccupantId, PlayerId, Role, SceneId, SlotKind, TransitionHandle};
use stash_core::Transition;

// ---------------------------------------------------------------------------
// A minimal world
// ---------------------------------------------------------------------------

#[derive(Default)]
struct World {
    next_handle: u64,
    live: HashMap<OccupantId, Location>,
    held: HashMap<TransitionHandle, OccupantId>,
    carriers: Vec<CarrierPresence>,
}

impl World {
    fn spawn(&mut self, occupant: OccupantId) {
        self.live.insert(occupant, Location::ORIGIN);
    }
}

impl WorldGraph for World {
    fn detach(&mut self, occupant: OccupantId) -> Option<TransitionHandle> {
        self.live.remove(&occupant)?;
        self.next_handle += 1;
        let handle = TransitionHandle(self.next_handle);
        self.held.insert(handle, occupant);
        Some(handle)
    }

    fn attach(&mut self, occupant: OccupantId, handle: TransitionHandle, position: Location) -> Result<(), AttachError> {
        match self.held.remove(&handle) {
            Some(held) if held == occupant => {
                self.live.insert(occupant, position);
                Ok(())
            }
            _ => Err(AttachError::Unresolvable),
        }
    }

    fn reposition(&mut self, occupant: OccupantId, position: Location) -> bool {
        self.live.get_mut(&occupant).map(|p| *p = position).is_some()
    }

    fn carriers(&self) -> Vec<CarrierPresence> {
        self.carriers.clone()
    }
}

fn ctx(oracle: &FixedCapacity, tick: u64) -> SlotContext<'_> {
    SlotContext::new(oracle, &AllEligible, tick)
}

fn coordinator(role: Role, counters: Arc<StashCounters>) -> SceneTransitionCoordinator {
    let config = TransitionConfig {
        world_ready_timeout_ticks: 20,
        auto_grab_settle_ticks: 5,
        ..TransitionConfig::default()
    };
    SceneTransitionCoordinator::new(
        role,
        config.clone(),
        SeekerConfig {
            timeout_ticks: 100,
            poll_interval_ticks: 5,
        },
        counters,
    )
    .with_placement(Placement::seeded(&config, 42))
}

// ---------------------------------------------------------------------------
// Slot scenarios
// ---------------------------------------------------------------------------

#[test]
fn capacity_one_rejects_second_grab() {
    let mut registry = SlotRegistry::new(SlotConfig::default());
    let oracle = FixedCapacity(1);
    let carrier = CarrierId::new();
    registry.register_carrier(carrier, None);
    let (a, b) = (OccupantId::new(), OccupantId::new());

    assert_eq!(registry.assign(carrier, a, &ctx(&oracle, 0)), Ok(SlotKind::Primary));
    assert_eq!(
        registry.assign(carrier, b, &ctx(&oracle, 0)),
        Err(Rejected::Full { capacity: 1 })
    );
    assert_eq!(registry.primary_of(carrier), Some(a));
    assert!(registry.secondary_set_of(carrier).is_empty());
}

#[test]
fn cycling_from_empty_promotes_first_grabbed() {
    let mut registry = SlotRegistry::new(SlotConfig::default());
    let oracle = FixedCapacity(3);
    let carrier = CarrierId::new();
    registry.register_carrier(carrier, None);
    let (a, b) = (OccupantId::new(), OccupantId::new());

    assert_eq!(registry.assign(carrier, a, &ctx(&oracle, 0)), Ok(SlotKind::Secondary));
    assert_eq!(registry.assign(carrier, b, &ctx(&oracle, 0)), Ok(SlotKind::Secondary));
    assert_eq!(registry.primary_of(carrier), None);

    let t = registry.cycle(carrier, Direction::Forward, &ctx(&oracle, 1));
    assert_eq!(t, Transition::AssignFromEmpty { promoted: a });
    assert_eq!(registry.primary_of(carrier), Some(a));
    assert_eq!(registry.secondary_set_of(carrier).into_iter().collect::<Vec<_>>(), vec![b]);
}

#[test]
fn swapping_twice_restores_original() {
    let mut registry = SlotRegistry::new(SlotConfig::default());
    let oracle = FixedCapacity(2);
    let carrier = CarrierId::new();
    registry.register_carrier(carrier, None);
    let (a, b) = (OccupantId::new(), OccupantId::new());

    registry.assign(carrier, a, &ctx(&oracle, 0)).expect("a");
    registry.cycle(carrier, Direction::Forward, &ctx(&oracle, 0));
    registry.assign(carrier, b, &ctx(&oracle, 0)).expect("b");
    assert_eq!(registry.primary_of(carrier), Some(a));
    registry.drain_events();

    let first = registry.cycle(carrier, Direction::Forward, &ctx(&oracle, 1));
    assert_eq!(first, Transition::Swap { demoted: a, promoted: b });
    assert_eq!(registry.primary_of(carrier), Some(b));
    assert!(registry.secondary_set_of(carrier).contains(&a));

    let second = registry.cycle(carrier, Direction::Forward, &ctx(&oracle, 2));
    assert_eq!(second, Transition::Swap { demoted: b, promoted: a });
    assert_eq!(registry.primary_of(carrier), Some(a));
    assert!(registry.secondary_set_of(carrier).contains(&b));

    let events = registry.drain_events();
    assert_eq!(
        events[..4],
        [
            SlotEvent::DelegationRevoked { carrier, occupant: a },
            SlotEvent::Stashed { carrier, occupant: a },
            SlotEvent::Unstashed { carrier, occupant: b },
            SlotEvent::DelegationGranted { carrier, occupant: b },
        ]
    );
}

#[test]
fn eviction_is_idempotent_and_promotes() {
    let mut registry = SlotRegistry::new(SlotConfig::default());
    let oracle = FixedCapacity(3);
    let carrier = CarrierId::new();
    registry.register_carrier(carrier, None);
    let (a, b, c) = (OccupantId::new(), OccupantId::new(), OccupantId::new());
    for o in [a, b, c] {
        registry.assign(carrier, o, &ctx(&oracle, 0)).expect("grab");
    }
    assert_eq!(registry.primary_of(carrier), Some(c));

    let outcome = registry
        .evict(carrier, c, EvictionReason::Died, 1)
        .expect("evicted");
    assert_eq!(outcome.promoted, Some(a));
    assert!(registry.evict(carrier, c, EvictionReason::Died, 2).is_none());
    assert!(registry.evict_everywhere(OccupantId::new(), EvictionReason::Destroyed, 2).is_none());
    registry.verify(&oracle).expect("invariants");
}

#[test]
fn occupant_cannot_sit_in_two_bags() {
    let mut registry = SlotRegistry::new(SlotConfig::default());
    let oracle = FixedCapacity(2);
    let (c1, c2) = (CarrierId::new(), CarrierId::new());
    registry.register_carrier(c1, Some(PlayerId::new("p1")));
    registry.register_carrier(c2, Some(PlayerId::new("p2")));
    let a = OccupantId::new();

    registry.assign(c1, a, &ctx(&oracle, 0)).expect("grab");
    assert_eq!(
        registry.assign(c2, a, &ctx(&oracle, 0)),
        Err(Rejected::AlreadyElsewhere { holder: c1 })
    );
    registry.transfer(c1, c2, a, &ctx(&oracle, 1)).expect("transfer");
    assert_eq!(registry.holder_of(a), Some(c2));
    assert!(registry.bag(c1).expect("bag").is_empty());
}

// ---------------------------------------------------------------------------
// World transitions
// ---------------------------------------------------------------------------

fn bagged_pair(registry: &mut SlotRegistry, world: &mut World, carrier: CarrierId) -> (OccupantId, OccupantId) {
    let oracle = FixedCapacity(2);
    let (a, b) = (OccupantId::new(), OccupantId::new());
    world.spawn(a);
    world.spawn(b);
    registry.assign(carrier, a, &ctx(&oracle, 0)).expect("a");
    registry.cycle(carrier, Direction::Forward, &ctx(&oracle, 0));
    registry.assign(carrier, b, &ctx(&oracle, 0)).expect("b");
    (a, b)
}

#[test]
fn capture_then_rehydrate_beside_present_owner() {
    let counters = Arc::new(StashCounters::new());
    let mut registry = SlotRegistry::with_counters(SlotConfig::default(), Arc::clone(&counters));
    let mut coordinator = coordinator(Role::Host, Arc::clone(&counters));
    let mut world = World::default();
    let owner = PlayerId::new("p1");
    let carrier = CarrierId::new();
    registry.register_carrier(carrier, Some(owner.clone()));
    let (a, b) = bagged_pair(&mut registry, &mut world, carrier);
    let primary_before = registry.primary_of(carrier);
    assert!(primary_before.is_some());

    let records = coordinator
        .capture(&mut registry, carrier, &SceneId::new("Level_1"), &mut world, 10)
        .expect("capture");
    assert_eq!(records.len(), 2);
    assert_eq!(coordinator.store().owned_by(&owner).count(), 2);

    world.carriers.push(CarrierPresence {
        carrier,
        player: Some(owner),
        position: Location::new(10.0, 0.0, 10.0),
    });
    coordinator.rehydrate(WorldReadySignal {
        scene: SceneId::new("Level_2"),
        tick: 20,
    });

    let oracle = FixedCapacity(2);
    let mut report = None;
    for tick in 20..40 {
        if let Some(r) = coordinator.tick(&mut registry, &mut world, &ctx(&oracle, tick)) {
            report = Some(r);
        }
    }
    let report = report.expect("rehydration finished");
    assert_eq!(report.reattached, 2);
    assert!(!report.is_partial());
    assert!(coordinator.store().is_empty());
    assert_eq!(registry.holder_of(a), Some(carrier));
    assert_eq!(registry.holder_of(b), Some(carrier));
    assert!(world.live[&a].distance(&Location::new(10.0, 0.0, 10.0)).0 < 3.0);
    assert_eq!(registry.primary_of(carrier), primary_before);
    registry.verify(&oracle).expect("invariants");

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.captured, 2);
    assert_eq!(snapshot.rehydrated, 2);
}

#[test]
fn absent_owner_seeker_relocates_or_times_out() {
    let counters = Arc::new(StashCounters::new());
    let mut registry = SlotRegistry::with_counters(SlotConfig::default(), Arc::clone(&counters));
    let mut coordinator = coordinator(Role::Host, Arc::clone(&counters));
    let mut world = World::default();
    let (p1, p2) = (PlayerId::new("p1"), PlayerId::new("p2"));
    let (c1, c2) = (CarrierId::new(), CarrierId::new());
    registry.register_carrier(c1, Some(p1.clone()));
    registry.register_carrier(c2, Some(p2.clone()));

    let oracle = FixedCapacity(2);
    let (a, b) = (OccupantId::new(), OccupantId::new());
    world.spawn(a);
    world.spawn(b);
    registry.assign(c1, a, &ctx(&oracle, 0)).expect("a");
    registry.assign(c2, b, &ctx(&oracle, 0)).expect("b");
    coordinator
        .capture_all(&mut registry, &SceneId::new("Level_1"), &mut world, 0)
        .expect("capture");

    // Only a stranger is present: both owners are absent.
    world.carriers.push(CarrierPresence {
        carrier: CarrierId::new(),
        player: Some(PlayerId::new("stranger")),
        position: Location::new(-50.0, 0.0, 0.0),
    });
    coordinator.rehydrate(WorldReadySignal {
        scene: SceneId::new("Level_2"),
        tick: 0,
    });
    let oracle = FixedCapacity(2);
    let report = coordinator
        .tick(&mut registry, &mut world, &ctx(&oracle, 0))
        .expect("single slice");
    assert_eq!(report.seeking, 2);
    assert_eq!(coordinator.seekers().len(), 2);

    // p1 arrives before the timeout; p2 never does.
    world.carriers.push(CarrierPresence {
        carrier: c1,
        player: Some(p1),
        position: Location::new(40.0, 0.0, 0.0),
    });
    for tick in 1..=120 {
        coordinator.tick(&mut registry, &mut world, &ctx(&oracle, tick));
    }

    assert!(coordinator.seekers().is_empty());
    assert!(world.live[&a].x > 35.0);
    assert_eq!(registry.holder_of(a), Some(c1));
    assert!(world.live[&b].distance(&Location::ORIGIN).0 < 2.0);
    assert_eq!(registry.holder_of(b), None);
    assert_eq!(counters.snapshot().seekers_timed_out, 1);
}

#[test]
fn host_snapshots_reach_client_mirror() {
    let mut registry = SlotRegistry::new(SlotConfig::default());
    let oracle = FixedCapacity(2);
    let carrier = CarrierId::new();
    registry.register_carrier(carrier, None);
    let (a, b) = (OccupantId::new(), OccupantId::new());
    registry.assign(carrier, a, &ctx(&oracle, 0)).expect("a");
    registry.cycle(carrier, Direction::Forward, &ctx(&oracle, 0));
    registry.assign(carrier, b, &ctx(&oracle, 0)).expect("b");

    let (host_end, client_end) = LoopbackChannel::pair();
    let mut host = SyncPort::new(host_end, Default::default());
    let mut client = SyncPort::new(client_end, Default::default());
    for (c, direction) in registry.take_dirty() {
        let snapshot = registry.snapshot(c, direction).expect("snapshot");
        host.broadcast(&SyncMessage::Snapshot(snapshot)).expect("broadcast");
    }

    let mut mirror = MirrorState::new(64);
    for msg in client.drain() {
        mirror.apply(msg);
    }
    assert_eq!(mirror.primary_of(carrier), Some(a));
    assert_eq!(mirror.secondary_of(carrier), vec![b]);
}
