//! World-transition capture and rehydration.
//!
//! ```text
//!  world exit                           world enter
//!  ──────────                           ───────────
//!  capture(carrier)                     rehydrate(signal)
//!    detach each occupant                 WaitingForWorld ── carrier present / budget spent
//!    record + tag with owner                    │
//!    broadcast ownership tags             Reattaching ── records_per_tick each tick
//!                                               │  owner present → place beside it (+ auto-grab)
//!                                               │  owner absent  → neutral spot + seeker
//!                                               │  attach fails  → log, drop record
//!                                             Idle (report)
//! ```
//!
//! Only the host captures and re-assigns slots. Other participants receive
//! the ownership broadcast, detach their local copies with
//! [`SceneTransitionCoordinator::adopt_mirrored`], and rehydrate the same way
//! without ever touching slots.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{SeekerConfig, TransitionConfig};
use crate::error::{RehydrationFailure, Result, StashError};
use crate::hooks::{AttachError, WorldGraph};
use crate::journal::TransitJournal;
use crate::metrics::StashCounters;
use crate::persistence::{OwnershipTag, PersistenceRecord, PersistenceStore};
use crate::registry::{SlotContext, SlotRegistry};
use crate::seeker::{Placement, SeekOutcome, SeekerPool, resolve_target};
use crate::sync::SyncMessage;
use crate::tasks::{TaskPoll, TimeSlicedScan, WorldReady, WorldReadyWait};
use crate::types::{CarrierId, GameTimestamp, OccupantId, Role, SceneId, SlotKind};

/// Raised by the host when a new world has been entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldReadySignal {
    /// The entered scene.
    pub scene: SceneId,
    /// Tick of entry.
    pub tick: u64,
}

/// Summary of one rehydration pass.
///
/// Any recorded failure makes the pass partial; failed records have already
/// been dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RehydrationReport {
    /// Records reattached into the world.
    pub reattached: usize,
    /// Records placed next to their owner right away.
    pub delivered: usize,
    /// Records handed to a seeker.
    pub seeking: usize,
    /// Auto-grabs scheduled.
    pub grabs_scheduled: usize,
    /// Whether the world-ready wait ran out before a carrier appeared.
    pub waited_out: bool,
    /// Records that could not be reattached.
    pub failures: Vec<RehydrationFailure>,
}

impl RehydrationReport {
    /// Whether some records could not be reattached.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    WaitingForWorld {
        signal: WorldReadySignal,
        wait: WorldReadyWait,
    },
    Reattaching {
        signal: WorldReadySignal,
        scan: TimeSlicedScan<OccupantId>,
        report: RehydrationReport,
        started: Instant,
    },
}

/// An auto-grab waiting for its settle delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingGrab {
    /// The occupant to re-bag.
    pub occupant: OccupantId,
    /// The carrier to put it in.
    pub carrier: CarrierId,
    /// Tick at which to grab.
    pub due: u64,
    /// Slot held before capture. A former primary is restored to primary
    /// once grabbed; `None` when the slot is unknown.
    pub slot: Option<SlotKind>,
}

/// Orchestrates capture on world exit and rehydration on world enter.
#[derive(Debug)]
pub struct SceneTransitionCoordinator {
    role: Role,
    config: TransitionConfig,
    store: PersistenceStore,
    journal: Option<TransitJournal>,
    seekers: SeekerPool,
    placement: Placement,
    phase: Phase,
    pending_grabs: Vec<PendingGrab>,
    broadcasts: Vec<SyncMessage>,
    counters: Arc<StashCounters>,
}

impl SceneTransitionCoordinator {
    /// Create a coordinator for `role`.
    #[must_use]
    pub fn new(
        role: Role,
        config: TransitionConfig,
        seeker: SeekerConfig,
        counters: Arc<StashCounters>,
    ) -> Self {
        Self {
            role,
            placement: Placement::new(&config),
            config,
            store: PersistenceStore::new(),
            journal: None,
            seekers: SeekerPool::new(seeker, Arc::clone(&counters)),
            phase: Phase::Idle,
            pending_grabs: Vec::new(),
            broadcasts: Vec::new(),
            counters,
        }
    }

    /// Use deterministic placement scatter.
    #[must_use]
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Checkpoint captures into `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: TransitJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Participant role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Records awaiting rehydration.
    #[must_use]
    pub fn store(&self) -> &PersistenceStore {
        &self.store
    }

    /// Active seekers.
    #[must_use]
    pub fn seekers(&self) -> &SeekerPool {
        &self.seekers
    }

    /// Scheduled auto-grabs.
    #[must_use]
    pub fn pending_grabs(&self) -> &[PendingGrab] {
        &self.pending_grabs
    }

    /// Whether a rehydration pass is in progress.
    #[must_use]
    pub fn is_rehydrating(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Take queued sync broadcasts.
    pub fn drain_broadcasts(&mut self) -> Vec<SyncMessage> {
        std::mem::take(&mut self.broadcasts)
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    /// Capture `carrier`'s occupants into the holding area.
    ///
    /// Occupants are detached primary first, tagged with the carrier's owner
    /// and removed from the bag. An occupant the world refuses to detach stays
    /// bagged. In-transit occupants are not captured.
    ///
    /// # Errors
    /// Returns [`StashError::NotAuthoritative`] on non-host roles and
    /// [`StashError::CarrierNotFound`] for unknown carriers. Journal failures
    /// are logged, not returned.
    pub fn capture(
        &mut self,
        registry: &mut SlotRegistry,
        carrier: CarrierId,
        scene: &SceneId,
        world: &mut dyn WorldGraph,
        tick: u64,
    ) -> Result<Vec<PersistenceRecord>> {
        if !self.role.is_authoritative() {
            return Err(StashError::NotAuthoritative("capture"));
        }
        let bag = registry.bag(carrier).ok_or(StashError::CarrierNotFound(carrier))?;
        let owner = bag.owner().cloned();
        let mut occupants: Vec<(OccupantId, SlotKind)> = bag
            .primary()
            .map(|p| (p, SlotKind::Primary))
            .into_iter()
            .collect();
        occupants.extend(bag.secondary().into_iter().map(|o| (o, SlotKind::Secondary)));

        let mut records = Vec::with_capacity(occupants.len());
        for (occupant, slot) in occupants {
            let Some(handle) = world.detach(occupant) else {
                warn!(carrier = %carrier, occupant = %occupant, "World refused detach, occupant stays bagged");
                continue;
            };
            registry.remove(carrier, occupant);
            let record = PersistenceRecord {
                occupant,
                tag: OwnershipTag {
                    occupant,
                    owner: owner.clone(),
                },
                captured_scene: scene.clone(),
                handle,
                slot: Some(slot),
                captured_at: GameTimestamp::now(tick),
            };
            self.store.insert(record.clone());
            records.push(record);
        }

        if !records.is_empty() {
            StashCounters::add(&self.counters.captured, records.len() as u64);
            self.broadcasts.push(SyncMessage::OwnershipTags {
                scene: scene.clone(),
                tags: records.iter().map(|r| r.tag.clone()).collect(),
            });
            self.checkpoint();
        }
        info!(
            carrier = %carrier,
            scene = %scene,
            owner = ?owner,
            captured = records.len(),
            "Carrier captured for world exit"
        );
        Ok(records)
    }

    /// Capture every registered carrier.
    ///
    /// # Errors
    /// Returns [`StashError::NotAuthoritative`] on non-host roles.
    pub fn capture_all(
        &mut self,
        registry: &mut SlotRegistry,
        scene: &SceneId,
        world: &mut dyn WorldGraph,
        tick: u64,
    ) -> Result<Vec<PersistenceRecord>> {
        let mut all = Vec::new();
        for carrier in registry.carriers() {
            all.extend(self.capture(registry, carrier, scene, world, tick)?);
        }
        Ok(all)
    }

    /// Mirror a host ownership broadcast: detach the local copies of the
    /// tagged occupants so they survive the transition here too.
    ///
    /// Returns how many occupants were adopted.
    pub fn adopt_mirrored(
        &mut self,
        scene: &SceneId,
        tags: &[OwnershipTag],
        world: &mut dyn WorldGraph,
        tick: u64,
    ) -> usize {
        let mut adopted = 0;
        for tag in tags {
            let Some(handle) = world.detach(tag.occupant) else {
                debug!(occupant = %tag.occupant, "Mirrored occupant not present locally");
                continue;
            };
            self.store.insert(PersistenceRecord {
                occupant: tag.occupant,
                tag: tag.clone(),
                captured_scene: scene.clone(),
                handle,
                slot: None,
                captured_at: GameTimestamp::now(tick),
            });
            adopted += 1;
        }
        debug!(scene = %scene, adopted, "Mirrored ownership tags adopted");
        adopted
    }

    // ------------------------------------------------------------------
    // Rehydration
    // ------------------------------------------------------------------

    /// Begin rehydrating into the newly entered world.
    ///
    /// Work happens in later [`tick`](Self::tick) calls. A pass already in
    /// progress is restarted against the new signal.
    pub fn rehydrate(&mut self, signal: WorldReadySignal) {
        if self.is_rehydrating() {
            warn!(scene = %signal.scene, "Rehydration restarted before the previous pass finished");
        }
        debug!(scene = %signal.scene, records = self.store.len(), "Rehydration requested");
        let wait = WorldReadyWait::new(signal.tick, self.config.world_ready_timeout_ticks);
        self.phase = Phase::WaitingForWorld { signal, wait };
    }

    /// Advance rehydration, seekers and auto-grabs by one tick.
    ///
    /// Returns the report when a rehydration pass finishes this tick.
    pub fn tick(
        &mut self,
        registry: &mut SlotRegistry,
        world: &mut dyn WorldGraph,
        ctx: &SlotContext<'_>,
    ) -> Option<RehydrationReport> {
        let now = ctx.tick;
        let report = self.advance_phase(world, now);
        self.poll_seekers(world, now);
        self.run_due_grabs(registry, ctx);
        report
    }

    fn advance_phase(&mut self, world: &mut dyn WorldGraph, now: u64) -> Option<RehydrationReport> {
        if let Phase::WaitingForWorld { signal, wait } = &self.phase {
            let ready = match wait.poll(now, !world.carriers().is_empty()) {
                TaskPoll::Pending => return None,
                TaskPoll::Ready(ready) => ready,
            };
            let waited_out = ready == WorldReady::BudgetExpired;
            if waited_out {
                info!(scene = %signal.scene, "No carrier spawned in time, rehydrating anyway");
            }
            let scan = TimeSlicedScan::new(
                self.store.records().iter().map(|r| r.occupant).collect::<Vec<_>>(),
                self.config.records_per_tick,
            );
            self.phase = Phase::Reattaching {
                signal: signal.clone(),
                scan,
                report: RehydrationReport {
                    waited_out,
                    ..RehydrationReport::default()
                },
                started: Instant::now(),
            };
        }

        let Phase::Reattaching { scan, .. } = &mut self.phase else {
            return None;
        };
        let slice = scan.next_slice();
        let mut outcomes = Vec::with_capacity(slice.len());
        for occupant in slice {
            if let Some(record) = self.store.get(occupant).cloned() {
                outcomes.push(self.reattach(&record, world, now));
            }
        }

        let Phase::Reattaching {
            signal,
            scan,
            report,
            started,
        } = &mut self.phase
        else {
            return None;
        };
        for outcome in outcomes {
            match outcome {
                Reattach::Delivered { grab } => {
                    report.reattached += 1;
                    report.delivered += 1;
                    report.grabs_scheduled += usize::from(grab);
                }
                Reattach::Seeking => {
                    report.reattached += 1;
                    report.seeking += 1;
                }
                Reattach::Failed(failure) => report.failures.push(failure),
            }
        }
        if !scan.is_done() {
            return None;
        }

        let report = std::mem::take(report);
        info!(
            scene = %signal.scene,
            reattached = report.reattached,
            delivered = report.delivered,
            seeking = report.seeking,
            failed = report.failures.len(),
            partial = report.is_partial(),
            elapsed_us = started.elapsed().as_micros(),
            "Rehydration finished"
        );
        self.phase = Phase::Idle;
        Some(report)
    }

    fn reattach(&mut self, record: &PersistenceRecord, world: &mut dyn WorldGraph, now: u64) -> Reattach {
        let occupant = record.occupant;
        let owner = record.tag.owner.as_ref();
        let target = resolve_target(world, owner, self.placement.neutral_anchor());
        let position = match &target {
            Some(t) => self.placement.near(t.position),
            None => self.placement.neutral(),
        };

        // The record is dropped whatever happens next: success or a
        // failure that is never retried.
        self.store.remove(occupant);
        self.forget_in_journal(occupant);

        if let Err(err) = world.attach(occupant, record.handle, position) {
            let failure = match err {
                AttachError::Unresolvable => RehydrationFailure::Unresolvable(occupant),
                AttachError::Refused(reason) => RehydrationFailure::AttachFailed { occupant, reason },
            };
            StashCounters::add(&self.counters.rehydration_failures, 1);
            warn!(occupant = %occupant, error = %failure, "Rehydration record dropped");
            return Reattach::Failed(failure);
        }
        StashCounters::add(&self.counters.rehydrated, 1);

        match target {
            Some(t) => {
                debug!(occupant = %occupant, carrier = %t.carrier, %position, "Reattached beside owner");
                Reattach::Delivered {
                    grab: self.schedule_grab(occupant, t.carrier, record.slot, now),
                }
            }
            None => {
                debug!(occupant = %occupant, %position, "Reattached at neutral position");
                self.seekers.start(occupant, record.tag.owner.clone(), position, now);
                Reattach::Seeking
            }
        }
    }

    fn poll_seekers(&mut self, world: &mut dyn WorldGraph, now: u64) {
        if self.seekers.is_empty() {
            return;
        }
        for (occupant, _, outcome) in self.seekers.tick(now, world, &mut self.placement) {
            if let SeekOutcome::Found { carrier } = outcome {
                self.schedule_grab(occupant, carrier, None, now);
            }
        }
    }

    fn schedule_grab(&mut self, occupant: OccupantId, carrier: CarrierId, slot: Option<SlotKind>, now: u64) -> bool {
        if !self.role.is_authoritative() || !self.config.auto_grab {
            return false;
        }
        self.pending_grabs.retain(|g| g.occupant != occupant);
        self.pending_grabs.push(PendingGrab {
            occupant,
            carrier,
            due: now + self.config.auto_grab_settle_ticks,
            slot,
        });
        true
    }

    fn run_due_grabs(&mut self, registry: &mut SlotRegistry, ctx: &SlotContext<'_>) {
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .pending_grabs
            .drain(..)
            .partition(|g| g.due <= ctx.tick);
        self.pending_grabs = waiting;

        for grab in due {
            match registry.assign(grab.carrier, grab.occupant, ctx) {
                Ok(slot) => {
                    if slot == SlotKind::Secondary && grab.slot == Some(SlotKind::Primary) {
                        registry.promote(grab.carrier, grab.occupant);
                    }
                    debug!(occupant = %grab.occupant, carrier = %grab.carrier, slot = %slot, "Auto-grab placed occupant");
                }
                Err(reason) => {
                    debug!(occupant = %grab.occupant, carrier = %grab.carrier, reason = %reason, "Auto-grab refused, occupant left free");
                }
            }
        }
    }

    /// Drop a scheduled auto-grab or seeker for an occupant that died or was
    /// grabbed by hand in the meantime.
    pub fn forget_occupant(&mut self, occupant: OccupantId) {
        self.pending_grabs.retain(|g| g.occupant != occupant);
        self.seekers.cancel(occupant);
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Clear everything for a new session.
    pub fn reset(&mut self) {
        let dropped = self.store.reset();
        self.seekers.clear();
        self.pending_grabs.clear();
        self.phase = Phase::Idle;
        if let Some(journal) = &self.journal
            && let Err(e) = journal.clear()
        {
            warn!(error = %e, "Failed to clear transit journal");
        }
        info!(dropped, "Persistence reset for new session");
    }

    /// Reload the holding area from the journal after a restart.
    ///
    /// # Errors
    /// Returns journal errors; without a journal this is a no-op.
    pub fn restore_from_journal(&mut self) -> Result<usize> {
        match &self.journal {
            Some(journal) => journal.restore_into(&mut self.store),
            None => Ok(0),
        }
    }

    fn checkpoint(&mut self) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        match journal.checkpoint(&self.store) {
            Ok(_) => StashCounters::add(&self.counters.journal_writes, 1),
            Err(e) => warn!(error = %e, "Transit journal checkpoint failed"),
        }
    }

    fn forget_in_journal(&self, occupant: OccupantId) {
        if let Some(journal) = &self.journal
            && let Err(e) = journal.remove(occupant)
        {
            warn!(occupant = %occupant, error = %e, "Transit journal remove failed");
        }
    }
}

enum Reattach {
    Delivered { grab: bool },
    Seeking,
    Failed(RehydrationFailure),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PersistenceConfig, SlotConfig};
    use crate::hooks::{AllEligible, CarrierPresence, FixedCapacity};
    use crate::types::{Direction, Location, PlayerId, TransitionHandle};
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct TestWorld {
        next_handle: u64,
        attached: HashMap<OccupantId, Location>,
        held: HashMap<TransitionHandle, OccupantId>,
        carriers: Vec<CarrierPresence>,
        refuse: HashSet<OccupantId>,
    }

    impl TestWorld {
        fn spawn(&mut self, occupant: OccupantId) {
            self.attached.insert(occupant, Location::ORIGIN);
        }
    }

    impl WorldGraph for TestWorld {
        fn detach(&mut self, occupant: OccupantId) -> Option<TransitionHandle> {
            self.attached.remove(&occupant)?;
            self.next_handle += 1;
            let handle = TransitionHandle(self.next_handle);
            self.held.insert(handle, occupant);
            Some(handle)
        }

        fn attach(
            &mut self,
            occupant: OccupantId,
            handle: TransitionHandle,
            position: Location,
        ) -> std::result::Result<(), AttachError> {
            if self.refuse.contains(&occupant) {
                return Err(AttachError::Refused("blocked".into()));
            }
            match self.held.remove(&handle) {
                Some(o) if o == occupant => {
                    self.attached.insert(occupant, position);
                    Ok(())
                }
                _ => Err(AttachError::Unresolvable),
            }
        }

        fn reposition(&mut self, occupant: OccupantId, position: Location) -> bool {
            match self.attached.get_mut(&occupant) {
                Some(p) => {
                    *p = position;
                    true
                }
                None => false,
            }
        }

        fn carriers(&self) -> Vec<CarrierPresence> {
            self.carriers.clone()
        }
    }

    struct Fixture {
        registry: SlotRegistry,
        coordinator: SceneTransitionCoordinator,
        world: TestWorld,
        carrier: CarrierId,
        owner: PlayerId,
    }

    fn fixture(role: Role) -> Fixture {
        let counters = Arc::new(StashCounters::new());
        let registry = SlotRegistry::with_counters(SlotConfig::default(), Arc::clone(&counters));
        let config = TransitionConfig {
            world_ready_timeout_ticks: 10,
            records_per_tick: 1,
            auto_grab_settle_ticks: 2,
            ..TransitionConfig::default()
        };
        let coordinator = SceneTransitionCoordinator::new(
            role,
            config.clone(),
            SeekerConfig {
                timeout_ticks: 50,
                poll_interval_ticks: 1,
            },
            counters,
        )
        .with_placement(Placement::seeded(&config, 1));
        let mut fx = Fixture {
            registry,
            coordinator,
            world: TestWorld::default(),
            carrier: CarrierId::new(),
            owner: PlayerId::new("p1"),
        };
        fx.registry.register_carrier(fx.carrier, Some(fx.owner.clone()));
        fx
    }

    /// Bag the carrier with `a` primary and `b` secondary.
    fn bag_two(fx: &mut Fixture) -> (OccupantId, OccupantId) {
        let (a, b) = (OccupantId::new(), OccupantId::new());
        fx.world.spawn(a);
        fx.world.spawn(b);
        let oracle = FixedCapacity(2);
        let ctx = SlotContext::new(&oracle, &AllEligible, 0);
        fx.registry.assign(fx.carrier, a, &ctx).expect("a");
        fx.registry.cycle(fx.carrier, Direction::Forward, &ctx);
        fx.registry.assign(fx.carrier, b, &ctx).expect("b");
        (a, b)
    }

    fn run(fx: &mut Fixture, from: u64, to: u64) -> Option<RehydrationReport> {
        let oracle = FixedCapacity(2);
        let mut last = None;
        for tick in from..to {
            let ctx = SlotContext::new(&oracle, &AllEligible, tick);
            if let Some(r) = fx.coordinator.tick(&mut fx.registry, &mut fx.world, &ctx) {
                last = Some(r);
            }
        }
        last
    }

    #[test]
    fn capture_tags_detaches_and_broadcasts() {
        let mut fx = fixture(Role::Host);
        let (a, b) = bag_two(&mut fx);
        let scene = SceneId::new("Level_1");

        let records = fx
            .coordinator
            .capture(&mut fx.registry, fx.carrier, &scene, &mut fx.world, 5)
            .expect("capture");
        assert_eq!(records.iter().map(|r| r.occupant).collect::<Vec<_>>(), vec![a, b]);
        assert!(records.iter().all(|r| r.tag.owner.as_ref() == Some(&fx.owner)));
        assert_eq!(records[0].slot, Some(SlotKind::Primary));
        assert_eq!(fx.coordinator.store().len(), 2);
        assert!(fx.registry.bag(fx.carrier).expect("bag").is_empty());
        assert!(fx.world.attached.is_empty());

        let broadcasts = fx.coordinator.drain_broadcasts();
        assert!(matches!(&broadcasts[..], [SyncMessage::OwnershipTags { tags, .. }] if tags.len() == 2));
    }

    #[test]
    fn clients_cannot_capture() {
        let mut fx = fixture(Role::Client);
        let err = fx
            .coordinator
            .capture(&mut fx.registry, fx.carrier, &SceneId::new("x"), &mut fx.world, 0)
            .expect_err("client capture");
        assert!(matches!(err, StashError::NotAuthoritative(_)));
    }

    #[test]
    fn rehydrate_with_owner_present_reassigns() {
        let mut fx = fixture(Role::Host);
        let (a, b) = bag_two(&mut fx);
        let primary_before = fx.registry.primary_of(fx.carrier);
        assert!(primary_before.is_some());
        fx.coordinator
            .capture(&mut fx.registry, fx.carrier, &SceneId::new("Level_1"), &mut fx.world, 0)
            .expect("capture");

        fx.world.carriers.push(CarrierPresence {
            carrier: fx.carrier,
            player: Some(fx.owner.clone()),
            position: Location::new(5.0, 0.0, 5.0),
        });
        fx.coordinator.rehydrate(WorldReadySignal {
            scene: SceneId::new("Level_2"),
            tick: 10,
        });

        let report = run(&mut fx, 10, 20).expect("report");
        assert_eq!(report.reattached, 2);
        assert_eq!(report.delivered, 2);
        assert!(!report.is_partial());
        assert!(fx.coordinator.store().is_empty());

        let mut held: Vec<_> = fx.registry.bag(fx.carrier).expect("bag").settled();
        held.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(held, expected);
        assert_eq!(fx.registry.primary_of(fx.carrier), primary_before);
    }

    #[test]
    fn absent_owner_gets_a_seeker_then_relocation() {
        let mut fx = fixture(Role::Host);
        let (a, _) = bag_two(&mut fx);
        fx.coordinator
            .capture(&mut fx.registry, fx.carrier, &SceneId::new("Level_1"), &mut fx.world, 0)
            .expect("capture");
        fx.coordinator.rehydrate(WorldReadySignal {
            scene: SceneId::new("Level_2"),
            tick: 0,
        });

        let report = run(&mut fx, 0, 12).expect("report");
        assert!(report.waited_out);
        assert_eq!(report.seeking, 2);
        assert_eq!(fx.coordinator.seekers().len(), 2);

        fx.world.carriers.push(CarrierPresence {
            carrier: fx.carrier,
            player: Some(fx.owner.clone()),
            position: Location::new(30.0, 0.0, 0.0),
        });
        run(&mut fx, 12, 13);
        assert!(fx.coordinator.seekers().is_empty());
        assert!(fx.world.attached[&a].x > 25.0);
    }

    #[test]
    fn failing_record_does_not_block_the_rest() {
        let mut fx = fixture(Role::Host);
        let (a, b) = bag_two(&mut fx);
        fx.coordinator
            .capture(&mut fx.registry, fx.carrier, &SceneId::new("Level_1"), &mut fx.world, 0)
            .expect("capture");
        fx.world.refuse.insert(a);
        fx.world.carriers.push(CarrierPresence {
            carrier: fx.carrier,
            player: Some(fx.owner.clone()),
            position: Location::ORIGIN,
        });
        fx.coordinator.rehydrate(WorldReadySignal {
            scene: SceneId::new("Level_2"),
            tick: 0,
        });

        let report = run(&mut fx, 0, 10).expect("report");
        assert!(report.is_partial());
        assert_eq!(report.reattached, 1);
        assert!(fx.coordinator.store().is_empty());
        assert!(fx.world.attached.contains_key(&b));
        assert_eq!(fx.registry.holder_of(b), Some(fx.carrier));
        assert_eq!(fx.registry.holder_of(a), None);
    }

    #[test]
    fn clients_rehydrate_without_grabbing() {
        let mut host = fixture(Role::Host);
        let (a, b) = bag_two(&mut host);
        let scene = SceneId::new("Level_1");
        host.coordinator
            .capture(&mut host.registry, host.carrier, &scene, &mut host.world, 0)
            .expect("capture");
        let Some(SyncMessage::OwnershipTags { tags, .. }) = host.coordinator.drain_broadcasts().pop() else {
            panic!("expected ownership broadcast");
        };

        let mut client = fixture(Role::Client);
        client.world.spawn(a);
        client.world.spawn(b);
        assert_eq!(client.coordinator.adopt_mirrored(&scene, &tags, &mut client.world, 0), 2);

        client.world.carriers.push(CarrierPresence {
            carrier: client.carrier,
            player: Some(client.owner.clone()),
            position: Location::ORIGIN,
        });
        client.coordinator.rehydrate(WorldReadySignal {
            scene: SceneId::new("Level_2"),
            tick: 0,
        });
        let report = run(&mut client, 0, 10).expect("report");
        assert_eq!(report.reattached, 2);
        assert_eq!(report.grabs_scheduled, 0);
        assert!(client.registry.bag(client.carrier).expect("bag").is_empty());
    }

    #[test]
    fn journal_survives_restart() {
        let mut fx = fixture(Role::Host);
        let journal = TransitJournal::open_in_memory(&PersistenceConfig::default()).expect("journal");
        fx.coordinator = SceneTransitionCoordinator::new(
            Role::Host,
            TransitionConfig::default(),
            SeekerConfig::default(),
            Arc::new(StashCounters::new()),
        )
        .with_journal(journal);
        bag_two(&mut fx);
        fx.coordinator
            .capture(&mut fx.registry, fx.carrier, &SceneId::new("Level_1"), &mut fx.world, 0)
            .expect("capture");

        let before = fx.coordinator.store().records().to_vec();
        fx.coordinator.store.reset();
        assert_eq!(fx.coordinator.restore_from_journal().expect("restore"), 2);
        assert_eq!(fx.coordinator.store().records(), &before[..]);

        fx.coordinator.reset();
        assert_eq!(fx.coordinator.restore_from_journal().expect("restore"), 0);
    }
}
