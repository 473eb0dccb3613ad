//! Stash rule: binds game events to the slot engine, one tick at a time.
//!
//! Each tick runs in a fixed order:
//!
//! ```text
//! inbound sync → lifecycle → evictions → grabs → cycles
//!              → transit reclaim → overflow → world exit/enter
//!              → coordinator → slot outbox → snapshots
//! ```
//!
//! Evictions land before grabs and cycles queued in the same tick, so a cycle
//! racing an eviction always steps from the post-eviction state.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use stash_core::config::StashConfig;
use stash_core::eligibility::{CatalogEligibility, EligibilityPolicy};
use stash_core::eviction::EvictionReason;
use stash_core::hooks::{CapacityOracle, WorldGraph};
use stash_core::journal::TransitJournal;
use stash_core::metrics::{StashCounters, TickBudgetMonitor};
use stash_core::registry::{SlotContext, SlotRegistry, forward_delegation};
use stash_core::scene::{RehydrationReport, SceneTransitionCoordinator, WorldReadySignal};
use stash_core::sync::{LoopbackChannel, MirrorState, SyncChannel, SyncMessage, SyncPort};
use stash_core::types::{CarrierId, Role};
use tracing::{debug, info, warn};

use crate::config::HostConfig;
use crate::events::{EventPhase, GameEvent, order_for_tick};
use crate::world::{HostWorld, WorldParts};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number.
    pub tick: u64,
    /// Events applied.
    pub events_applied: usize,
    /// Grabs refused.
    pub rejected_grabs: usize,
    /// Cycle steps that changed slots.
    pub cycles: usize,
    /// Occupants ejected after a capacity drop.
    pub ejected: usize,
    /// Slot events forwarded to the delegation hook.
    pub slot_events: usize,
    /// Sync messages broadcast.
    pub broadcasts: usize,
    /// Rehydration summary, on the tick a pass finished.
    pub rehydration: Option<RehydrationReport>,
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// Everything the rule mutates besides the world itself.
#[derive(Debug)]
struct StashState {
    role: Role,
    registry: SlotRegistry,
    coordinator: SceneTransitionCoordinator,
    mirror: MirrorState,
    capacity_checks: BTreeSet<CarrierId>,
    outgoing: Vec<SyncMessage>,
}

impl StashState {
    fn apply_inbound(&mut self, message: SyncMessage, graph: &mut dyn WorldGraph, now: u64) {
        if self.role.is_authoritative() {
            debug!("Host ignoring inbound sync message");
            return;
        }
        if let SyncMessage::OwnershipTags { scene, tags } = &message {
            self.coordinator.adopt_mirrored(scene, tags, graph, now);
        }
        self.mirror.apply(message);
    }

    fn apply(&mut self, event: GameEvent, graph: &mut dyn WorldGraph, ctx: &SlotContext<'_>, report: &mut TickReport) {
        if event.is_host_only() && !self.role.is_authoritative() {
            debug!(?event, "Not authoritative, leaving event to the host");
            return;
        }
        report.events_applied += 1;
        match event {
            GameEvent::CarrierSpawned { carrier, player, .. } => {
                self.registry.register_carrier(carrier, player);
            }
            GameEvent::CarrierLeft { carrier } => {
                if let Some(bag) = self.registry.unregister_carrier(carrier) {
                    debug!(carrier = %carrier, left_behind = bag.settled_count(), "Carrier left");
                    if self.role.is_authoritative() {
                        self.outgoing.push(SyncMessage::CarrierGone { carrier });
                    }
                }
            }
            GameEvent::Evict { occupant, reason } => {
                self.registry.evict_everywhere(occupant, reason, ctx.tick);
                if !reason.holds_transit() {
                    self.coordinator.forget_occupant(occupant);
                }
            }
            GameEvent::ThrowLanded { occupant } => {
                self.registry.settle(occupant);
            }
            GameEvent::Grab { carrier, occupant } => match self.registry.assign(carrier, occupant, ctx) {
                Ok(_) => self.coordinator.forget_occupant(occupant),
                Err(_) => report.rejected_grabs += 1,
            },
            GameEvent::Cycle { carrier, direction } => {
                if !self.registry.cycle(carrier, direction, ctx).is_noop() {
                    report.cycles += 1;
                }
            }
            GameEvent::CapacityChanged { carrier } => {
                self.capacity_checks.insert(carrier);
            }
            GameEvent::WorldExit { scene } => {
                if self.role.is_authoritative() {
                    if let Err(e) = self.coordinator.capture_all(&mut self.registry, &scene, graph, ctx.tick) {
                        warn!(scene = %scene, error = %e, "World-exit capture failed");
                    }
                } else {
                    debug!(scene = %scene, "Awaiting host ownership broadcast");
                }
            }
            GameEvent::WorldEnter { scene } => {
                self.coordinator.rehydrate(WorldReadySignal { scene, tick: ctx.tick });
            }
        }
    }

    fn enforce_capacity(&mut self, oracle: &dyn CapacityOracle, now: u64) -> usize {
        let mut ejected = 0;
        for carrier in std::mem::take(&mut self.capacity_checks) {
            for occupant in self.registry.overflow(carrier, oracle) {
                if self
                    .registry
                    .evict(carrier, occupant, EvictionReason::ExternalEject, now)
                    .is_some()
                {
                    ejected += 1;
                }
            }
        }
        if ejected > 0 {
            info!(ejected, "Occupants ejected after capacity drop");
        }
        ejected
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// The stash rule for one participant.
#[derive(Debug)]
pub struct StashRule<W, C = LoopbackChannel> {
    config: HostConfig,
    world: W,
    policy: EligibilityPolicy,
    state: StashState,
    port: Option<SyncPort<C>>,
    queue: Vec<GameEvent>,
    counters: Arc<StashCounters>,
    budget: Arc<TickBudgetMonitor>,
    current_tick: u64,
}

impl<W: HostWorld, C: SyncChannel> StashRule<W, C> {
    /// Create a rule over `world` without sync or journal.
    #[must_use]
    pub fn new(config: HostConfig, world: W) -> Self {
        let counters = Arc::new(StashCounters::new());
        let stash = &config.stash;
        let state = StashState {
            role: config.role,
            registry: SlotRegistry::with_counters(stash.slots.clone(), Arc::clone(&counters)),
            coordinator: SceneTransitionCoordinator::new(
                config.role,
                stash.transition.clone(),
                stash.seeker.clone(),
                Arc::clone(&counters),
            ),
            mirror: MirrorState::new(stash.sync.mirror_tag_capacity),
            capacity_checks: BTreeSet::new(),
            outgoing: Vec::new(),
        };
        Self {
            policy: EligibilityPolicy::from_config(&stash.eligibility),
            budget: Arc::new(TickBudgetMonitor::new(config.tick_budget_ms)),
            state,
            world,
            port: None,
            queue: Vec::new(),
            counters,
            current_tick: 0,
            config,
        }
    }

    /// Create a rule and, on the host with the journal enabled, reopen the
    /// transit journal and restore any records left by a previous run.
    ///
    /// # Errors
    /// Fails if the journal is enabled without a path, or cannot be opened or
    /// read.
    pub fn open(config: HostConfig, world: W) -> anyhow::Result<Self> {
        let mut rule = Self::new(config, world);
        let persistence = &rule.config.stash.persistence;
        if !persistence.journal_enabled || !rule.config.role.is_authoritative() {
            return Ok(rule);
        }
        let path = rule
            .config
            .journal_path
            .clone()
            .context("Transit journal enabled without a journal path")?;
        let journal = TransitJournal::open(&path, persistence)
            .with_context(|| format!("Failed to open transit journal at {}", path.display()))?;
        rule.state.coordinator = rule.state.coordinator.with_journal(journal);
        let restored = rule
            .state
            .coordinator
            .restore_from_journal()
            .context("Failed to restore transit journal")?;
        info!(restored, path = %path.display(), "Transit journal opened");
        Ok(rule)
    }

    /// Load `stash.toml` from `path` and open a rule for `role`. The journal,
    /// if enabled, lives next to the config file.
    ///
    /// # Errors
    /// Fails if the config cannot be read or parsed, or the journal cannot be
    /// opened.
    pub fn from_config_file(path: impl AsRef<Path>, role: Role, world: W) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let stash = StashConfig::from_file(path)
            .with_context(|| format!("Failed to load stash config from {}", path.display()))?;
        let mut config = HostConfig::for_role(role).with_stash(stash);
        config.journal_path = Some(path.with_extension("journal.db"));
        Self::open(config, world)
    }

    /// Attach a sync port.
    #[must_use]
    pub fn with_sync(mut self, port: SyncPort<C>) -> Self {
        self.port = Some(port);
        self
    }

    /// Queue an event for the next tick.
    pub fn push(&mut self, event: GameEvent) {
        self.queue.push(event);
    }

    /// Queue several events for the next tick.
    pub fn push_all(&mut self, events: impl IntoIterator<Item = GameEvent>) {
        self.queue.extend(events);
    }

    /// Run one tick.
    pub fn tick(&mut self) -> TickReport {
        self.current_tick += 1;
        let now = self.current_tick;
        let budget = Arc::clone(&self.budget);
        let _timing = budget.begin_tick();
        let mut report = TickReport {
            tick: now,
            ..TickReport::default()
        };
        if !self.config.stash.general.enabled {
            self.queue.clear();
            return report;
        }

        let inbound = self.port.as_mut().map(SyncPort::drain).unwrap_or_default();
        let mut events = std::mem::take(&mut self.queue);
        order_for_tick(&mut events);
        let split = events.partition_point(|e| e.phase() < EventPhase::Transition);
        let transitions = events.split_off(split);

        let max_mass = self.config.stash.eligibility.max_mass;
        let WorldParts {
            graph,
            oracle,
            catalog,
            delegation,
        } = self.world.parts();
        let eligibility = CatalogEligibility::new(&self.policy, catalog);
        let ctx = SlotContext::new(oracle, &eligibility, now).with_max_mass(max_mass);
        let state = &mut self.state;

        for message in inbound {
            state.apply_inbound(message, &mut *graph, now);
        }
        for event in events {
            state.apply(event, &mut *graph, &ctx, &mut report);
        }
        state.registry.reclaim_expired(now);
        report.ejected = state.enforce_capacity(oracle, now);
        for event in transitions {
            state.apply(event, &mut *graph, &ctx, &mut report);
        }
        report.rehydration = state.coordinator.tick(&mut state.registry, &mut *graph, &ctx);

        let slot_events = state.registry.drain_events();
        forward_delegation(&slot_events, delegation);
        report.slot_events = slot_events.len();

        report.broadcasts = self.flush_sync(now);
        report
    }

    fn flush_sync(&mut self, now: u64) -> usize {
        let state = &mut self.state;
        let mut outgoing = std::mem::take(&mut state.outgoing);
        outgoing.extend(state.coordinator.drain_broadcasts());
        if now % self.config.snapshot_every_ticks.max(1) == 0 {
            for (carrier, direction) in state.registry.take_dirty() {
                if state.role.is_authoritative()
                    && let Some(snapshot) = state.registry.snapshot(carrier, direction)
                {
                    outgoing.push(SyncMessage::Snapshot(snapshot));
                }
            }
        }

        let Some(port) = self.port.as_mut() else {
            return 0;
        };
        let mut sent = 0;
        for message in &outgoing {
            match port.broadcast(message) {
                Ok(()) => sent += 1,
                Err(e) => warn!(error = %e, "Sync broadcast failed"),
            }
        }
        sent
    }

    /// Start a new session: drop held records, seekers and the journal.
    pub fn reset_session(&mut self) {
        self.state.coordinator.reset();
    }

    /// The world.
    #[must_use]
    pub fn world(&self) -> &W {
        &self.world
    }

    /// The world, mutably, for gameplay code running between ticks.
    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    /// Slot registry.
    #[must_use]
    pub fn registry(&self) -> &SlotRegistry {
        &self.state.registry
    }

    /// Scene coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &SceneTransitionCoordinator {
        &self.state.coordinator
    }

    /// Mirrored host state (meaningful on clients).
    #[must_use]
    pub fn mirror(&self) -> &MirrorState {
        &self.state.mirror
    }

    /// Host configuration.
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<StashCounters> {
        &self.counters
    }

    /// Per-tick timing.
    #[must_use]
    pub fn budget(&self) -> &TickBudgetMonitor {
        &self.budget
    }

    /// Ticks run so far.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Counters in Prometheus text format.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        self.counters.snapshot().to_prometheus()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SimWorld;
    use stash_core::types::{Direction, Location, OccupantId, PlayerId, SceneId};

    type Rule = StashRule<SimWorld>;

    fn host(capacity: u32) -> Rule {
        let mut config = HostConfig::for_role(Role::Host);
        config.snapshot_every_ticks = 1;
        config.stash.transition.auto_grab_settle_ticks = 1;
        config.stash.transition.world_ready_timeout_ticks = 5;
        StashRule::new(config, SimWorld::new(capacity))
    }

    fn spawn_player(rule: &mut Rule, name: &str) -> CarrierId {
        let player = PlayerId::new(name);
        let carrier = rule.world_mut().spawn_carrier(Some(player.clone()), Location::ORIGIN);
        rule.push(GameEvent::CarrierSpawned {
            carrier,
            player: Some(player),
            position: Location::ORIGIN,
        });
        carrier
    }

    #[test]
    fn grab_and_cycle_drive_delegation() {
        let mut rule = host(2);
        let carrier = spawn_player(&mut rule, "p1");
        let a = rule.world_mut().spawn("goblin", 20.0, Location::ORIGIN);
        rule.tick();

        rule.push(GameEvent::Grab { carrier, occupant: a });
        rule.tick();
        assert_eq!(rule.world().delegation.active(carrier), None);

        rule.push(GameEvent::Cycle {
            carrier,
            direction: Direction::Forward,
        });
        let report = rule.tick();
        assert_eq!(report.cycles, 1);
        assert_eq!(rule.world().delegation.active(carrier), Some(a));
    }

    #[test]
    fn eviction_wins_over_same_tick_cycle() {
        let mut rule = host(2);
        let carrier = spawn_player(&mut rule, "p1");
        let a = rule.world_mut().spawn("goblin", 20.0, Location::ORIGIN);
        let b = rule.world_mut().spawn("goblin", 20.0, Location::ORIGIN);
        rule.tick();
        rule.push(GameEvent::Grab { carrier, occupant: a });
        rule.push(GameEvent::Cycle {
            carrier,
            direction: Direction::Forward,
        });
        rule.push(GameEvent::Grab { carrier, occupant: b });
        rule.tick();
        assert_eq!(rule.registry().primary_of(carrier), Some(a));

        // Cycle queued before the death still runs after it: b is promoted
        // by the eviction, then the cycle steps it down to the free slot.
        rule.push(GameEvent::Cycle {
            carrier,
            direction: Direction::Forward,
        });
        rule.push(GameEvent::Evict {
            occupant: a,
            reason: EvictionReason::Died,
        });
        let report = rule.tick();
        assert_eq!(report.cycles, 1);
        assert_eq!(rule.registry().holder_of(a), None);
        assert_eq!(rule.registry().primary_of(carrier), None);
        assert!(rule.registry().secondary_set_of(carrier).contains(&b));
        assert_eq!(rule.world().delegation.active(carrier), None);
        rule.registry().verify(&rule.world().roster).expect("invariants");
    }

    #[test]
    fn ineligible_grab_is_rejected() {
        let mut rule = host(3);
        let c1 = spawn_player(&mut rule, "p1");
        let c2 = spawn_player(&mut rule, "p2");
        rule.tick();

        rule.push(GameEvent::Grab {
            carrier: c1,
            occupant: OccupantId(c2.0),
        });
        let report = rule.tick();
        assert_eq!(report.rejected_grabs, 1);
        assert!(rule.registry().bag(c1).expect("bag").is_empty());
    }

    #[test]
    fn configured_mass_limit_rejects_heavy_grab() {
        let mut config = HostConfig::for_role(Role::Host);
        config.stash.eligibility.max_mass = Some(100.0);
        let mut rule: Rule = StashRule::new(config, SimWorld::new(3));
        let carrier = spawn_player(&mut rule, "p1");
        let light = rule.world_mut().spawn("crate", 20.0, Location::ORIGIN);
        let heavy = rule.world_mut().spawn("crate", 500.0, Location::ORIGIN);
        rule.tick();

        rule.push_all([
            GameEvent::Grab { carrier, occupant: heavy },
            GameEvent::Grab { carrier, occupant: light },
        ]);
        let report = rule.tick();
        assert_eq!(report.rejected_grabs, 1);
        assert_eq!(rule.registry().holder_of(light), Some(carrier));
        assert_eq!(rule.registry().holder_of(heavy), None);
    }

    #[test]
    fn capacity_drop_ejects_newest() {
        let mut rule = host(3);
        let carrier = spawn_player(&mut rule, "p1");
        let ids: Vec<_> = (0..3)
            .map(|_| rule.world_mut().spawn("crate", 5.0, Location::ORIGIN))
            .collect();
        rule.tick();
        rule.push_all(ids.iter().map(|&occupant| GameEvent::Grab { carrier, occupant }));
        rule.tick();

        rule.world_mut().set_capacity(carrier, 2);
        rule.push(GameEvent::CapacityChanged { carrier });
        let report = rule.tick();
        assert_eq!(report.ejected, 1);
        assert_eq!(rule.registry().holder_of(ids[1]), None);
        assert_eq!(rule.registry().bag(carrier).expect("bag").settled_count(), 2);
    }

    #[test]
    fn world_transition_round_trip() {
        let mut rule = host(2);
        let carrier = spawn_player(&mut rule, "p1");
        let a = rule.world_mut().spawn("goblin", 20.0, Location::ORIGIN);
        let b = rule.world_mut().spawn("goblin", 20.0, Location::ORIGIN);
        rule.tick();
        rule.push_all([
            GameEvent::Grab { carrier, occupant: a },
            GameEvent::Grab { carrier, occupant: b },
        ]);
        rule.tick();
        let primary_before = rule.registry().primary_of(carrier);
        assert_eq!(primary_before, Some(b));

        rule.push(GameEvent::WorldExit {
            scene: SceneId::new("Level_1"),
        });
        rule.tick();
        assert_eq!(rule.coordinator().store().len(), 2);
        assert!(rule.world().graph.is_held(a));

        rule.world_mut().unload_scene();
        rule.push(GameEvent::CarrierLeft { carrier });
        rule.tick();

        rule.world_mut()
            .place_carrier(carrier, Some(PlayerId::new("p1")), Location::new(8.0, 0.0, 0.0));
        rule.push_all([
            GameEvent::CarrierSpawned {
                carrier,
                player: Some(PlayerId::new("p1")),
                position: Location::new(8.0, 0.0, 0.0),
            },
            GameEvent::WorldEnter {
                scene: SceneId::new("Level_2"),
            },
        ]);
        let report = rule.tick();
        assert_eq!(report.rehydration.expect("finished").reattached, 2);
        for _ in 0..3 {
            rule.tick();
        }

        assert!(rule.coordinator().store().is_empty());
        assert_eq!(rule.registry().holder_of(a), Some(carrier));
        assert_eq!(rule.registry().holder_of(b), Some(carrier));
        assert!(rule.world().graph.is_live(a));
        assert_eq!(rule.registry().primary_of(carrier), primary_before);
        assert_eq!(rule.world().delegation.active(carrier), Some(b));
    }

    #[test]
    fn client_mirrors_host_over_loopback() {
        let (host_end, client_end) = LoopbackChannel::pair();
        let mut host = host(2).with_sync(SyncPort::new(host_end, Default::default()));
        let mut client_config = HostConfig::for_role(Role::Client);
        client_config.snapshot_every_ticks = 1;
        let mut client: Rule = StashRule::new(client_config, SimWorld::new(2))
            .with_sync(SyncPort::new(client_end, Default::default()));

        let carrier = spawn_player(&mut host, "p1");
        let a = host.world_mut().spawn("goblin", 20.0, Location::ORIGIN);
        host.tick();
        host.push(GameEvent::Grab { carrier, occupant: a });
        let report = host.tick();
        assert!(report.broadcasts >= 1);

        // Clients never mutate slots themselves.
        client.push(GameEvent::Grab { carrier, occupant: a });
        client.tick();
        assert_eq!(client.registry().holder_of(a), None);
        assert_eq!(client.mirror().secondary_of(carrier), vec![a]);
    }

    #[test]
    fn disabled_rule_drops_events() {
        let mut config = HostConfig::for_role(Role::Host);
        config.stash.general.enabled = false;
        let mut rule: Rule = StashRule::new(config, SimWorld::new(2));
        let carrier = spawn_player(&mut rule, "p1");
        let report = rule.tick();
        assert_eq!(report.events_applied, 0);
        assert!(rule.registry().bag(carrier).is_none());
    }

    #[test]
    fn config_file_with_journal_restores() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stash.toml");
        std::fs::write(&path, "[persistence]\njournal_enabled = true\n").expect("write config");

        let mut rule: Rule = StashRule::from_config_file(&path, Role::Host, SimWorld::new(2)).expect("open");
        let carrier = spawn_player(&mut rule, "p1");
        let a = rule.world_mut().spawn("goblin", 20.0, Location::ORIGIN);
        rule.tick();
        rule.push(GameEvent::Grab { carrier, occupant: a });
        rule.tick();
        rule.push(GameEvent::WorldExit {
            scene: SceneId::new("Level_1"),
        });
        rule.tick();
        drop(rule);

        let reopened: Rule = StashRule::from_config_file(&path, Role::Host, SimWorld::new(2)).expect("reopen");
        assert_eq!(reopened.coordinator().store().len(), 1);
        assert!(reopened.metrics_text().contains("stash_captured_total"));
    }
}
