//! Ownership seekers.
//!
//! An occupant rehydrated before its owner's carrier spawned is parked at a
//! neutral position and handed to a seeker. Each tick the seeker checks
//! whether the owner is present; if so it moves the occupant next to it and
//! finishes. After the timeout it gives up and leaves the occupant where it
//! is. Neither outcome is an error.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::{SeekerConfig, TransitionConfig};
use crate::hooks::{CarrierPresence, WorldGraph};
use crate::metrics::StashCounters;
use crate::tasks::{Deadline, TaskPoll};
use crate::types::{CarrierId, Location, OccupantId, PlayerId};

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// Picks positions for reattached occupants.
#[derive(Debug, Clone)]
pub struct Placement {
    owner_offset: f32,
    scatter_radius: f32,
    neutral: Location,
    rng: StdRng,
}

impl Placement {
    /// Placement with entropy-seeded scatter.
    #[must_use]
    pub fn new(config: &TransitionConfig) -> Self {
        Self::seeded(config, rand::random())
    }

    /// Placement with deterministic scatter.
    #[must_use]
    pub fn seeded(config: &TransitionConfig, seed: u64) -> Self {
        Self {
            owner_offset: config.owner_offset,
            scatter_radius: config.scatter_radius,
            neutral: config.neutral_position,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A spot beside `anchor`, on the horizontal plane.
    pub fn near(&mut self, anchor: Location) -> Location {
        let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = self.owner_offset + self.jitter();
        anchor.offset(angle.cos() * distance, 0.0, angle.sin() * distance)
    }

    /// A spot in the neutral area.
    pub fn neutral(&mut self) -> Location {
        let (dx, dz) = (self.jitter(), self.jitter());
        self.neutral.offset(dx, 0.0, dz)
    }

    /// The neutral anchor itself.
    #[must_use]
    pub fn neutral_anchor(&self) -> Location {
        self.neutral
    }

    fn jitter(&mut self) -> f32 {
        if self.scatter_radius > 0.0 {
            self.rng.gen_range(0.0..self.scatter_radius)
        } else {
            0.0
        }
    }
}

/// The carrier an occupant should go to: its owner's if tagged, otherwise
/// the carrier nearest to `from`.
#[must_use]
pub fn resolve_target(world: &dyn WorldGraph, owner: Option<&PlayerId>, from: Location) -> Option<CarrierPresence> {
    match owner {
        Some(player) => world.carrier_of(player),
        None => world
            .carriers()
            .into_iter()
            .min_by_key(|c| c.position.distance(&from)),
    }
}

// ---------------------------------------------------------------------------
// Seeker
// ---------------------------------------------------------------------------

/// Terminal outcome of a seeker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The owner appeared; the occupant was moved next to it.
    Found {
        /// The owner's carrier.
        carrier: CarrierId,
    },
    /// The owner never appeared; the occupant stays at its neutral position.
    TimedOut,
    /// The occupant no longer exists in the world.
    Lost,
}

/// Bounded-retry search for one occupant's owner.
#[derive(Debug, Clone)]
pub struct OwnershipSeeker {
    occupant: OccupantId,
    owner: Option<PlayerId>,
    deadline: Deadline,
    poll_interval: u64,
    next_poll: u64,
    parked_at: Location,
}

impl OwnershipSeeker {
    /// Start seeking `owner` for `occupant` at tick `now`.
    #[must_use]
    pub fn start(occupant: OccupantId, owner: Option<PlayerId>, timeout: u64, now: u64) -> Self {
        Self {
            occupant,
            owner,
            deadline: Deadline::after(now, timeout),
            poll_interval: 1,
            next_poll: now,
            parked_at: Location::ORIGIN,
        }
    }

    /// Look only every `ticks` ticks.
    #[must_use]
    pub fn with_poll_interval(mut self, ticks: u64) -> Self {
        self.poll_interval = ticks.max(1);
        self
    }

    /// Where the occupant was parked.
    #[must_use]
    pub fn parked_at(mut self, position: Location) -> Self {
        self.parked_at = position;
        self
    }

    /// The occupant being relocated.
    #[must_use]
    pub fn occupant(&self) -> OccupantId {
        self.occupant
    }

    /// The owner being sought.
    #[must_use]
    pub fn owner(&self) -> Option<&PlayerId> {
        self.owner.as_ref()
    }

    /// Check for the owner once.
    pub fn poll(&mut self, now: u64, world: &mut dyn WorldGraph, placement: &mut Placement) -> TaskPoll<SeekOutcome> {
        if now >= self.next_poll {
            self.next_poll = now + self.poll_interval;
            if let Some(target) = resolve_target(world, self.owner.as_ref(), self.parked_at) {
                let position = placement.near(target.position);
                if !world.reposition(self.occupant, position) {
                    return TaskPoll::Ready(SeekOutcome::Lost);
                }
                return TaskPoll::Ready(SeekOutcome::Found {
                    carrier: target.carrier,
                });
            }
        }
        if self.deadline.expired(now) {
            return TaskPoll::Ready(SeekOutcome::TimedOut);
        }
        TaskPoll::Pending
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// All active seekers, polled together once per tick.
#[derive(Debug)]
pub struct SeekerPool {
    config: SeekerConfig,
    seekers: Vec<OwnershipSeeker>,
    counters: Arc<StashCounters>,
}

impl SeekerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(config: SeekerConfig, counters: Arc<StashCounters>) -> Self {
        Self {
            config,
            seekers: Vec::new(),
            counters,
        }
    }

    /// Start a seeker with the pool's timeout and poll interval, replacing
    /// any existing seeker for the same occupant.
    pub fn start(&mut self, occupant: OccupantId, owner: Option<PlayerId>, parked_at: Location, now: u64) {
        self.cancel(occupant);
        debug!(occupant = %occupant, owner = ?owner, "Seeker started");
        self.seekers.push(
            OwnershipSeeker::start(occupant, owner, self.config.timeout_ticks, now)
                .with_poll_interval(self.config.poll_interval_ticks)
                .parked_at(parked_at),
        );
    }

    /// Stop seeking for `occupant`.
    pub fn cancel(&mut self, occupant: OccupantId) -> bool {
        let before = self.seekers.len();
        self.seekers.retain(|s| s.occupant != occupant);
        before != self.seekers.len()
    }

    /// Poll every seeker; returns the ones that finished this tick.
    pub fn tick(
        &mut self,
        now: u64,
        world: &mut dyn WorldGraph,
        placement: &mut Placement,
    ) -> Vec<(OccupantId, Option<PlayerId>, SeekOutcome)> {
        let mut finished = Vec::new();
        self.seekers.retain_mut(|seeker| match seeker.poll(now, &mut *world, &mut *placement) {
            TaskPoll::Pending => true,
            TaskPoll::Ready(outcome) => {
                finished.push((seeker.occupant, seeker.owner.clone(), outcome));
                false
            }
        });

        for (occupant, owner, outcome) in &finished {
            match outcome {
                SeekOutcome::Found { carrier } => {
                    debug!(occupant = %occupant, carrier = %carrier, "Seeker found owner");
                }
                SeekOutcome::TimedOut => {
                    StashCounters::add(&self.counters.seekers_timed_out, 1);
                    info!(occupant = %occupant, owner = ?owner, "Seeker timed out, occupant left at neutral position");
                }
                SeekOutcome::Lost => debug!(occupant = %occupant, "Seeker lost its occupant"),
            }
        }
        finished
    }

    /// Whether a seeker is running for `occupant`.
    #[must_use]
    pub fn contains(&self, occupant: OccupantId) -> bool {
        self.seekers.iter().any(|s| s.occupant == occupant)
    }

    /// Drop every seeker.
    pub fn clear(&mut self) {
        self.seekers.clear();
    }

    /// Number of active seekers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seekers.len()
    }

    /// Whether no seeker is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seekers.is_empty()
    }
}
