//! # Stash Core Library
//!
//! Game-agnostic carrier inventory for companion occupants.
//!
//! Every carrier (usually a player character) gets a [`Bag`] with one
//! primary slot and `capacity - 1` secondary slots:
//!
//! - **Primary**: the occupant the carrier's controls are delegated to
//! - **Secondary**: stashed occupants, cycled into primary on demand
//!
//! The [`SlotRegistry`] owns every bag. Cycling, eviction and overflow all go
//! through it and leave a strictly ordered event outbox behind. The
//! [`SceneTransitionCoordinator`] carries bagged occupants across world
//! transitions and puts them back beside their owner, or lets an
//! [`OwnershipSeeker`] wait for the owner to show up.
//!
//! ## Tick Contract
//!
//! Nothing here spawns threads or blocks. The host drives everything from
//! its simulation tick:
//! evictions, grabs, cycles, transit reclaim, overflow, coordinator, outbox,
//! snapshots.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bag;
pub mod config;
pub mod cycling;
pub mod eligibility;
pub mod error;
pub mod eviction;
pub mod hooks;
pub mod journal;
pub mod metrics;
pub mod persistence;
pub mod registry;
pub mod scene;
pub mod seeker;
pub mod sync;
pub mod tasks;
pub mod types;

pub use bag::Bag;
pub use config::StashConfig;
pub use cycling::Transition;
pub use error::{Rejected, Result, StashError};
pub use eviction::EvictionReason;
pub use registry::{SlotContext, SlotEvent, SlotRegistry};
pub use scene::{RehydrationReport, SceneTransitionCoordinator, WorldReadySignal};
pub use seeker::OwnershipSeeker;
pub use types::*;
