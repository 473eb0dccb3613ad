//! # stash-host: Host Integration for Stash
//!
//! Glue between the game-agnostic `stash-core` engine and a running game.
//!
//! ```text
//! ┌──────────────── game ─────────────────┐
//! │  gameplay code ── GameEvent ──┐       │
//! │                               ▼       │
//! │  run_tick_loop ──tick──▶ StashRule    │
//! │                           │     │     │
//! │                 HostWorld ◀     ▶ SyncPort ── other participants
//! └───────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: role, tick rate and snapshot cadence on top of `StashConfig`
//! - `events`: game events and their per-tick phase order
//! - `rule`: the per-tick rule driving registry, coordinator and sync
//! - `world`: the host world surface and an in-memory `SimWorld`
//! - `driver`: tokio tick loop
//! - `telemetry`: tracing subscriber bootstrap

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod driver;
pub mod events;
pub mod rule;
pub mod telemetry;
pub mod world;

pub use config::HostConfig;
pub use events::GameEvent;
pub use rule::{StashRule, TickReport};
pub use world::{HostWorld, SimWorld};
