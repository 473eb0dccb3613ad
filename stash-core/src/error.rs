//! Error types for the stash core library.
//!
//! Assignment rejections and per-record rehydration failures are ordinary,
//! non-fatal outcomes; [`StashError`] covers the I/O, codec and
//! authority failures around them.

use thiserror::Error;

use crate::types::{CarrierId, OccupantId};

/// Why an occupant could not be assigned to a bag.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    /// The bag already holds `capacity` settled occupants.
    #[error("Bag full (capacity: {capacity})")]
    Full {
        /// Capacity reported by the oracle for this decision.
        capacity: u32,
    },

    /// The eligibility predicate refused the occupant.
    #[error("Occupant is not eligible for capture")]
    Ineligible,

    /// The occupant already belongs to another carrier's bag.
    #[error("Occupant already held by carrier {holder}")]
    AlreadyElsewhere {
        /// Carrier currently holding the occupant.
        holder: CarrierId,
    },

    /// The carrier has no bag registered.
    #[error("Unknown carrier {0}")]
    UnknownCarrier(CarrierId),
}

/// Why a single persistence record could not be rehydrated.
///
/// Failed records are logged and dropped, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RehydrationFailure {
    /// The world no longer resolves the transition handle.
    #[error("Occupant {0} no longer resolvable")]
    Unresolvable(OccupantId),

    /// The world refused to attach the occupant.
    #[error("Attach failed for occupant {occupant}: {reason}")]
    AttachFailed {
        /// The occupant that failed.
        occupant: OccupantId,
        /// World-supplied reason.
        reason: String,
    },
}

/// Top-level error type for stash operations.
#[derive(Error, Debug)]
pub enum StashError {
    /// A slot assignment was refused.
    #[error("Assignment rejected: {0}")]
    Rejected(#[from] Rejected),

    /// The carrier is not registered.
    #[error("Carrier not found: {0}")]
    CarrierNotFound(CarrierId),

    /// A carrier handle outlived its arena slot.
    #[error("Stale carrier handle (index {index}, generation {generation})")]
    StaleHandle {
        /// Arena index.
        index: u32,
        /// Generation the handle was issued for.
        generation: u32,
    },

    /// The operation requires the host-authoritative role.
    #[error("Operation `{0}` requires the host role")]
    NotAuthoritative(&'static str),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite journal error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, StashError>;
