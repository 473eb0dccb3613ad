//! The transition-spanning persistence store.
//!
//! Records exist only between world-exit capture and successful rehydration.
//! Capture is always fresh: a record is removed once its occupant is back in
//! the live world, and recreated on the next capture only if still bagged.

use serde::{Deserialize, Serialize};

use crate::types::{GameTimestamp, OccupantId, PlayerId, SceneId, SlotKind, TransitionHandle};

/// Who an occupant belongs to. Survives detach/reattach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTag {
    /// The tagged occupant.
    pub occupant: OccupantId,
    /// Owning player; `None` for legacy or unowned occupants, which fall back
    /// to "any available carrier".
    pub owner: Option<PlayerId>,
}

/// One occupant held across a world transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceRecord {
    /// The occupant.
    pub occupant: OccupantId,
    /// Ownership tag.
    pub tag: OwnershipTag,
    /// Scene the occupant was captured from.
    pub captured_scene: SceneId,
    /// Holding-area token from the world graph.
    pub handle: TransitionHandle,
    /// Slot the occupant held at capture time; `None` for records mirrored
    /// from the host's ownership broadcast.
    pub slot: Option<SlotKind>,
    /// When it was captured.
    pub captured_at: GameTimestamp,
}

/// Records awaiting rehydration, in capture order.
#[derive(Debug, Clone, Default)]
pub struct PersistenceStore {
    records: Vec<PersistenceRecord>,
}

impl PersistenceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `record`, replacing any existing record for the same occupant.
    pub fn insert(&mut self, record: PersistenceRecord) -> Option<PersistenceRecord> {
        if let Some(existing) = self.records.iter_mut().find(|r| r.occupant == record.occupant) {
            return Some(std::mem::replace(existing, record));
        }
        self.records.push(record);
        None
    }

    /// Remove the record for `occupant`.
    pub fn remove(&mut self, occupant: OccupantId) -> Option<PersistenceRecord> {
        let idx = self.records.iter().position(|r| r.occupant == occupant)?;
        Some(self.records.remove(idx))
    }

    /// The record for `occupant`.
    #[must_use]
    pub fn get(&self, occupant: OccupantId) -> Option<&PersistenceRecord> {
        self.records.iter().find(|r| r.occupant == occupant)
    }

    /// All records in capture order.
    #[must_use]
    pub fn records(&self) -> &[PersistenceRecord] {
        &self.records
    }

    /// Ownership tags of every record.
    #[must_use]
    pub fn tags(&self) -> Vec<OwnershipTag> {
        self.records.iter().map(|r| r.tag.clone()).collect()
    }

    /// Records tagged with `owner`.
    pub fn owned_by<'a>(&'a self, owner: &'a PlayerId) -> impl Iterator<Item = &'a PersistenceRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.tag.owner.as_ref() == Some(owner))
    }

    /// Replace the contents wholesale (journal restore).
    pub fn restore(&mut self, records: Vec<PersistenceRecord>) {
        self.records.clear();
        for record in records {
            self.insert(record);
        }
    }

    /// Drop every record (new session). Returns how many were dropped.
    pub fn reset(&mut self) -> usize {
        let n = self.records.len();
        self.records.clear();
        n
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
