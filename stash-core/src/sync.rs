//! Host → participant state replication.
//!
//! The host broadcasts two kinds of messages: ownership tags at world-exit
//! capture, and per-carrier slot snapshots after every mutation. Non-host
//! participants apply them to a [`MirrorState`] and never mutate slots
//! themselves.
//!
//! Transport framing is external: a [`SyncChannel`] moves opaque byte frames,
//! and a [`SyncPort`] encodes/decodes [`SyncMessage`]s with the configured
//! [`SyncCodec`].

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SyncCodec;
use crate::error::{Result, StashError};
use crate::persistence::OwnershipTag;
use crate::types::{CarrierId, Direction, OccupantId, PlayerId, SceneId};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Read-state of one carrier's bag, as seen by mirroring participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    /// The carrier.
    pub carrier: CarrierId,
    /// Primary occupant.
    pub primary: Option<OccupantId>,
    /// Secondary occupants in insertion order.
    pub secondary: Vec<OccupantId>,
    /// Direction of the cycle that produced this state, if any.
    pub cycle_direction: Option<Direction>,
    /// Bag revision; older snapshots are ignored.
    pub sequence: u64,
}

/// A replicated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Ownership tags captured at world exit.
    OwnershipTags {
        /// Scene the occupants left.
        scene: SceneId,
        /// One tag per captured occupant.
        tags: Vec<OwnershipTag>,
    },
    /// New slot state for a carrier.
    Snapshot(SlotSnapshot),
    /// The carrier left the world; drop its mirrored bag.
    CarrierGone {
        /// The departed carrier.
        carrier: CarrierId,
    },
}

impl SyncMessage {
    /// Encode with `codec`.
    ///
    /// # Errors
    /// Returns [`StashError::Serialization`] if encoding fails.
    pub fn encode(&self, codec: SyncCodec) -> Result<Vec<u8>> {
        match codec {
            SyncCodec::Msgpack => {
                rmp_serde::to_vec(self).map_err(|e| StashError::Serialization(e.to_string()))
            }
            SyncCodec::Bincode => {
                bincode::serialize(self).map_err(|e| StashError::Serialization(e.to_string()))
            }
        }
    }

    /// Decode a frame produced by [`SyncMessage::encode`] with the same codec.
    ///
    /// # Errors
    /// Returns [`StashError::Serialization`] on malformed frames.
    pub fn decode(bytes: &[u8], codec: SyncCodec) -> Result<Self> {
        match codec {
            SyncCodec::Msgpack => {
                rmp_serde::from_slice(bytes).map_err(|e| StashError::Serialization(e.to_string()))
            }
            SyncCodec::Bincode => {
                bincode::deserialize(bytes).map_err(|e| StashError::Serialization(e.to_string()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Byte-frame transport supplied by the host's networking layer.
pub trait SyncChannel {
    /// Broadcast a frame to every other participant.
    fn send(&mut self, frame: Vec<u8>);

    /// Next received frame, if any.
    fn recv(&mut self) -> Option<Vec<u8>>;
}

/// Encoding wrapper around a [`SyncChannel`].
#[derive(Debug)]
pub struct SyncPort<C> {
    channel: C,
    codec: SyncCodec,
}

impl<C: SyncChannel> SyncPort<C> {
    /// Wrap `channel` using `codec`.
    #[must_use]
    pub fn new(channel: C, codec: SyncCodec) -> Self {
        Self { channel, codec }
    }

    /// Encode and broadcast `message`.
    ///
    /// # Errors
    /// Returns [`StashError::Serialization`] if encoding fails; nothing is sent.
    pub fn broadcast(&mut self, message: &SyncMessage) -> Result<()> {
        let frame = message.encode(self.codec)?;
        debug!(bytes = frame.len(), "Broadcasting sync frame");
        self.channel.send(frame);
        Ok(())
    }

    /// Decode every pending frame. Malformed frames are logged and skipped.
    pub fn drain(&mut self) -> Vec<SyncMessage> {
        let mut out = Vec::new();
        while let Some(frame) = self.channel.recv() {
            match SyncMessage::decode(&frame, self.codec) {
                Ok(msg) => out.push(msg),
                Err(e) => warn!(error = %e, bytes = frame.len(), "Dropping malformed sync frame"),
            }
        }
        out
    }

    /// Borrow the underlying channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }
}

type FrameQueue = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// In-process channel endpoint. Frames sent on one end of a
/// [`LoopbackChannel::pair`] are received on the other.
#[derive(Debug, Clone)]
pub struct LoopbackChannel {
    outbound: FrameQueue,
    inbound: FrameQueue,
}

impl LoopbackChannel {
    /// Create two connected endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a_to_b: FrameQueue = Arc::default();
        let b_to_a: FrameQueue = Arc::default();
        (
            Self {
                outbound: Arc::clone(&a_to_b),
                inbound: Arc::clone(&b_to_a),
            },
            Self {
                outbound: b_to_a,
                inbound: a_to_b,
            },
        )
    }

    /// Frames waiting to be received on this endpoint.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbound.lock().len()
    }
}

impl SyncChannel for LoopbackChannel {
    fn send(&mut self, frame: Vec<u8>) {
        self.outbound.lock().push_back(frame);
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbound.lock().pop_front()
    }
}

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

/// A mirrored bag on a non-host participant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MirroredBag {
    /// Primary occupant.
    pub primary: Option<OccupantId>,
    /// Secondary occupants in insertion order.
    pub secondary: Vec<OccupantId>,
    /// Direction of the last cycle, for carousel animation.
    pub last_direction: Option<Direction>,
    /// Last applied sequence.
    pub sequence: u64,
}

/// Read-only replica of the host's slot state and ownership tags.
#[derive(Debug)]
pub struct MirrorState {
    bags: HashMap<CarrierId, MirroredBag>,
    tags: LruCache<OccupantId, Option<PlayerId>>,
    last_capture_scene: Option<SceneId>,
}

impl MirrorState {
    /// Create a mirror that remembers at most `tag_capacity` ownership tags.
    #[must_use]
    pub fn new(tag_capacity: usize) -> Self {
        let cap = NonZeroUsize::new(tag_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            bags: HashMap::new(),
            tags: LruCache::new(cap),
            last_capture_scene: None,
        }
    }

    /// Apply one message. Returns `false` if it was stale and ignored.
    pub fn apply(&mut self, message: SyncMessage) -> bool {
        match message {
            SyncMessage::OwnershipTags { scene, tags } => {
                debug!(scene = %scene, count = tags.len(), "Mirroring ownership tags");
                for tag in tags {
                    self.tags.put(tag.occupant, tag.owner);
                }
                self.last_capture_scene = Some(scene);
                true
            }
            SyncMessage::Snapshot(snapshot) => {
                let entry = self.bags.entry(snapshot.carrier).or_default();
                if snapshot.sequence <= entry.sequence && entry.sequence != 0 {
                    debug!(
                        carrier = %snapshot.carrier,
                        sequence = snapshot.sequence,
                        applied = entry.sequence,
                        "Ignoring stale slot snapshot"
                    );
                    return false;
                }
                *entry = MirroredBag {
                    primary: snapshot.primary,
                    secondary: snapshot.secondary,
                    last_direction: snapshot.cycle_direction,
                    sequence: snapshot.sequence,
                };
                true
            }
            SyncMessage::CarrierGone { carrier } => self.bags.remove(&carrier).is_some(),
        }
    }

    /// Mirrored primary occupant of `carrier`.
    #[must_use]
    pub fn primary_of(&self, carrier: CarrierId) -> Option<OccupantId> {
        self.bags.get(&carrier).and_then(|b| b.primary)
    }

    /// Mirrored secondary occupants of `carrier`.
    #[must_use]
    pub fn secondary_of(&self, carrier: CarrierId) -> Vec<OccupantId> {
        self.bags
            .get(&carrier)
            .map(|b| b.secondary.clone())
            .unwrap_or_default()
    }

    /// Full mirrored bag of `carrier`.
    #[must_use]
    pub fn bag(&self, carrier: CarrierId) -> Option<&MirroredBag> {
        self.bags.get(&carrier)
    }

    /// Mirrored owner tag of `occupant`. The outer `None` means no tag is
    /// known; `Some(None)` is an unowned occupant.
    #[must_use]
    pub fn owner_of(&self, occupant: OccupantId) -> Option<Option<PlayerId>> {
        self.tags.peek(&occupant).cloned()
    }

    /// Scene of the last ownership broadcast.
    #[must_use]
    pub fn last_capture_scene(&self) -> Option<&SceneId> {
        self.last_capture_scene.as_ref()
    }

    /// Number of ownership tags currently held.
    #[must_use]
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}
