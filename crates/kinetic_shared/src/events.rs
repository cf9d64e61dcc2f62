//! # Simulation Events
//!
//! ```text
//! networking ──IntentEvent──┐
//!                           ├──> VM Processor ──> Entity Store
//! physics ───SystemEvent────┘          │
//!                                      └──> Spatial ──CellChangeEvent──> relevancy
//! ```
//!
//! Intent events are replicated input. System events are local reactions
//! and never leave the process.

use serde::{Deserialize, Serialize};

use crate::math::{CellCoord, Vec3};
use crate::tag::{Tag, TagContainer};
use crate::types::{EntityId, MAX_PROPERTIES};

/// Externally submitted, replicated input event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentEvent {
    /// Event id assigned by the submitter (0 = unassigned).
    pub event_id: i32,
    /// Entity that acts.
    pub source: EntityId,
    /// Optional target entity.
    pub target: EntityId,
    /// Dispatch tag (selects the program).
    pub tag: Tag,
    /// Target location.
    pub location: Vec3,
    /// Opaque payload. Up to four little-endian `i32` parameters are extracted.
    pub payload: Vec<u8>,
    /// Broadcast to every observer regardless of relevancy.
    pub is_global: bool,
}

impl IntentEvent {
    /// Creates an event with no target, location or payload.
    #[must_use]
    pub fn new(event_id: i32, source: EntityId, tag: Tag) -> Self {
        Self {
            event_id,
            source,
            target: EntityId::INVALID,
            tag,
            location: Vec3::ZERO,
            payload: Vec::new(),
            is_global: false,
        }
    }

    /// Sets the target entity.
    #[must_use]
    pub fn with_target(mut self, target: EntityId) -> Self {
        self.target = target;
        self
    }

    /// Sets the target location.
    #[must_use]
    pub fn with_location(mut self, location: Vec3) -> Self {
        self.location = location;
        self
    }

    /// Encodes integer parameters into the payload.
    #[must_use]
    pub fn with_params(mut self, params: &[i32]) -> Self {
        self.payload = params.iter().flat_map(|p| p.to_le_bytes()).collect();
        self
    }

    /// Decodes up to four `i32` parameters from the payload.
    #[must_use]
    pub fn params(&self) -> Vec<i32> {
        self.payload
            .chunks_exact(4)
            .take(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// True once an id has been assigned.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.event_id != 0
    }
}

/// Locally generated reaction event (collision, timer). Never replicated.
#[derive(Clone, Debug, PartialEq)]
pub struct SystemEvent {
    /// Dispatch tag.
    pub tag: Tag,
    /// Originating entity (may be invalid for world events).
    pub source: EntityId,
    /// Other participant.
    pub target: EntityId,
    /// Where it happened.
    pub location: Vec3,
    /// Free integer parameter.
    pub param0: i32,
    /// Free integer parameter.
    pub param1: i32,
}

impl SystemEvent {
    /// Creates an event with zeroed parameters.
    #[must_use]
    pub fn new(tag: Tag, source: EntityId, target: EntityId, location: Vec3) -> Self {
        Self {
            tag,
            source,
            target,
            location,
            param0: 0,
            param1: 0,
        }
    }
}

/// An entity moved between spatial cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellChangeEvent {
    /// The entity.
    pub entity: EntityId,
    /// Previous cell (`INVALID` on enter).
    pub old_cell: CellCoord,
    /// New cell (`INVALID` on exit).
    pub new_cell: CellCoord,
}

impl CellChangeEvent {
    /// Entity gained a position.
    #[must_use]
    pub const fn is_enter(&self) -> bool {
        !self.old_cell.is_valid() && self.new_cell.is_valid()
    }

    /// Entity was removed.
    #[must_use]
    pub const fn is_exit(&self) -> bool {
        self.old_cell.is_valid() && !self.new_cell.is_valid()
    }

    /// Entity crossed a cell boundary.
    #[must_use]
    pub fn is_move(&self) -> bool {
        self.old_cell.is_valid() && self.new_cell.is_valid() && self.old_cell != self.new_cell
    }
}

/// Full copy of one entity, for replication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Which entity.
    pub entity_id: EntityId,
    /// All `MAX_PROPERTIES` property values.
    pub properties: Vec<i32>,
    /// All tags.
    pub tags: TagContainer,
}

impl EntitySnapshot {
    /// An empty snapshot for an invalid entity.
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            entity_id: EntityId::INVALID,
            properties: vec![0; MAX_PROPERTIES],
            tags: TagContainer::new(),
        }
    }

    /// False for the invalid placeholder.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.entity_id.is_invalid()
    }

    /// Reads one property (0 when out of range).
    #[must_use]
    pub fn property(&self, id: u16) -> i32 {
        self.properties.get(usize::from(id)).copied().unwrap_or(0)
    }

    /// Ancestor tag match.
    #[must_use]
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.has_tag(tag)
    }

    /// Exact tag match.
    #[must_use]
    pub fn has_tag_exact(&self, tag: &Tag) -> bool {
        self.tags.has_tag_exact(tag)
    }
}

/// Per-observer payload produced after a tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrameBatch {
    /// Frame this batch describes.
    pub frame_number: i32,
    /// Entities that became relevant.
    pub snapshots: Vec<EntitySnapshot>,
    /// Entities that stopped being relevant.
    pub removed_entities: Vec<EntityId>,
    /// Intent events of the frame.
    pub events: Vec<IntentEvent>,
}

impl FrameBatch {
    /// Nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.snapshots.is_empty() && self.removed_entities.is_empty()
    }

    /// Clears for reuse.
    pub fn reset(&mut self) {
        self.frame_number = 0;
        self.snapshots.clear();
        self.removed_entities.clear();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_params_little_endian() {
        let event = IntentEvent::new(1, EntityId::new(3), Tag::new("Ability.Dash"))
            .with_params(&[7, -2, 300, 4, 99]);
        assert_eq!(event.payload.len(), 20);
        assert_eq!(event.params(), vec![7, -2, 300, 4]);
    }

    #[test]
    fn test_payload_partial_word_ignored() {
        let mut event = IntentEvent::new(1, EntityId::new(0), Tag::new("A"));
        event.payload = vec![1, 0, 0, 0, 9, 9];
        assert_eq!(event.params(), vec![1]);
    }

    #[test]
    fn test_cell_change_classification() {
        let e = EntityId::new(1);
        let enter = CellChangeEvent { entity: e, old_cell: CellCoord::INVALID, new_cell: CellCoord::new(0, 0) };
        let exit = CellChangeEvent { entity: e, old_cell: CellCoord::new(0, 0), new_cell: CellCoord::INVALID };
        let moved = CellChangeEvent { entity: e, old_cell: CellCoord::new(0, 0), new_cell: CellCoord::new(1, 0) };
        assert!(enter.is_enter() && !enter.is_exit() && !enter.is_move());
        assert!(exit.is_exit() && !exit.is_enter());
        assert!(moved.is_move());
    }

    #[test]
    fn test_frame_batch_reset() {
        let mut batch = FrameBatch { frame_number: 5, ..FrameBatch::default() };
        batch.removed_entities.push(EntityId::new(2));
        assert!(!batch.is_empty());
        batch.reset();
        assert!(batch.is_empty());
        assert_eq!(batch.frame_number, 0);
    }
}
