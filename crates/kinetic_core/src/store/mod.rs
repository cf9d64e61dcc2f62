//! # Entity Store
//!
//! Structure-of-arrays repository of every entity property and tag. The
//! single source of truth for the simulation.
//!
//! ```text
//! properties (column per property id):
//!            e0    e1    e2   ...  e1023
//!   PosX   [ 10 ][  0 ][ -5 ] ... [  0 ]
//!   PosY   [ 20 ][  0 ][  7 ] ... [  0 ]
//!   ...
//!   Mask   [255 ][  0 ][  1 ] ... [  0 ]
//! ```
//!
//! All memory is allocated once in [`EntityStore::new`]. Ids are recycled
//! lowest-first, so a restored store hands out the same ids as the one it
//! was saved from.

mod context;
mod replica;
mod serialize;

use std::collections::BTreeSet;

use kinetic_shared::{
    prop, round_to_i32, EntityId, EntitySnapshot, PropertyId, Tag, TagContainer, Vec3,
    MAX_ENTITIES, MAX_PROPERTIES,
};

pub use context::LocalContext;
pub use serialize::{STATE_MAGIC, STATE_VERSION};

static EMPTY_TAGS: TagContainer = TagContainer::new();

/// One buffered property write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingWrite {
    /// Target entity.
    pub entity: EntityId,
    /// Property slot.
    pub property: PropertyId,
    /// Value to store.
    pub value: i32,
}

/// The entity store.
///
/// # Capacity
///
/// Fixed at [`MAX_ENTITIES`]. Allocation past capacity returns
/// [`EntityId::INVALID`] and logs a warning; it never panics.
pub struct EntityStore {
    /// Property columns: `properties[prop * MAX_ENTITIES + entity]`.
    properties: Box<[i32]>,
    /// Tags per entity slot.
    tags: Box<[TagContainer]>,
    /// Validity flag per slot.
    valid: Box<[bool]>,
    /// Completed frame at allocation time.
    creation_frames: Box<[i32]>,
    /// Recycled ids below `next_id`.
    free_ids: BTreeSet<i32>,
    /// First never-used id.
    next_id: i32,
    /// Number of valid entities.
    entity_count: usize,
    /// Last frame marked complete.
    completed_frame: i32,
}

impl EntityStore {
    /// Creates an empty store with all memory pre-allocated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            properties: vec![0; MAX_PROPERTIES * MAX_ENTITIES].into_boxed_slice(),
            tags: (0..MAX_ENTITIES)
                .map(|_| TagContainer::new())
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            valid: vec![false; MAX_ENTITIES].into_boxed_slice(),
            creation_frames: vec![0; MAX_ENTITIES].into_boxed_slice(),
            free_ids: BTreeSet::new(),
            next_id: 0,
            entity_count: 0,
            completed_frame: 0,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Allocates an entity with zeroed properties and no tags.
    ///
    /// # Returns
    ///
    /// The new id, or `EntityId::INVALID` when capacity is exhausted.
    pub fn allocate(&mut self) -> EntityId {
        let raw = if let Some(id) = self.free_ids.pop_first() {
            id
        } else if usize::try_from(self.next_id).map_or(false, |n| n < MAX_ENTITIES) {
            let id = self.next_id;
            self.next_id += 1;
            id
        } else {
            tracing::warn!("[EntityStore] capacity exhausted ({} entities)", MAX_ENTITIES);
            return EntityId::INVALID;
        };

        let entity = EntityId::new(raw);
        let Some(index) = entity.index() else {
            return EntityId::INVALID;
        };

        for column in 0..MAX_PROPERTIES {
            self.properties[column * MAX_ENTITIES + index] = 0;
        }
        self.tags[index].clear();
        self.valid[index] = true;
        self.creation_frames[index] = self.completed_frame;
        self.entity_count += 1;

        tracing::trace!("[EntityStore] allocated entity {}", entity);
        entity
    }

    /// Frees an entity. Invalid ids are ignored.
    pub fn free(&mut self, entity: EntityId) {
        let Some(index) = self.valid_index(entity) else {
            return;
        };
        self.valid[index] = false;
        self.tags[index].clear();
        self.free_ids.insert(entity.raw());
        self.entity_count -= 1;
        tracing::trace!("[EntityStore] freed entity {}", entity);
    }

    /// True if the id refers to an allocated entity.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, entity: EntityId) -> bool {
        self.valid_index(entity).is_some()
    }

    /// Number of valid entities.
    #[inline]
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.entity_count
    }

    /// The next never-used id.
    #[inline]
    #[must_use]
    pub const fn next_id(&self) -> i32 {
        self.next_id
    }

    /// Last frame passed to [`Self::mark_frame_completed`].
    #[inline]
    #[must_use]
    pub const fn completed_frame(&self) -> i32 {
        self.completed_frame
    }

    /// Records that `frame` has been fully simulated.
    pub fn mark_frame_completed(&mut self, frame: i32) {
        self.completed_frame = frame;
    }

    /// Weak staleness check: true iff the entity exists and was created at
    /// or before `frame`. This does not detect id reuse.
    #[must_use]
    pub fn validate_entity_frame(&self, entity: EntityId, frame: i32) -> bool {
        self.valid_index(entity)
            .is_some_and(|index| self.creation_frames[index] <= frame)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Reads a property. Invalid entities and out-of-range slots read 0.
    #[inline]
    #[must_use]
    pub fn get_property(&self, entity: EntityId, property: PropertyId) -> i32 {
        match (self.valid_index(entity), usize::from(property)) {
            (Some(index), column) if column < MAX_PROPERTIES => {
                self.properties[column * MAX_ENTITIES + index]
            }
            _ => 0,
        }
    }

    /// Writes a property. Invalid entities and out-of-range slots are ignored.
    #[inline]
    pub fn set_property(&mut self, entity: EntityId, property: PropertyId, value: i32) {
        if let (Some(index), column) = (self.valid_index(entity), usize::from(property)) {
            if column < MAX_PROPERTIES {
                self.properties[column * MAX_ENTITIES + index] = value;
            }
        }
    }

    /// Applies a batch of buffered writes in order.
    pub fn apply_writes(&mut self, writes: &[PendingWrite]) {
        for write in writes {
            self.set_property(write.entity, write.property, write.value);
        }
    }

    // =========================================================================
    // Tags
    // =========================================================================

    /// Tags of an entity (empty for invalid ids).
    #[must_use]
    pub fn tags(&self, entity: EntityId) -> &TagContainer {
        self.valid_index(entity).map_or(&EMPTY_TAGS, |index| &self.tags[index])
    }

    /// Replaces the tag set.
    pub fn set_tags(&mut self, entity: EntityId, tags: TagContainer) {
        if let Some(index) = self.valid_index(entity) {
            self.tags[index] = tags;
        }
    }

    /// Adds a tag unless it is already present exactly.
    pub fn add_tag(&mut self, entity: EntityId, tag: Tag) {
        if let Some(index) = self.valid_index(entity) {
            self.tags[index].add(tag);
        }
    }

    /// Removes an exact tag.
    pub fn remove_tag(&mut self, entity: EntityId, tag: &Tag) {
        if let Some(index) = self.valid_index(entity) {
            self.tags[index].remove(tag);
        }
    }

    /// Ancestor-aware tag test.
    #[must_use]
    pub fn has_tag(&self, entity: EntityId, tag: &Tag) -> bool {
        self.tags(entity).has_tag(tag)
    }

    /// Exact tag test.
    #[must_use]
    pub fn has_tag_exact(&self, entity: EntityId, tag: &Tag) -> bool {
        self.tags(entity).has_tag_exact(tag)
    }

    /// True if any of `tags` matches.
    #[must_use]
    pub fn has_any_tags(&self, entity: EntityId, tags: &TagContainer) -> bool {
        self.tags(entity).has_any(tags)
    }

    /// True if all of `tags` match.
    #[must_use]
    pub fn has_all_tags(&self, entity: EntityId, tags: &TagContainer) -> bool {
        self.tags(entity).has_all(tags)
    }

    /// First tag under `parent`.
    #[must_use]
    pub fn first_tag_with_parent(&self, entity: EntityId, parent: &Tag) -> Option<Tag> {
        self.tags(entity).first_with_parent(parent).cloned()
    }

    /// Every tag under `parent`.
    #[must_use]
    pub fn tags_with_parent(&self, entity: EntityId, parent: &Tag) -> TagContainer {
        self.tags(entity).filter_with_parent(parent)
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterates valid entities by ascending id.
    pub fn iter_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        let end = usize::try_from(self.next_id).unwrap_or(0).min(MAX_ENTITIES);
        self.valid[..end]
            .iter()
            .enumerate()
            .filter(|(_, valid)| **valid)
            .filter_map(|(index, _)| i32::try_from(index).ok().map(EntityId::new))
    }

    /// Calls `visitor` for every valid entity by ascending id.
    pub fn for_each_entity(&self, mut visitor: impl FnMut(EntityId)) {
        for entity in self.iter_entities() {
            visitor(entity);
        }
    }

    /// Calls `visitor` for every other valid entity within `radius` of
    /// `center` (inclusive, squared integer distance). Brute force.
    pub fn for_each_entity_in_radius(
        &self,
        center: EntityId,
        radius: i32,
        mut visitor: impl FnMut(EntityId),
    ) {
        let Some([cx, cy, cz]) = self.position_ints(center) else {
            return;
        };
        let radius_sq = i64::from(radius) * i64::from(radius);
        for entity in self.iter_entities() {
            if entity == center {
                continue;
            }
            let Some([x, y, z]) = self.position_ints(entity) else {
                continue;
            };
            let dx = i64::from(x) - i64::from(cx);
            let dy = i64::from(y) - i64::from(cy);
            let dz = i64::from(z) - i64::from(cz);
            if dx * dx + dy * dy + dz * dz <= radius_sq {
                visitor(entity);
            }
        }
    }

    // =========================================================================
    // Positions
    // =========================================================================

    /// Stored position of a valid entity.
    #[must_use]
    pub fn try_get_position(&self, entity: EntityId) -> Option<Vec3> {
        self.position_ints(entity)
            .map(|[x, y, z]| Vec3::from_ints(x, y, z))
    }

    /// Stores a position, rounding each component to integer units.
    pub fn set_position(&mut self, entity: EntityId, position: Vec3) {
        self.set_property(entity, prop::POS_X, round_to_i32(position.x));
        self.set_property(entity, prop::POS_Y, round_to_i32(position.y));
        self.set_property(entity, prop::POS_Z, round_to_i32(position.z));
    }

    fn position_ints(&self, entity: EntityId) -> Option<[i32; 3]> {
        self.valid_index(entity)?;
        Some([
            self.get_property(entity, prop::POS_X),
            self.get_property(entity, prop::POS_Y),
            self.get_property(entity, prop::POS_Z),
        ])
    }

    // =========================================================================
    // Checksums & Snapshots
    // =========================================================================

    /// XOR-and-rotate fold over every valid entity, finished with the
    /// completed frame number. Used for divergence detection.
    #[must_use]
    pub fn calculate_checksum(&self) -> u32 {
        let mut hash = 0u32;
        for entity in self.iter_entities() {
            hash = self.fold_entity(hash, entity);
        }
        #[allow(clippy::cast_sign_loss)]
        let frame = self.completed_frame as u32;
        hash ^ frame
    }

    /// Same fold restricted to `entities` (in the given order, invalid ids
    /// skipped), without the frame number.
    #[must_use]
    pub fn calculate_partial_checksum(&self, entities: &[EntityId]) -> u32 {
        entities
            .iter()
            .filter(|e| self.is_valid(**e))
            .fold(0u32, |hash, &entity| self.fold_entity(hash, entity))
    }

    #[allow(clippy::cast_sign_loss)]
    fn fold_entity(&self, mut hash: u32, entity: EntityId) -> u32 {
        let Some(index) = self.valid_index(entity) else {
            return hash;
        };
        for column in 0..MAX_PROPERTIES {
            hash ^= self.properties[column * MAX_ENTITIES + index] as u32;
            hash = hash.rotate_left(1);
        }
        for tag in &self.tags[index] {
            hash ^= tag.stable_hash();
            hash = hash.rotate_left(1);
        }
        hash ^ entity.raw() as u32
    }

    /// Full copy of one entity (invalid placeholder for invalid ids).
    #[must_use]
    pub fn create_snapshot(&self, entity: EntityId) -> EntitySnapshot {
        let Some(index) = self.valid_index(entity) else {
            return EntitySnapshot::invalid();
        };
        EntitySnapshot {
            entity_id: entity,
            properties: self.property_row(index),
            tags: self.tags[index].clone(),
        }
    }

    /// Snapshots of every valid id in `entities`.
    #[must_use]
    pub fn create_snapshots(&self, entities: &[EntityId]) -> Vec<EntitySnapshot> {
        entities
            .iter()
            .filter(|e| self.is_valid(**e))
            .map(|&e| self.create_snapshot(e))
            .collect()
    }

    fn property_row(&self, index: usize) -> Vec<i32> {
        (0..MAX_PROPERTIES)
            .map(|column| self.properties[column * MAX_ENTITIES + index])
            .collect()
    }

    #[inline]
    fn valid_index(&self, entity: EntityId) -> Option<usize> {
        entity.index().filter(|&index| self.valid[index])
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_free_roundtrip() {
        let mut store = EntityStore::new();
        let e = store.allocate();
        store.set_property(e, prop::HEALTH, 42);
        store.add_tag(e, Tag::new("Status.Burning"));
        store.free(e);
        assert!(!store.is_valid(e));

        let again = store.allocate();
        assert_eq!(again, e);
        for p in 0..MAX_PROPERTIES {
            assert_eq!(store.get_property(again, PropertyId::try_from(p).unwrap()), 0);
        }
        assert!(store.tags(again).is_empty());
    }

    #[test]
    fn test_capacity_exhaustion_returns_invalid() {
        let mut store = EntityStore::new();
        for _ in 0..MAX_ENTITIES {
            assert!(!store.allocate().is_invalid());
        }
        assert_eq!(store.allocate(), EntityId::INVALID);
        assert_eq!(store.entity_count(), MAX_ENTITIES);
    }

    #[test]
    fn test_lowest_free_id_reused_first() {
        let mut store = EntityStore::new();
        let ids: Vec<_> = (0..6).map(|_| store.allocate()).collect();
        store.free(ids[4]);
        store.free(ids[1]);
        assert_eq!(store.allocate(), ids[1]);
        assert_eq!(store.allocate(), ids[4]);
        assert_eq!(store.allocate(), EntityId::new(6));
    }

    #[test]
    fn test_invalid_access_is_inert() {
        let mut store = EntityStore::new();
        store.set_property(EntityId::new(3), prop::HEALTH, 9);
        assert_eq!(store.get_property(EntityId::new(3), prop::HEALTH), 0);
        assert_eq!(store.get_property(EntityId::INVALID, prop::HEALTH), 0);

        let e = store.allocate();
        store.set_property(e, 128, 5);
        assert_eq!(store.get_property(e, 128), 0);
    }

    #[test]
    fn test_tag_queries() {
        let mut store = EntityStore::new();
        let e = store.allocate();
        store.add_tag(e, Tag::new("Visual.Character.Default"));
        store.add_tag(e, Tag::new("Visual.Character.Default"));
        assert_eq!(store.tags(e).len(), 1);
        assert!(store.has_tag(e, &Tag::new("Visual.Character")));
        assert!(!store.has_tag_exact(e, &Tag::new("Visual.Character")));
        assert_eq!(
            store.first_tag_with_parent(e, &Tag::new("Visual")),
            Some(Tag::new("Visual.Character.Default"))
        );
        store.remove_tag(e, &Tag::new("Visual.Character.Default"));
        assert!(store.tags(e).is_empty());
    }

    #[test]
    fn test_position_rounding() {
        let mut store = EntityStore::new();
        let e = store.allocate();
        store.set_position(e, Vec3::new(10.5, -3.4, 7.6));
        assert_eq!(store.try_get_position(e), Some(Vec3::new(11.0, -3.0, 8.0)));
        assert_eq!(store.try_get_position(EntityId::new(500)), None);
    }

    #[test]
    fn test_radius_query_excludes_center_and_is_inclusive() {
        let mut store = EntityStore::new();
        let center = store.allocate();
        let edge = store.allocate();
        let far = store.allocate();
        store.set_position(center, Vec3::ZERO);
        store.set_position(edge, Vec3::new(300.0, 400.0, 0.0));
        store.set_position(far, Vec3::new(301.0, 400.0, 0.0));

        let mut found = Vec::new();
        store.for_each_entity_in_radius(center, 500, |e| found.push(e));
        assert_eq!(found, vec![edge]);
    }

    #[test]
    fn test_checksum_depends_on_state_and_frame() {
        let mut a = EntityStore::new();
        let mut b = EntityStore::new();
        for store in [&mut a, &mut b] {
            let e = store.allocate();
            store.set_property(e, prop::HEALTH, 100);
            store.add_tag(e, Tag::new("Team.Red"));
            store.mark_frame_completed(12);
        }
        assert_eq!(a.calculate_checksum(), b.calculate_checksum());

        b.mark_frame_completed(13);
        assert_ne!(a.calculate_checksum(), b.calculate_checksum());

        let e = EntityId::new(0);
        assert_eq!(a.calculate_partial_checksum(&[e]), b.calculate_partial_checksum(&[e]));
        b.set_property(e, prop::MANA, 1);
        assert_ne!(a.calculate_partial_checksum(&[e]), b.calculate_partial_checksum(&[e]));
    }

    #[test]
    fn test_validate_entity_frame() {
        let mut store = EntityStore::new();
        store.mark_frame_completed(10);
        let e = store.allocate();
        assert!(store.validate_entity_frame(e, 10));
        assert!(store.validate_entity_frame(e, 11));
        assert!(!store.validate_entity_frame(e, 9));
        assert!(!store.validate_entity_frame(EntityId::new(44), 100));
    }

    #[test]
    fn test_snapshots_skip_invalid() {
        let mut store = EntityStore::new();
        let e = store.allocate();
        store.set_property(e, prop::TEAM, 2);
        let snaps = store.create_snapshots(&[e, EntityId::new(9)]);
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].property(prop::TEAM), 2);
        assert_eq!(snaps[0].properties.len(), MAX_PROPERTIES);
        assert!(!store.create_snapshot(EntityId::new(9)).is_valid());
    }

    #[test]
    fn test_apply_writes_skips_invalid() {
        let mut store = EntityStore::new();
        let e = store.allocate();
        store.apply_writes(&[
            PendingWrite { entity: e, property: prop::HEALTH, value: 5 },
            PendingWrite { entity: EntityId::new(77), property: prop::HEALTH, value: 6 },
            PendingWrite { entity: e, property: prop::HEALTH, value: 7 },
        ]);
        assert_eq!(store.get_property(e, prop::HEALTH), 7);
        assert!(!store.is_valid(EntityId::new(77)));
    }
}
