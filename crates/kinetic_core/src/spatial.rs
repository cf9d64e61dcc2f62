//! # Spatial System
//!
//! Cell index over entity positions plus collider queries.
//!
//! ```text
//! tick:  VM writes positions ──> update_entity_positions ──> CellChangeEvents
//!                                        │
//!                                        v
//!        resolve_overlaps_and_gen_events: push apart now, SystemEvent next tick
//! ```
//!
//! Collider data lives in entity properties; this system only caches which
//! entities currently have a collider. Every container that is iterated is
//! ordered by entity id so results never depend on hashing.

use std::collections::{BTreeMap, BTreeSet};

use kinetic_shared::{
    prop, CellChangeEvent, CellCoord, ColliderType, EntityId, SystemEvent, Tag, Vec3, MAX_ENTITIES,
};

use crate::physics::{
    capsule_endpoints, overlap_colliders, overlap_sphere_capsule, overlap_sphere_sphere,
    raycast_capsule, raycast_sphere, sweep_sphere_capsule, sweep_sphere_sphere, test_colliders,
    ColliderShape, CollisionPair, CollisionResult, RaycastResult, SweepResult, MAX_OVERLAP_RESULTS,
};
use crate::store::EntityStore;

/// Default cell edge length in world units.
pub const DEFAULT_CELL_SIZE: f32 = 5000.0;

/// Default tag of collision system events.
pub const DEFAULT_COLLISION_EVENT_TAG: &str = "Event.System.OnCollision";

/// Cell index, watch set and collider cache.
pub struct SpatialSystem {
    cell_size: f32,
    /// Current cell per entity slot.
    entity_cells: Box<[CellCoord]>,
    cell_to_entities: BTreeMap<CellCoord, BTreeSet<EntityId>>,
    pending_cell_events: Vec<CellChangeEvent>,
    watched: BTreeSet<EntityId>,
    active_colliders: Vec<EntityId>,
    active_dirty: bool,
    collision_event_tag: Tag,
}

impl SpatialSystem {
    /// Creates an empty index with the given cell size.
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { DEFAULT_CELL_SIZE };
        tracing::info!("[SpatialSystem] initialized (cell size {:.0})", cell_size);
        Self {
            cell_size,
            entity_cells: vec![CellCoord::INVALID; MAX_ENTITIES].into_boxed_slice(),
            cell_to_entities: BTreeMap::new(),
            pending_cell_events: Vec::new(),
            watched: BTreeSet::new(),
            active_colliders: Vec::with_capacity(MAX_ENTITIES),
            active_dirty: true,
            collision_event_tag: Tag::new(DEFAULT_COLLISION_EVENT_TAG),
        }
    }

    // =========================================================================
    // Cells
    // =========================================================================

    /// Current cell edge length.
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Changes the cell size and rebuilds the index silently.
    ///
    /// Non-positive or unchanged sizes are ignored. Pending cell events are
    /// discarded.
    #[allow(clippy::float_cmp)]
    pub fn set_cell_size(&mut self, store: &EntityStore, cell_size: f32) {
        if cell_size <= 0.0 || cell_size == self.cell_size {
            return;
        }
        self.cell_size = cell_size;
        self.cell_to_entities.clear();
        self.pending_cell_events.clear();
        self.entity_cells.fill(CellCoord::INVALID);

        for entity in store.iter_entities() {
            if let (Some(pos), Some(index)) = (store.try_get_position(entity), entity.index()) {
                let cell = CellCoord::from_position(pos, self.cell_size);
                self.entity_cells[index] = cell;
                self.cell_to_entities.entry(cell).or_default().insert(entity);
            }
        }
        tracing::info!(
            "[SpatialSystem] cell size changed to {:.0}, rebuilt index",
            self.cell_size
        );
    }

    /// Cell the entity currently occupies (`INVALID` if none).
    #[must_use]
    pub fn get_entity_cell(&self, entity: EntityId) -> CellCoord {
        entity
            .index()
            .map_or(CellCoord::INVALID, |index| self.entity_cells[index])
    }

    /// Entities in one cell.
    #[must_use]
    pub fn get_entities_in_cell(&self, cell: CellCoord) -> Option<&BTreeSet<EntityId>> {
        self.cell_to_entities.get(&cell)
    }

    /// Adds the entities of every listed cell to `out`.
    pub fn get_entities_in_cells<'a>(
        &self,
        cells: impl IntoIterator<Item = &'a CellCoord>,
        out: &mut BTreeSet<EntityId>,
    ) {
        for cell in cells {
            if let Some(entities) = self.cell_to_entities.get(cell) {
                out.extend(entities.iter().copied());
            }
        }
    }

    /// Number of non-empty cells.
    #[must_use]
    pub fn occupied_cell_count(&self) -> usize {
        self.cell_to_entities.len()
    }

    /// Takes every cell change recorded since the last call.
    pub fn consume_cell_change_events(&mut self) -> Vec<CellChangeEvent> {
        std::mem::take(&mut self.pending_cell_events)
    }

    /// Re-derives every entity's cell from its stored position.
    pub fn update_entity_positions(&mut self, store: &EntityStore) {
        for entity in store.iter_entities() {
            if let Some(pos) = store.try_get_position(entity) {
                let cell = CellCoord::from_position(pos, self.cell_size);
                self.update_entity_cell(entity, cell);
            }
        }
        self.active_dirty = true;
    }

    fn update_entity_cell(&mut self, entity: EntityId, new_cell: CellCoord) {
        let Some(index) = entity.index() else {
            return;
        };
        let old_cell = self.entity_cells[index];
        if old_cell == new_cell {
            return;
        }

        self.remove_from_cell(entity, old_cell);
        if new_cell.is_valid() {
            self.cell_to_entities.entry(new_cell).or_default().insert(entity);
        }
        self.entity_cells[index] = new_cell;
        self.pending_cell_events.push(CellChangeEvent {
            entity,
            old_cell,
            new_cell,
        });
    }

    fn remove_from_cell(&mut self, entity: EntityId, cell: CellCoord) {
        if !cell.is_valid() {
            return;
        }
        if let Some(set) = self.cell_to_entities.get_mut(&cell) {
            set.remove(&entity);
            if set.is_empty() {
                self.cell_to_entities.remove(&cell);
            }
        }
    }

    // =========================================================================
    // Lifecycle hooks
    // =========================================================================

    /// A fresh entity has no cell yet.
    pub fn on_entity_allocated(&mut self, entity: EntityId) {
        if let Some(index) = entity.index() {
            self.entity_cells[index] = CellCoord::INVALID;
            self.active_dirty = true;
        }
    }

    /// Drops the entity from its cell (emitting an Exit) and from the watch set.
    pub fn on_entity_freed(&mut self, entity: EntityId) {
        let Some(index) = entity.index() else {
            return;
        };
        let old_cell = self.entity_cells[index];
        if old_cell.is_valid() {
            self.remove_from_cell(entity, old_cell);
            self.pending_cell_events.push(CellChangeEvent {
                entity,
                old_cell,
                new_cell: CellCoord::INVALID,
            });
        }
        self.entity_cells[index] = CellCoord::INVALID;
        self.watched.remove(&entity);
        self.active_dirty = true;
    }

    /// Forgets everything (used after a state restore).
    pub fn reset(&mut self) {
        self.entity_cells.fill(CellCoord::INVALID);
        self.cell_to_entities.clear();
        self.pending_cell_events.clear();
        self.watched.clear();
        self.active_colliders.clear();
        self.active_dirty = true;
    }

    // =========================================================================
    // Watch set
    // =========================================================================

    /// Opts an entity into watched collision detection.
    pub fn add_watched_entity(&mut self, entity: EntityId) {
        if !entity.is_invalid() {
            self.watched.insert(entity);
        }
    }

    /// Removes an entity from the watch set.
    pub fn remove_watched_entity(&mut self, entity: EntityId) {
        self.watched.remove(&entity);
    }

    /// True if the entity is watched.
    #[must_use]
    pub fn is_watched(&self, entity: EntityId) -> bool {
        self.watched.contains(&entity)
    }

    /// Empties the watch set.
    pub fn clear_watched_entities(&mut self) {
        self.watched.clear();
    }

    /// Sets the tag of generated collision events. An empty tag disables them.
    pub fn set_collision_event_tag(&mut self, tag: Tag) {
        self.collision_event_tag = tag;
    }

    /// Tag of generated collision events.
    #[must_use]
    pub const fn collision_event_tag(&self) -> &Tag {
        &self.collision_event_tag
    }

    // =========================================================================
    // Collision detection
    // =========================================================================

    /// For each watched collider, the first overlapping compatible collider
    /// in id order. Not necessarily the nearest one.
    pub fn detect_watched_collisions(&mut self, store: &EntityStore, out: &mut Vec<CollisionPair>) -> usize {
        if self.watched.is_empty() {
            return 0;
        }
        self.refresh_active_colliders(store);

        let mut found = 0;
        for &watched in &self.watched {
            let Some(shape) = collider_shape(store, watched) else {
                continue;
            };
            let hit = self.active_colliders.iter().copied().find(|&other| {
                other != watched
                    && can_collide(store, watched, other)
                    && collider_shape(store, other).is_some_and(|o| overlap_colliders(&shape, &o))
            });
            if let Some(other) = hit {
                tracing::trace!("[SpatialSystem] collision: {} <-> {}", watched, other);
                out.push(CollisionPair { a: watched, b: other });
                found += 1;
            }
        }
        found
    }

    /// Every overlapping compatible pair `(a, b)` with `a` before `b`.
    pub fn detect_all_collisions(&mut self, store: &EntityStore, out: &mut Vec<CollisionPair>) -> usize {
        self.refresh_active_colliders(store);

        let mut found = 0;
        for (i, &a) in self.active_colliders.iter().enumerate() {
            let Some(shape_a) = collider_shape(store, a) else {
                continue;
            };
            for &b in &self.active_colliders[i + 1..] {
                if !can_collide(store, a, b) {
                    continue;
                }
                if collider_shape(store, b).is_some_and(|shape_b| overlap_colliders(&shape_a, &shape_b)) {
                    out.push(CollisionPair { a, b });
                    found += 1;
                }
            }
        }
        found
    }

    /// Resolve now, react later.
    ///
    /// Pushes each watched colliding pair apart by half the penetration depth
    /// each and appends one collision [`SystemEvent`] per pair to `out`.
    ///
    /// # Returns
    ///
    /// Number of pairs resolved.
    pub fn resolve_overlaps_and_gen_events(
        &mut self,
        store: &mut EntityStore,
        out: &mut Vec<SystemEvent>,
    ) -> usize {
        let mut pairs = Vec::new();
        self.detect_watched_collisions(store, &mut pairs);

        let mut resolved = 0;
        for pair in pairs {
            let Some(result) = test_entity_collision(store, pair.a, pair.b) else {
                continue;
            };

            if let (Some(pos_a), Some(pos_b)) =
                (store.try_get_position(pair.a), store.try_get_position(pair.b))
            {
                let push = result.normal * (result.depth * 0.5);
                store.set_position(pair.a, pos_a - push);
                store.set_position(pair.b, pos_b + push);
                tracing::trace!(
                    "[SpatialSystem] depenetrated {} <-> {} (depth {:.2})",
                    pair.a,
                    pair.b,
                    result.depth
                );
            }

            if self.collision_event_tag.is_valid() {
                out.push(SystemEvent::new(
                    self.collision_event_tag.clone(),
                    pair.a,
                    pair.b,
                    result.contact,
                ));
            }
            resolved += 1;
        }

        if resolved > 0 {
            self.active_dirty = true;
        }
        resolved
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Colliders overlapping a sphere whose layer intersects `layer_mask`.
    /// Stops after [`MAX_OVERLAP_RESULTS`].
    pub fn overlap_sphere(
        &mut self,
        store: &EntityStore,
        center: Vec3,
        radius: f32,
        layer_mask: u8,
        exclude: EntityId,
        out: &mut Vec<EntityId>,
    ) -> usize {
        self.refresh_active_colliders(store);

        let mut found = 0;
        for &entity in &self.active_colliders {
            if entity == exclude || !passes_layer_filter(store, entity, layer_mask) {
                continue;
            }
            let Some(shape) = collider_shape(store, entity) else {
                continue;
            };
            let overlaps = match shape.kind {
                ColliderType::Sphere => overlap_sphere_sphere(center, radius, shape.position, shape.radius),
                ColliderType::Capsule => {
                    let (top, bottom) = shape.capsule_endpoints();
                    overlap_sphere_capsule(center, radius, top, bottom, shape.radius)
                }
                ColliderType::None => false,
            };
            if overlaps {
                out.push(entity);
                found += 1;
                if found >= MAX_OVERLAP_RESULTS {
                    break;
                }
            }
        }
        found
    }

    /// Closest collider hit by a ray within `max_distance`.
    pub fn raycast(
        &mut self,
        store: &EntityStore,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        layer_mask: u8,
        exclude: EntityId,
    ) -> Option<RaycastResult> {
        self.refresh_active_colliders(store);

        let mut best: Option<RaycastResult> = None;
        for &entity in &self.active_colliders {
            if entity == exclude || !passes_layer_filter(store, entity, layer_mask) {
                continue;
            }
            let Some(shape) = collider_shape(store, entity) else {
                continue;
            };
            let limit = best.map_or(max_distance, |b| b.distance);
            let hit = match shape.kind {
                ColliderType::Sphere => raycast_sphere(origin, direction, limit, shape.position, shape.radius),
                ColliderType::Capsule => {
                    let (top, bottom) = shape.capsule_endpoints();
                    raycast_capsule(origin, direction, limit, top, bottom, shape.radius)
                }
                ColliderType::None => None,
            };
            if let Some(hit) = hit {
                if hit.distance < limit || best.is_none() {
                    best = Some(RaycastResult {
                        hit_entity: entity,
                        point: hit.point,
                        normal: hit.normal,
                        distance: hit.distance,
                    });
                }
            }
        }
        best
    }

    /// Earliest collider touched by a sphere moving `start..end`.
    pub fn sweep_sphere(
        &mut self,
        store: &EntityStore,
        start: Vec3,
        end: Vec3,
        radius: f32,
        layer_mask: u8,
        exclude: EntityId,
    ) -> Option<SweepResult> {
        self.refresh_active_colliders(store);

        let travel = (end - start).length();
        let mut best: Option<SweepResult> = None;
        for &entity in &self.active_colliders {
            if entity == exclude || !passes_layer_filter(store, entity, layer_mask) {
                continue;
            }
            let Some(shape) = collider_shape(store, entity) else {
                continue;
            };
            let hit = match shape.kind {
                ColliderType::Sphere => sweep_sphere_sphere(start, end, radius, shape.position, shape.radius),
                ColliderType::Capsule => {
                    let (top, bottom) = shape.capsule_endpoints();
                    sweep_sphere_capsule(start, end, radius, top, bottom, shape.radius)
                }
                ColliderType::None => None,
            };
            if let Some(hit) = hit {
                if hit.time < best.map_or(1.0, |b| b.hit_time) || (best.is_none() && hit.time <= 1.0) {
                    best = Some(SweepResult {
                        hit_entity: entity,
                        contact: hit.contact,
                        normal: hit.normal,
                        hit_time: hit.time,
                        distance: travel * hit.time,
                    });
                }
            }
        }
        best
    }

    // =========================================================================
    // Collider cache & debug
    // =========================================================================

    /// Number of entities with a collider.
    pub fn active_collider_count(&mut self, store: &EntityStore) -> usize {
        self.refresh_active_colliders(store);
        self.active_colliders.len()
    }

    /// Marks the collider cache stale (collider properties changed).
    pub fn mark_colliders_dirty(&mut self) {
        self.active_dirty = true;
    }

    /// One-line status for logs.
    pub fn debug_summary(&mut self, store: &EntityStore) -> String {
        self.refresh_active_colliders(store);
        format!(
            "[SpatialSystem] Active={}, Watched={}, Cells={}",
            self.active_colliders.len(),
            self.watched.len(),
            self.cell_to_entities.len()
        )
    }

    fn refresh_active_colliders(&mut self, store: &EntityStore) {
        if !self.active_dirty {
            return;
        }
        self.active_colliders.clear();
        self.active_colliders
            .extend(store.iter_entities().filter(|&e| collider_type(store, e) != ColliderType::None));
        self.active_dirty = false;
    }
}

impl Default for SpatialSystem {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

// ============================================================================
// Collider property helpers
// ============================================================================

/// Collider shape stored on an entity.
#[must_use]
pub fn collider_type(store: &EntityStore, entity: EntityId) -> ColliderType {
    ColliderType::from_raw(store.get_property(entity, prop::COLLIDER_TYPE))
}

/// Collision layer bits (low byte of the property).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn collision_layer(store: &EntityStore, entity: EntityId) -> u8 {
    store.get_property(entity, prop::COLLISION_LAYER) as u8
}

/// Collision mask bits (low byte of the property).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn collision_mask(store: &EntityStore, entity: EntityId) -> u8 {
    store.get_property(entity, prop::COLLISION_MASK) as u8
}

/// Valid entity with a collider.
#[must_use]
pub fn is_valid_collider(store: &EntityStore, entity: EntityId) -> bool {
    store.is_valid(entity) && collider_type(store, entity) != ColliderType::None
}

/// Symmetric layer/mask test: each side's layer must be in the other's mask.
#[must_use]
pub fn can_collide(store: &EntityStore, a: EntityId, b: EntityId) -> bool {
    (collision_layer(store, a) & collision_mask(store, b)) != 0
        && (collision_layer(store, b) & collision_mask(store, a)) != 0
}

fn passes_layer_filter(store: &EntityStore, entity: EntityId, layer_mask: u8) -> bool {
    (collision_layer(store, entity) & layer_mask) != 0
}

/// Placed collider of a valid entity.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn collider_shape(store: &EntityStore, entity: EntityId) -> Option<ColliderShape> {
    if !is_valid_collider(store, entity) {
        return None;
    }
    let kind = collider_type(store, entity);
    let half_height = if kind == ColliderType::Capsule {
        store.get_property(entity, prop::COLLIDER_HALF_HEIGHT) as f32
    } else {
        0.0
    };
    Some(ColliderShape {
        kind,
        position: store.try_get_position(entity)?,
        radius: store.get_property(entity, prop::COLLIDER_RADIUS) as f32,
        half_height,
    })
}

/// Boolean overlap of two entities' colliders (layer filter applied).
#[must_use]
pub fn test_entity_overlap(store: &EntityStore, a: EntityId, b: EntityId) -> bool {
    if !can_collide(store, a, b) {
        return false;
    }
    match (collider_shape(store, a), collider_shape(store, b)) {
        (Some(sa), Some(sb)) => overlap_colliders(&sa, &sb),
        _ => false,
    }
}

/// Contact between two entities' colliders (layer filter applied).
#[must_use]
pub fn test_entity_collision(store: &EntityStore, a: EntityId, b: EntityId) -> Option<CollisionResult> {
    if !can_collide(store, a, b) {
        return None;
    }
    let contact = test_colliders(&collider_shape(store, a)?, &collider_shape(store, b)?)?;
    Some(CollisionResult {
        a,
        b,
        contact: contact.point,
        normal: contact.normal,
        depth: contact.depth,
    })
}

/// Human-readable collider description.
#[must_use]
pub fn collider_debug_string(store: &EntityStore, entity: EntityId) -> String {
    let Some(shape) = collider_shape(store, entity) else {
        return format!("Entity {entity}: Invalid/NoCollider");
    };
    let (layer, mask) = (collision_layer(store, entity), collision_mask(store, entity));
    let p = shape.position;
    match shape.kind {
        ColliderType::Capsule => format!(
            "Entity {entity}: Capsule(HH={:.1},R={:.1}) @ ({:.0},{:.0},{:.0}) L=0x{layer:02X} M=0x{mask:02X}",
            shape.half_height, shape.radius, p.x, p.y, p.z
        ),
        _ => format!(
            "Entity {entity}: Sphere(R={:.1}) @ ({:.0},{:.0},{:.0}) L=0x{layer:02X} M=0x{mask:02X}",
            shape.radius, p.x, p.y, p.z
        ),
    }
}

/// Hemisphere centres of an entity's capsule (degenerate for spheres).
#[must_use]
pub fn entity_capsule_endpoints(store: &EntityStore, entity: EntityId) -> Option<(Vec3, Vec3)> {
    collider_shape(store, entity).map(|s| capsule_endpoints(s.position, s.half_height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_shared::layer;

    fn spawn_sphere(store: &mut EntityStore, spatial: &mut SpatialSystem, pos: Vec3, radius: i32) -> EntityId {
        let e = store.allocate();
        spatial.on_entity_allocated(e);
        store.set_position(e, pos);
        store.set_property(e, prop::COLLIDER_TYPE, ColliderType::Sphere as i32);
        store.set_property(e, prop::COLLIDER_RADIUS, radius);
        store.set_property(e, prop::COLLISION_LAYER, i32::from(layer::DEFAULT));
        store.set_property(e, prop::COLLISION_MASK, i32::from(layer::ALL));
        e
    }

    #[test]
    fn test_cell_transition_exactness() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::new(5000.0);
        let e = store.allocate();
        spatial.on_entity_allocated(e);

        store.set_position(e, Vec3::new(2000.0, 2000.0, 0.0));
        spatial.update_entity_positions(&store);
        let first = spatial.consume_cell_change_events();
        assert_eq!(first.len(), 1);
        assert!(first[0].is_enter());

        store.set_position(e, Vec3::new(5200.0, 2000.0, 0.0));
        spatial.update_entity_positions(&store);
        assert_eq!(
            spatial.consume_cell_change_events(),
            vec![CellChangeEvent { entity: e, old_cell: CellCoord::new(0, 0), new_cell: CellCoord::new(1, 0) }]
        );

        store.set_position(e, Vec3::new(5300.0, 2000.0, 0.0));
        spatial.update_entity_positions(&store);
        assert!(spatial.consume_cell_change_events().is_empty());
        assert_eq!(spatial.get_entity_cell(e), CellCoord::new(1, 0));
    }

    #[test]
    fn test_free_emits_exit_and_unwatches() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::default();
        let e = spawn_sphere(&mut store, &mut spatial, Vec3::ZERO, 10);
        spatial.update_entity_positions(&store);
        spatial.consume_cell_change_events();
        spatial.add_watched_entity(e);

        spatial.on_entity_freed(e);
        store.free(e);
        let events = spatial.consume_cell_change_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_exit());
        assert!(!spatial.is_watched(e));
        assert!(spatial.get_entities_in_cell(CellCoord::new(0, 0)).is_none());
    }

    #[test]
    fn test_set_cell_size_rebuilds_silently() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::new(5000.0);
        let e = spawn_sphere(&mut store, &mut spatial, Vec3::new(1500.0, 0.0, 0.0), 10);
        spatial.update_entity_positions(&store);
        spatial.consume_cell_change_events();

        spatial.set_cell_size(&store, 1000.0);
        assert_eq!(spatial.get_entity_cell(e), CellCoord::new(1, 0));
        assert!(spatial.consume_cell_change_events().is_empty());

        spatial.set_cell_size(&store, -5.0);
        assert!((spatial.cell_size() - 1000.0).abs() < f32::EPSILON);

        let mut found = BTreeSet::new();
        spatial.get_entities_in_cells(&[CellCoord::new(1, 0), CellCoord::new(9, 9)], &mut found);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![e]);
    }

    #[test]
    fn test_depenetration_symmetry() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::default();
        let a = spawn_sphere(&mut store, &mut spatial, Vec3::ZERO, 50);
        let b = spawn_sphere(&mut store, &mut spatial, Vec3::new(80.0, 0.0, 0.0), 50);
        spatial.add_watched_entity(a);

        let mut events = Vec::new();
        assert_eq!(spatial.resolve_overlaps_and_gen_events(&mut store, &mut events), 1);

        assert_eq!(store.try_get_position(a), Some(Vec3::new(-10.0, 0.0, 0.0)));
        assert_eq!(store.try_get_position(b), Some(Vec3::new(90.0, 0.0, 0.0)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, a);
        assert_eq!(events[0].target, b);
        assert_eq!(events[0].tag, Tag::new(DEFAULT_COLLISION_EVENT_TAG));
    }

    #[test]
    fn test_layer_filtering_is_symmetric() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::default();
        let a = spawn_sphere(&mut store, &mut spatial, Vec3::ZERO, 50);
        let b = spawn_sphere(&mut store, &mut spatial, Vec3::new(10.0, 0.0, 0.0), 50);
        store.set_property(a, prop::COLLISION_LAYER, i32::from(layer::PLAYER));
        store.set_property(a, prop::COLLISION_MASK, i32::from(layer::ENEMY));
        store.set_property(b, prop::COLLISION_LAYER, i32::from(layer::ENEMY));
        store.set_property(b, prop::COLLISION_MASK, i32::from(layer::ENVIRONMENT));
        spatial.add_watched_entity(a);
        spatial.add_watched_entity(b);

        let mut pairs = Vec::new();
        assert_eq!(spatial.detect_watched_collisions(&store, &mut pairs), 0);
        assert_eq!(spatial.detect_all_collisions(&store, &mut pairs), 0);
        assert!(!test_entity_overlap(&store, a, b));

        let mut hits = Vec::new();
        spatial.overlap_sphere(&store, Vec3::ZERO, 1.0, layer::ENEMY, a, &mut hits);
        assert_eq!(hits, vec![b]);
        hits.clear();
        spatial.overlap_sphere(&store, Vec3::ZERO, 1.0, layer::TRIGGER, EntityId::INVALID, &mut hits);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_watched_detection_takes_first_match() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::default();
        let w = spawn_sphere(&mut store, &mut spatial, Vec3::new(100.0, 0.0, 0.0), 30);
        let far_but_first = spawn_sphere(&mut store, &mut spatial, Vec3::new(150.0, 0.0, 0.0), 30);
        let _near = spawn_sphere(&mut store, &mut spatial, Vec3::new(101.0, 0.0, 0.0), 30);
        spatial.add_watched_entity(w);

        let mut pairs = Vec::new();
        spatial.detect_watched_collisions(&store, &mut pairs);
        assert_eq!(pairs, vec![CollisionPair { a: w, b: far_but_first }]);

        pairs.clear();
        assert_eq!(spatial.detect_all_collisions(&store, &mut pairs), 3);
    }

    #[test]
    fn test_raycast_and_sweep_pick_nearest() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::default();
        let far = spawn_sphere(&mut store, &mut spatial, Vec3::new(500.0, 0.0, 0.0), 10);
        let near = spawn_sphere(&mut store, &mut spatial, Vec3::new(200.0, 0.0, 0.0), 10);

        let ray = spatial
            .raycast(&store, Vec3::ZERO, Vec3::X, 1000.0, layer::ALL, EntityId::INVALID)
            .unwrap();
        assert_eq!(ray.hit_entity, near);
        assert!((ray.distance - 190.0).abs() < 1e-3);

        let excluded = spatial
            .raycast(&store, Vec3::ZERO, Vec3::X, 1000.0, layer::ALL, near)
            .unwrap();
        assert_eq!(excluded.hit_entity, far);

        let sweep = spatial
            .sweep_sphere(&store, Vec3::ZERO, Vec3::new(1000.0, 0.0, 0.0), 10.0, layer::ALL, EntityId::INVALID)
            .unwrap();
        assert_eq!(sweep.hit_entity, near);
        assert!((sweep.distance - 180.0).abs() < 1e-2);
    }

    #[test]
    fn test_overlap_results_capped() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::default();
        for _ in 0..80 {
            spawn_sphere(&mut store, &mut spatial, Vec3::ZERO, 5);
        }
        let mut hits = Vec::new();
        let n = spatial.overlap_sphere(&store, Vec3::ZERO, 1.0, layer::ALL, EntityId::INVALID, &mut hits);
        assert_eq!(n, MAX_OVERLAP_RESULTS);
        assert_eq!(spatial.active_collider_count(&store), 80);
        assert!(spatial.debug_summary(&store).starts_with("[SpatialSystem] Active=80"));
    }
}
