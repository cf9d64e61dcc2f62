//! # Master Stash
//!
//! The seam between the VM and authoritative state. The VM never touches
//! the spatial system directly: lifecycle edges and collision watches go
//! through this trait so the cell index stays consistent.

use kinetic_shared::EntityId;

use crate::spatial::SpatialSystem;
use crate::store::EntityStore;

/// Authoritative state as seen by the VM.
pub trait MasterStash {
    /// Read access to the store.
    fn store(&self) -> &EntityStore;

    /// Write access to the store.
    fn store_mut(&mut self) -> &mut EntityStore;

    /// Allocates an entity (`INVALID` when full).
    fn allocate_entity(&mut self) -> EntityId;

    /// Frees an entity.
    fn free_entity(&mut self, entity: EntityId);

    /// Starts watched collision detection for an entity.
    fn watch_collision(&mut self, entity: EntityId);

    /// Stops watched collision detection for an entity.
    fn unwatch_collision(&mut self, entity: EntityId);
}

/// A bare store has no spatial index, so watches are no-ops.
impl MasterStash for EntityStore {
    fn store(&self) -> &EntityStore {
        self
    }

    fn store_mut(&mut self) -> &mut EntityStore {
        self
    }

    fn allocate_entity(&mut self) -> EntityId {
        self.allocate()
    }

    fn free_entity(&mut self, entity: EntityId) {
        self.free(entity);
    }

    fn watch_collision(&mut self, _entity: EntityId) {}

    fn unwatch_collision(&mut self, _entity: EntityId) {}
}

/// Store plus spatial index, borrowed for one tick.
pub struct WorldStash<'a> {
    /// Entity store.
    pub store: &'a mut EntityStore,
    /// Spatial index kept in step with lifecycle edges.
    pub spatial: &'a mut SpatialSystem,
}

impl<'a> WorldStash<'a> {
    /// Borrows both halves.
    pub fn new(store: &'a mut EntityStore, spatial: &'a mut SpatialSystem) -> Self {
        Self { store, spatial }
    }
}

impl MasterStash for WorldStash<'_> {
    fn store(&self) -> &EntityStore {
        self.store
    }

    fn store_mut(&mut self) -> &mut EntityStore {
        self.store
    }

    fn allocate_entity(&mut self) -> EntityId {
        let entity = self.store.allocate();
        if !entity.is_invalid() {
            self.spatial.on_entity_allocated(entity);
        }
        entity
    }

    fn free_entity(&mut self, entity: EntityId) {
        if !self.store.is_valid(entity) {
            return;
        }
        self.spatial.on_entity_freed(entity);
        self.store.free(entity);
    }

    fn watch_collision(&mut self, entity: EntityId) {
        self.spatial.add_watched_entity(entity);
    }

    fn unwatch_collision(&mut self, entity: EntityId) {
        self.spatial.remove_watched_entity(entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_shared::{CellCoord, Vec3};

    #[test]
    fn test_world_stash_keeps_spatial_in_step() {
        let mut store = EntityStore::new();
        let mut spatial = SpatialSystem::new(1000.0);
        let e = {
            let mut stash = WorldStash::new(&mut store, &mut spatial);
            let e = stash.allocate_entity();
            stash.store_mut().set_position(e, Vec3::new(10.0, 10.0, 0.0));
            stash.watch_collision(e);
            e
        };
        spatial.update_entity_positions(&store);
        assert_eq!(spatial.get_entity_cell(e), CellCoord::new(0, 0));
        assert!(spatial.is_watched(e));
        spatial.consume_cell_change_events();

        WorldStash::new(&mut store, &mut spatial).free_entity(e);
        assert!(!store.is_valid(e));
        assert!(!spatial.is_watched(e));
        assert_eq!(spatial.consume_cell_change_events().len(), 1);
    }

    #[test]
    fn test_plain_store_stash() {
        let mut store = EntityStore::new();
        let e = MasterStash::allocate_entity(&mut store);
        store.watch_collision(e);
        assert!(MasterStash::store(&store).is_valid(e));
        store.free_entity(e);
        assert!(!store.is_valid(e));
    }
}
