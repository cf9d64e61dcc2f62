//! # Replica Apply
//!
//! A client keeps its own [`EntityStore`] and feeds it what the server
//! sends: entity snapshots and removals out of each `FrameBatch`. A
//! snapshot lands at the id it was taken from, so ids, the free list and
//! checksums line up with the server.

use kinetic_shared::{EntityId, EntitySnapshot, MAX_ENTITIES, MAX_PROPERTIES};

use super::EntityStore;

impl EntityStore {
    /// Installs a snapshot at its own id, overwriting every property and
    /// tag. Missing property values read as 0.
    ///
    /// # Returns
    ///
    /// `true` if the id was not live before. Invalid placeholders and
    /// out-of-range ids are ignored and return `false`.
    pub fn apply_snapshot(&mut self, snapshot: &EntitySnapshot) -> bool {
        let entity = snapshot.entity_id;
        let Some(index) = entity.index() else {
            return false;
        };
        let raw = entity.raw();

        if raw >= self.next_id {
            self.free_ids.extend(self.next_id..raw);
            self.next_id = raw + 1;
        } else {
            self.free_ids.remove(&raw);
        }

        let fresh = !self.valid[index];
        if fresh {
            self.valid[index] = true;
            self.creation_frames[index] = self.completed_frame;
            self.entity_count += 1;
        }

        for column in 0..MAX_PROPERTIES {
            self.properties[column * MAX_ENTITIES + index] =
                snapshot.properties.get(column).copied().unwrap_or(0);
        }
        self.tags[index] = snapshot.tags.clone();

        tracing::trace!(
            "[EntityStore] applied snapshot for {} ({} tags)",
            entity,
            snapshot.tags.len()
        );
        fresh
    }

    /// Applies snapshots in order and returns the ids that became live.
    pub fn apply_snapshots(&mut self, snapshots: &[EntitySnapshot]) -> Vec<EntityId> {
        let spawned: Vec<EntityId> = snapshots
            .iter()
            .filter(|s| self.apply_snapshot(s))
            .map(|s| s.entity_id)
            .collect();
        tracing::debug!(
            "[EntityStore] applied {} snapshots ({} new)",
            snapshots.len(),
            spawned.len()
        );
        spawned
    }

    /// Drops every entity and resets the id counter and frame.
    pub fn clear(&mut self) {
        self.properties.fill(0);
        self.valid.fill(false);
        self.creation_frames.fill(0);
        for tags in self.tags.iter_mut() {
            tags.clear();
        }
        self.free_ids.clear();
        self.next_id = 0;
        self.entity_count = 0;
        self.completed_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use kinetic_shared::{prop, Tag};

    use super::*;

    #[test]
    fn test_snapshot_lands_at_its_id() {
        let mut server = EntityStore::new();
        let ids: Vec<_> = (0..4).map(|_| server.allocate()).collect();
        server.set_property(ids[3], prop::HEALTH, 55);
        server.add_tag(ids[3], Tag::new("Team.Blue"));

        let mut replica = EntityStore::new();
        assert!(replica.apply_snapshot(&server.create_snapshot(ids[3])));

        assert!(replica.is_valid(ids[3]));
        assert_eq!(replica.entity_count(), 1);
        assert_eq!(replica.next_id(), 4);
        assert_eq!(replica.get_property(ids[3], prop::HEALTH), 55);
        assert!(replica.has_tag_exact(ids[3], &Tag::new("Team.Blue")));
        assert_eq!(
            replica.calculate_partial_checksum(&[ids[3]]),
            server.calculate_partial_checksum(&[ids[3]])
        );

        // Gaps below the highest id are handed out lowest-first.
        assert_eq!(replica.allocate(), EntityId::new(0));
        assert_eq!(replica.allocate(), EntityId::new(1));
        assert_eq!(replica.allocate(), EntityId::new(2));
        assert_eq!(replica.allocate(), EntityId::new(4));
    }

    #[test]
    fn test_reapply_overwrites_without_recounting() {
        let mut server = EntityStore::new();
        let e = server.allocate();
        server.set_property(e, prop::MANA, 10);
        server.add_tag(e, Tag::new("Status.Burning"));

        let mut replica = EntityStore::new();
        assert!(replica.apply_snapshot(&server.create_snapshot(e)));

        server.set_property(e, prop::MANA, 3);
        server.remove_tag(e, &Tag::new("Status.Burning"));
        assert!(!replica.apply_snapshot(&server.create_snapshot(e)));

        assert_eq!(replica.entity_count(), 1);
        assert_eq!(replica.get_property(e, prop::MANA), 3);
        assert!(replica.tags(e).is_empty());
    }

    #[test]
    fn test_freed_slot_is_reclaimed_by_snapshot() {
        let mut server = EntityStore::new();
        let a = server.allocate();
        let b = server.allocate();

        let mut replica = EntityStore::new();
        let spawned = replica.apply_snapshots(&server.create_snapshots(&[a, b]));
        assert_eq!(spawned, vec![a, b]);

        replica.free(a);
        assert!(replica.apply_snapshot(&server.create_snapshot(a)));
        assert_eq!(replica.entity_count(), 2);
        assert_eq!(replica.allocate(), EntityId::new(2));
    }

    #[test]
    fn test_invalid_snapshot_ignored() {
        let mut replica = EntityStore::new();
        assert!(!replica.apply_snapshot(&EntitySnapshot::invalid()));
        assert_eq!(replica.entity_count(), 0);
        assert_eq!(replica.next_id(), 0);
    }

    #[test]
    fn test_clear_matches_fresh_store() {
        let mut store = EntityStore::new();
        let e = store.allocate();
        store.set_property(e, prop::HEALTH, 9);
        store.add_tag(e, Tag::new("Team.Red"));
        store.mark_frame_completed(12);

        store.clear();
        assert_eq!(store.entity_count(), 0);
        assert_eq!(store.next_id(), 0);
        assert_eq!(store.calculate_checksum(), EntityStore::new().calculate_checksum());
        assert_eq!(store.allocate(), EntityId::new(0));
        assert_eq!(store.get_property(EntityId::new(0), prop::HEALTH), 0);
    }
}
