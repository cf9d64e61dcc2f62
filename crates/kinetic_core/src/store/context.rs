//! # Local Context
//!
//! Per-VM view of the store. Reads fall through to the store unless the VM
//! already wrote that slot; writes are buffered until [`LocalContext::commit_changes`].

use std::collections::HashMap;

use kinetic_shared::{EntityId, PropertyId};

use super::{EntityStore, PendingWrite};

/// Buffered read/write view bound to a source and target entity.
#[derive(Debug, Default)]
pub struct LocalContext {
    source: EntityId,
    target: EntityId,
    /// `(entity << 16 | property)` -> index into `pending`.
    cache: HashMap<u64, usize>,
    /// Writes in first-write order; later writes overwrite in place.
    pending: Vec<PendingWrite>,
}

#[inline]
#[allow(clippy::cast_sign_loss)]
fn cache_key(entity: EntityId, property: PropertyId) -> u64 {
    (u64::from(entity.raw() as u32) << 16) | u64::from(property)
}

impl LocalContext {
    /// Creates an unbound context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            source: EntityId::INVALID,
            target: EntityId::INVALID,
            cache: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Binds to a source/target pair and drops anything buffered.
    pub fn bind(&mut self, source: EntityId, target: EntityId) {
        self.source = source;
        self.target = target;
        self.rollback();
    }

    /// Entity addressed by [`Self::read`] and [`Self::write`].
    #[inline]
    #[must_use]
    pub const fn source(&self) -> EntityId {
        self.source
    }

    /// Target entity of the triggering event.
    #[inline]
    #[must_use]
    pub const fn target(&self) -> EntityId {
        self.target
    }

    /// Reads a property of the source entity.
    #[must_use]
    pub fn read(&self, store: &EntityStore, property: PropertyId) -> i32 {
        self.read_entity(store, self.source, property)
    }

    /// Reads any entity, seeing this context's own buffered writes first.
    #[must_use]
    pub fn read_entity(&self, store: &EntityStore, entity: EntityId, property: PropertyId) -> i32 {
        match self.cache.get(&cache_key(entity, property)) {
            Some(&slot) => self.pending[slot].value,
            None => store.get_property(entity, property),
        }
    }

    /// Buffers a write to the source entity.
    pub fn write(&mut self, property: PropertyId, value: i32) {
        self.write_entity(self.source, property, value);
    }

    /// Buffers a write to any entity.
    pub fn write_entity(&mut self, entity: EntityId, property: PropertyId, value: i32) {
        let key = cache_key(entity, property);
        if let Some(&slot) = self.cache.get(&key) {
            self.pending[slot].value = value;
            return;
        }
        self.cache.insert(key, self.pending.len());
        self.pending.push(PendingWrite {
            entity,
            property,
            value,
        });
    }

    /// Applies buffered writes to the store and clears the buffer.
    ///
    /// # Returns
    ///
    /// Number of writes handed to the store.
    pub fn commit_changes(&mut self, store: &mut EntityStore) -> usize {
        let applied = self.pending.len();
        store.apply_writes(&self.pending);
        self.rollback();
        applied
    }

    /// Discards buffered writes.
    pub fn rollback(&mut self) {
        self.cache.clear();
        self.pending.clear();
    }

    /// Discards buffered writes and unbinds.
    pub fn reset(&mut self) {
        self.source = EntityId::INVALID;
        self.target = EntityId::INVALID;
        self.rollback();
    }

    /// Buffered writes in application order.
    #[must_use]
    pub fn pending_writes(&self) -> &[PendingWrite] {
        &self.pending
    }

    /// True if anything is buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drops buffered writes aimed at `entity` (it was destroyed).
    pub fn forget_entity(&mut self, entity: EntityId) {
        if !self.pending.iter().any(|w| w.entity == entity) {
            return;
        }
        self.pending.retain(|w| w.entity != entity);
        self.cache = self
            .pending
            .iter()
            .enumerate()
            .map(|(slot, w)| (cache_key(w.entity, w.property), slot))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_shared::prop;

    #[test]
    fn test_writes_invisible_until_commit() {
        let mut store = EntityStore::new();
        let e = store.allocate();
        store.set_property(e, prop::HEALTH, 100);

        let mut ctx = LocalContext::new();
        ctx.bind(e, EntityId::INVALID);
        ctx.write(prop::HEALTH, 40);

        assert_eq!(ctx.read(&store, prop::HEALTH), 40);
        assert_eq!(store.get_property(e, prop::HEALTH), 100);

        assert_eq!(ctx.commit_changes(&mut store), 1);
        assert_eq!(store.get_property(e, prop::HEALTH), 40);
        assert!(!ctx.has_pending());
    }

    #[test]
    fn test_rollback_discards() {
        let mut store = EntityStore::new();
        let e = store.allocate();
        let mut ctx = LocalContext::new();
        ctx.bind(e, EntityId::INVALID);
        ctx.write(prop::MANA, 9);
        ctx.rollback();
        assert_eq!(ctx.commit_changes(&mut store), 0);
        assert_eq!(store.get_property(e, prop::MANA), 0);
    }

    #[test]
    fn test_repeated_write_keeps_single_entry() {
        let mut ctx = LocalContext::new();
        let e = EntityId::new(3);
        ctx.write_entity(e, prop::POS_X, 1);
        ctx.write_entity(EntityId::new(4), prop::POS_X, 2);
        ctx.write_entity(e, prop::POS_X, 3);
        assert_eq!(
            ctx.pending_writes(),
            &[
                PendingWrite { entity: e, property: prop::POS_X, value: 3 },
                PendingWrite { entity: EntityId::new(4), property: prop::POS_X, value: 2 },
            ]
        );
    }

    #[test]
    fn test_commit_to_freed_entity_is_dropped() {
        let mut store = EntityStore::new();
        let a = store.allocate();
        let b = store.allocate();
        let mut ctx = LocalContext::new();
        ctx.bind(a, b);
        ctx.write_entity(b, prop::HEALTH, 1);
        store.free(b);
        ctx.commit_changes(&mut store);
        assert_eq!(store.get_property(b, prop::HEALTH), 0);
    }

    #[test]
    fn test_forget_entity_and_reset() {
        let mut ctx = LocalContext::new();
        ctx.bind(EntityId::new(1), EntityId::new(2));
        ctx.write_entity(EntityId::new(2), prop::HEALTH, 5);
        ctx.write(prop::HEALTH, 6);
        ctx.forget_entity(EntityId::new(2));
        assert_eq!(ctx.pending_writes().len(), 1);

        let store = EntityStore::new();
        assert_eq!(ctx.read(&store, prop::HEALTH), 6);

        ctx.reset();
        assert_eq!(ctx.source(), EntityId::INVALID);
        assert_eq!(ctx.target(), EntityId::INVALID);
        assert!(!ctx.has_pending());
    }
}
