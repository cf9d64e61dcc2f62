//! # Full-State Serialization
//!
//! Little-endian byte image of the whole store.
//!
//! ```text
//! [magic u32][version u32][frame i32][next_id i32][count i32]
//! count x {
//!     [id i32][properties 128 x i32]
//!     [tag_count u32] tag_count x { [len u32][utf8 bytes] }
//! }
//! ```
//!
//! Tag names are written whole, whatever their length.
//!
//! Restoring decodes into a staging buffer first. The live store is only
//! touched after the whole blob validated.

use std::collections::BTreeSet;

use kinetic_shared::{EntityId, Tag, TagContainer, MAX_ENTITIES, MAX_PROPERTIES};

use super::EntityStore;
use crate::error::{StoreError, StoreResult};

/// Magic number for state blobs ("KNTS").
pub const STATE_MAGIC: u32 = u32::from_le_bytes(*b"KNTS");

/// Current state format version.
pub const STATE_VERSION: u32 = 2;

/// Decoded entity waiting to be swapped in.
struct StagedEntity {
    id: i32,
    properties: Vec<i32>,
    tags: TagContainer,
}

impl EntityStore {
    /// Serializes the complete state (frame, id counter, every valid entity).
    #[must_use]
    pub fn serialize_full_state(&self) -> Vec<u8> {
        let count = self.entity_count;
        let mut out = Vec::with_capacity(20 + count * (8 + MAX_PROPERTIES * 4));

        out.extend_from_slice(&STATE_MAGIC.to_le_bytes());
        out.extend_from_slice(&STATE_VERSION.to_le_bytes());
        out.extend_from_slice(&self.completed_frame.to_le_bytes());
        out.extend_from_slice(&self.next_id.to_le_bytes());
        out.extend_from_slice(&i32::try_from(count).unwrap_or(i32::MAX).to_le_bytes());

        for entity in self.iter_entities() {
            let Some(index) = entity.index() else {
                continue;
            };
            out.extend_from_slice(&entity.raw().to_le_bytes());
            for column in 0..MAX_PROPERTIES {
                out.extend_from_slice(&self.properties[column * MAX_ENTITIES + index].to_le_bytes());
            }

            let tags = &self.tags[index];
            write_len(&mut out, tags.len());
            for tag in tags {
                let bytes = tag.name().as_bytes();
                write_len(&mut out, bytes.len());
                out.extend_from_slice(bytes);
            }
        }

        tracing::debug!(
            "[EntityStore] serialized {} entities ({} bytes)",
            count,
            out.len()
        );
        out
    }

    /// Replaces the whole store with a serialized state.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] for truncated, corrupt or foreign input. On
    /// error the store is left exactly as it was.
    pub fn deserialize_full_state(&mut self, bytes: &[u8]) -> StoreResult<()> {
        let mut reader = ByteReader::new(bytes);

        let magic = reader.read_u32()?;
        if magic != STATE_MAGIC {
            return Err(StoreError::BadMagic(magic));
        }
        let version = reader.read_u32()?;
        if version != STATE_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }

        let frame = reader.read_i32()?;
        let next_id = reader.read_i32()?;
        let capacity = i32::try_from(MAX_ENTITIES).unwrap_or(i32::MAX);
        if !(0..=capacity).contains(&next_id) {
            return Err(StoreError::NextIdOutOfRange(next_id));
        }
        let count = reader.read_i32()?;
        if count < 0 || count > next_id {
            return Err(StoreError::CountMismatch { count, next_id });
        }

        let mut staged = Vec::with_capacity(usize::try_from(count).unwrap_or(0));
        let mut seen = BTreeSet::new();
        for _ in 0..count {
            let id = reader.read_i32()?;
            if id < 0 || id >= next_id {
                return Err(StoreError::EntityOutOfRange(id));
            }
            if !seen.insert(id) {
                return Err(StoreError::DuplicateEntity(id));
            }

            let mut properties = Vec::with_capacity(MAX_PROPERTIES);
            for _ in 0..MAX_PROPERTIES {
                properties.push(reader.read_i32()?);
            }

            let tag_count = reader.read_u32()?;
            let mut tags = TagContainer::new();
            for _ in 0..tag_count {
                let len = usize::try_from(reader.read_u32()?).map_err(|_| StoreError::InvalidTag(id))?;
                let raw = reader.read_bytes(len)?;
                let name = std::str::from_utf8(raw).map_err(|_| StoreError::InvalidTag(id))?;
                tags.add(Tag::new(name));
            }

            staged.push(StagedEntity { id, properties, tags });
        }

        if reader.remaining() != 0 {
            return Err(StoreError::TrailingBytes(reader.remaining()));
        }

        self.install(frame, next_id, staged);
        tracing::info!(
            "[EntityStore] restored {} entities at frame {}",
            count,
            frame
        );
        Ok(())
    }

    fn install(&mut self, frame: i32, next_id: i32, staged: Vec<StagedEntity>) {
        self.properties.fill(0);
        self.valid.fill(false);
        self.creation_frames.fill(0);
        for tags in self.tags.iter_mut() {
            tags.clear();
        }

        self.entity_count = staged.len();
        for entity in staged {
            let Some(index) = EntityId::new(entity.id).index() else {
                continue;
            };
            for (column, value) in entity.properties.into_iter().enumerate() {
                self.properties[column * MAX_ENTITIES + index] = value;
            }
            self.tags[index] = entity.tags;
            self.valid[index] = true;
        }

        self.next_id = next_id;
        self.completed_frame = frame;
        let valid = &self.valid;
        self.free_ids = (0..next_id)
            .filter(|&id| EntityId::new(id).index().is_some_and(|index| !valid[index]))
            .collect();
    }
}

/// Writes a `u32` length prefix.
fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&u32::try_from(len).unwrap_or(u32::MAX).to_le_bytes());
}

/// Bounds-checked little-endian cursor.
struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    const fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn read_bytes(&mut self, needed: usize) -> StoreResult<&'a [u8]> {
        if self.remaining() < needed {
            return Err(StoreError::Truncated {
                offset: self.offset,
                needed,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> StoreResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u32(&mut self) -> StoreResult<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    fn read_i32(&mut self) -> StoreResult<i32> {
        self.read_array().map(i32::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinetic_shared::prop;

    fn populated() -> EntityStore {
        let mut store = EntityStore::new();
        let ids: Vec<_> = (0..5).map(|_| store.allocate()).collect();
        for (i, &e) in ids.iter().enumerate() {
            store.set_property(e, prop::HEALTH, 100 + i32::try_from(i).unwrap());
            store.set_property(e, prop::POS_X, -50 * i32::try_from(i).unwrap());
        }
        store.add_tag(ids[0], Tag::new("Team.Blue"));
        store.add_tag(ids[0], Tag::new("Status.Shielded"));
        store.free(ids[2]);
        store.mark_frame_completed(77);
        store
    }

    #[test]
    fn test_restore_reproduces_checksum_and_allocation() {
        let mut original = populated();
        let blob = original.serialize_full_state();

        let mut restored = EntityStore::new();
        restored.allocate();
        restored.deserialize_full_state(&blob).unwrap();

        assert_eq!(restored.calculate_checksum(), original.calculate_checksum());
        assert_eq!(restored.entity_count(), 4);
        assert_eq!(restored.completed_frame(), 77);
        assert_eq!(restored.tags(EntityId::new(0)).len(), 2);
        assert_eq!(restored.allocate(), original.allocate());
        assert_eq!(restored.allocate(), original.allocate());
    }

    #[test]
    fn test_bad_magic_leaves_store_untouched() {
        let mut store = populated();
        let before = store.calculate_checksum();
        let mut blob = store.serialize_full_state();
        blob[0] ^= 0xFF;
        assert!(matches!(store.deserialize_full_state(&blob), Err(StoreError::BadMagic(_))));
        assert_eq!(store.calculate_checksum(), before);
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut store = populated();
        let before = store.calculate_checksum();
        let blob = store.serialize_full_state();
        let err = store.deserialize_full_state(&blob[..blob.len() - 3]).unwrap_err();
        assert!(matches!(err, StoreError::Truncated { .. }));
        assert_eq!(store.calculate_checksum(), before);
        assert!(store.deserialize_full_state(&[]).is_err());
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut store = EntityStore::new();
        let mut blob = store.serialize_full_state();
        blob[4..8].copy_from_slice(&(STATE_VERSION + 1).to_le_bytes());
        assert_eq!(
            store.deserialize_full_state(&blob),
            Err(StoreError::UnsupportedVersion(STATE_VERSION + 1))
        );
    }

    #[test]
    fn test_unwritten_version_rejected() {
        let mut store = EntityStore::new();
        let mut blob = store.serialize_full_state();
        blob[4..8].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(store.deserialize_full_state(&blob), Err(StoreError::UnsupportedVersion(0)));
    }

    fn long_tag_roundtrip(name: &str) {
        let mut original = EntityStore::new();
        let e = original.allocate();
        original.add_tag(e, Tag::new(name));
        original.add_tag(e, Tag::new("Team.Red"));
        let blob = original.serialize_full_state();

        let mut restored = EntityStore::new();
        restored.deserialize_full_state(&blob).unwrap();
        assert!(restored.has_tag_exact(e, &Tag::new(name)));
        assert_eq!(restored.calculate_checksum(), original.calculate_checksum());
    }

    #[test]
    fn test_long_ascii_tag_survives_restore() {
        long_tag_roundtrip(&"a".repeat(70_000));
    }

    #[test]
    fn test_long_multibyte_tag_survives_restore() {
        let mut name = "a".repeat(usize::from(u16::MAX) - 1);
        name.push('é');
        long_tag_roundtrip(&name);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut store = populated();
        let mut blob = store.serialize_full_state();
        blob.push(0);
        assert_eq!(store.deserialize_full_state(&blob), Err(StoreError::TrailingBytes(1)));
    }

    #[test]
    fn test_empty_store_roundtrip() {
        let empty = EntityStore::new();
        let mut target = populated();
        target.deserialize_full_state(&empty.serialize_full_state()).unwrap();
        assert_eq!(target.entity_count(), 0);
        assert_eq!(target.next_id(), 0);
        assert_eq!(target.calculate_checksum(), empty.calculate_checksum());
    }
}
