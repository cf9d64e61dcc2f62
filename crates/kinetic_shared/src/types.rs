//! # Core Identifiers
//!
//! Entity ids, well-known property slots and collision constants.
//!
//! Entities are plain indices into the store's fixed-capacity arrays.
//! There is no generation counter: a freed id is handed out again as-is.

use serde::{Deserialize, Serialize};

/// Maximum number of simultaneously valid entities.
pub const MAX_ENTITIES: usize = 1024;

/// Number of integer property slots per entity.
pub const MAX_PROPERTIES: usize = 128;

/// Index of a property slot (always `< MAX_PROPERTIES` when valid).
pub type PropertyId = u16;

/// Identifier of an entity in the store.
///
/// Non-negative values index the store arrays; `EntityId::INVALID` (-1)
/// means "no entity".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EntityId(pub i32);

impl EntityId {
    /// The "no entity" sentinel.
    pub const INVALID: Self = Self(-1);

    /// Creates an id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Returns the array index, or `None` if the id is negative or out of range.
    #[inline]
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        if self.0 >= 0 && (self.0 as usize) < MAX_ENTITIES {
            Some(self.0 as usize)
        } else {
            None
        }
    }

    /// True for the invalid sentinel.
    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl From<i32> for EntityId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known property slots.
///
/// Gaps are reserved. Positions are stored as integers (world units).
pub mod prop {
    use super::PropertyId;

    /// Position X.
    pub const POS_X: PropertyId = 0;
    /// Position Y.
    pub const POS_Y: PropertyId = 1;
    /// Position Z.
    pub const POS_Z: PropertyId = 2;
    /// Facing yaw in whole degrees.
    pub const ROT_YAW: PropertyId = 3;
    /// Movement target X.
    pub const MOVE_TARGET_X: PropertyId = 4;
    /// Movement target Y.
    pub const MOVE_TARGET_Y: PropertyId = 5;
    /// Movement target Z.
    pub const MOVE_TARGET_Z: PropertyId = 6;
    /// Movement speed (units per second).
    pub const MOVE_SPEED: PropertyId = 7;
    /// 1 while a movement order is active.
    pub const IS_MOVING: PropertyId = 8;

    /// Current health.
    pub const HEALTH: PropertyId = 10;
    /// Maximum health.
    pub const MAX_HEALTH: PropertyId = 11;
    /// Attack power.
    pub const ATTACK_POWER: PropertyId = 12;
    /// Flat damage reduction.
    pub const DEFENSE: PropertyId = 13;
    /// Team index.
    pub const TEAM: PropertyId = 14;
    /// Current mana.
    pub const MANA: PropertyId = 15;
    /// Maximum mana.
    pub const MAX_MANA: PropertyId = 16;

    /// Owning entity (spawner).
    pub const OWNER_ENTITY: PropertyId = 20;
    /// Entity type, see [`super::entity_type`].
    pub const ENTITY_TYPE: PropertyId = 21;

    /// Event target location X.
    pub const TARGET_POS_X: PropertyId = 30;
    /// Event target location Y.
    pub const TARGET_POS_Y: PropertyId = 31;
    /// Event target location Z.
    pub const TARGET_POS_Z: PropertyId = 32;
    /// Event parameter 0.
    pub const PARAM0: PropertyId = 33;
    /// Event parameter 1.
    pub const PARAM1: PropertyId = 34;
    /// Event parameter 2.
    pub const PARAM2: PropertyId = 35;
    /// Event parameter 3.
    pub const PARAM3: PropertyId = 36;

    /// Current animation id (string-pool hash, 0 = none).
    pub const ANIM_STATE: PropertyId = 40;
    /// Current visual id (string-pool hash, 0 = none).
    pub const VISUAL_STATE: PropertyId = 41;

    /// Owning player hash.
    pub const OWNER_PLAYER_HASH: PropertyId = 52;

    /// Collider shape, see [`super::ColliderType`].
    pub const COLLIDER_TYPE: PropertyId = 70;
    /// Collider radius.
    pub const COLLIDER_RADIUS: PropertyId = 71;
    /// Capsule half height (segment half length).
    pub const COLLIDER_HALF_HEIGHT: PropertyId = 72;
    /// Collision layer bits.
    pub const COLLISION_LAYER: PropertyId = 73;
    /// Collision mask bits.
    pub const COLLISION_MASK: PropertyId = 74;

    /// First equipment slot. Slots run up to `EQUIP_SLOT0 + EQUIP_SLOT_COUNT - 1`.
    pub const EQUIP_SLOT0: PropertyId = 80;
    /// Number of equipment slots.
    pub const EQUIP_SLOT_COUNT: PropertyId = 8;
}

/// Values stored in [`prop::ENTITY_TYPE`].
pub mod entity_type {
    /// Untyped.
    pub const NONE: i32 = 0;
    /// Controllable unit.
    pub const UNIT: i32 = 1;
    /// Projectile.
    pub const PROJECTILE: i32 = 2;
    /// Equipment attached to an owner.
    pub const EQUIPMENT: i32 = 3;
    /// Static building.
    pub const BUILDING: i32 = 4;
}

/// Collision layer bits.
pub mod layer {
    /// Default layer.
    pub const DEFAULT: u8 = 1 << 0;
    /// Player-controlled units.
    pub const PLAYER: u8 = 1 << 1;
    /// Enemies.
    pub const ENEMY: u8 = 1 << 2;
    /// Projectiles.
    pub const PROJECTILE: u8 = 1 << 3;
    /// Trigger volumes.
    pub const TRIGGER: u8 = 1 << 4;
    /// Static environment.
    pub const ENVIRONMENT: u8 = 1 << 5;
    /// Every layer.
    pub const ALL: u8 = 0xFF;
}

/// Collider shape stored in [`prop::COLLIDER_TYPE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColliderType {
    /// No collider.
    #[default]
    None = 0,
    /// Sphere around the entity position.
    Sphere = 1,
    /// Vertical capsule centred on the entity position.
    Capsule = 2,
}

impl ColliderType {
    /// Decodes a stored property value. Unknown values read as `None`.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Sphere,
            2 => Self::Capsule,
            _ => Self::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_index_bounds() {
        assert_eq!(EntityId::new(0).index(), Some(0));
        assert_eq!(EntityId::new(1023).index(), Some(1023));
        assert_eq!(EntityId::new(1024).index(), None);
        assert_eq!(EntityId::INVALID.index(), None);
        assert!(EntityId::default().is_invalid());
    }

    #[test]
    fn test_collider_type_decode() {
        assert_eq!(ColliderType::from_raw(1), ColliderType::Sphere);
        assert_eq!(ColliderType::from_raw(2), ColliderType::Capsule);
        assert_eq!(ColliderType::from_raw(7), ColliderType::None);
    }
}
