//! Presentation cues: notifications for the animation / VFX / audio layer,
//! collected per tick. Nothing in the simulation reads them back.

use kinetic_shared::{EntityId, Tag, Vec3};

/// What the presentation layer should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CueKind {
    /// Looping animation started.
    Animation,
    /// One-shot montage started.
    Montage,
    /// Animation stopped.
    StopAnimation,
    /// World-space VFX.
    Vfx,
    /// VFX attached to an entity.
    VfxAttached,
    /// Non-positional sound.
    Sound,
    /// World-space sound.
    SoundAtLocation,
    /// Effect tag added.
    EffectApplied,
    /// Effect tag removed.
    EffectRemoved,
    /// Damage dealt (`value` = amount).
    Damage,
    /// Equipment spawned (`value` = slot).
    EquipmentSpawned,
}

/// One presentation notification.
#[derive(Clone, Debug, PartialEq)]
pub struct PresentationCue {
    /// Kind of cue.
    pub kind: CueKind,
    /// Entity the cue is about (`INVALID` for world-space cues).
    pub entity: EntityId,
    /// World location, zero when not positional.
    pub location: Vec3,
    /// Asset / effect name, if any.
    pub asset: Option<Tag>,
    /// Kind-specific value.
    pub value: i32,
}

impl PresentationCue {
    /// Cue about an entity.
    #[must_use]
    pub fn on_entity(kind: CueKind, entity: EntityId, asset: Option<Tag>) -> Self {
        Self {
            kind,
            entity,
            location: Vec3::ZERO,
            asset,
            value: 0,
        }
    }

    /// Cue at a world location.
    #[must_use]
    pub fn at_location(kind: CueKind, location: Vec3, asset: Option<Tag>) -> Self {
        Self {
            kind,
            entity: EntityId::INVALID,
            location,
            asset,
            value: 0,
        }
    }

    /// Sets the kind-specific value.
    #[must_use]
    pub const fn with_value(mut self, value: i32) -> Self {
        self.value = value;
        self
    }
}
