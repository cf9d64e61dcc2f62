//! # KINETIC Shared
//!
//! Common types used by every layer of the simulation core.
//!
//! ## CRITICAL RULE
//!
//! This crate holds plain data only. Anything that mutates simulation
//! state belongs in `kinetic_core` or `kinetic_vm`.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod events;
pub mod math;
pub mod tag;
pub mod types;

pub use events::{CellChangeEvent, EntitySnapshot, FrameBatch, IntentEvent, SystemEvent};
pub use math::{round_to_i32, yaw_direction, CellCoord, Vec3, DIRECTION_SCALE, SMALL_NUMBER};
pub use tag::{Tag, TagContainer};
pub use types::{
    entity_type, layer, prop, ColliderType, EntityId, PropertyId, MAX_ENTITIES, MAX_PROPERTIES,
};
