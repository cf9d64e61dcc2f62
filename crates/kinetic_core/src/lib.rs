//! # KINETIC Core
//!
//! Authoritative simulation state and the geometry that operates on it:
//! - Entity store: 1024 entities, 128 `i32` properties each, hierarchical tags
//! - Local context: per-VM buffered writes, committed on termination
//! - Replica apply: server snapshots rebuild a client-side store
//! - Collision primitives: stateless sphere/capsule/ray/sweep tests
//! - Spatial system: cell index, watched collisions, depenetration
//!
//! ## Architecture Rules
//!
//! 1. **Single logical thread** - nothing here is `Sync`-guarded
//! 2. **Integer state** - positions are quantised before they are stored
//! 3. **Stable order** - every iteration visits entities by ascending id
//!
//! ## Example
//!
//! ```rust,ignore
//! use kinetic_core::EntityStore;
//! use kinetic_shared::prop;
//!
//! let mut store = EntityStore::new();
//! let e = store.allocate();
//! store.set_property(e, prop::HEALTH, 100);
//! let checksum = store.calculate_checksum();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod physics;
pub mod spatial;
pub mod stash;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use physics::{CollisionPair, CollisionResult, RaycastResult, SweepResult};
pub use spatial::SpatialSystem;
pub use stash::{MasterStash, WorldStash};
pub use store::{EntityStore, LocalContext, PendingWrite, STATE_MAGIC, STATE_VERSION};
