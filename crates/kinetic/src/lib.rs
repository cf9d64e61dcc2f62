//! # KINETIC
//!
//! Deterministic, server-authoritative simulation core. The
//! [`SimulationWorld`] ties the entity store, the spatial index and the VM
//! processor into one fixed-order tick; [`GridRelevancy`] turns the result
//! into per-observer [`FrameBatch`](kinetic_shared::FrameBatch)es.
//!
//! ## Architecture Rules
//!
//! 1. **One tick, one thread** - the tick never touches a lock-free or
//!    parallel structure
//! 2. **Integer truth** - the checksum covers integer properties and tag
//!    hashes only
//! 3. **Read-only fan-out** - rayon is used after the tick, never inside it
//!
//! ## Example
//!
//! ```rust,ignore
//! use kinetic::{SimulationConfig, SimulationWorld};
//! use kinetic_shared::{IntentEvent, Tag};
//!
//! let config = SimulationConfig::from_file("kinetic.toml")?;
//! let mut world = SimulationWorld::new(config)?;
//! let hero = world.stash().allocate_entity();
//!
//! world.add_input_event(IntentEvent::new(1, hero, Tag::new("Ability.Dash")));
//! let stats = world.tick(1, 1.0 / 30.0);
//! let checksum = world.checksum();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod relevancy;
pub mod world;

pub use config::SimulationConfig;
pub use error::{ConfigError, ConfigResult};
pub use relevancy::{GridRelevancy, ObserverId, MAX_INTEREST_RADIUS, MOVEMENT_THRESHOLD};
pub use world::{SimulationWorld, TickStats};

pub use kinetic_core::{MasterStash, WorldStash};
