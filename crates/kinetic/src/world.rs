//! # Simulation World
//!
//! Owns every piece of simulation state and drives one tick:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ 1. VM processor     Build -> Execute -> Cleanup            │
//! │ 2. Spatial          re-derive cells from stored positions  │
//! │ 3. Depenetration    push watched pairs apart, wake waits,  │
//! │                     queue collision events for next Build  │
//! │ 4. Frame completed                                         │
//! │ 5. Relevancy        consume cell changes per observer      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Collision reactions therefore run one tick after the overlap is
//! detected. Identical input on an identical state gives an identical
//! checksum.

use std::sync::Arc;

use kinetic_core::{EntityStore, MasterStash, SpatialSystem, StoreResult, WorldStash};
use kinetic_shared::{EntityId, FrameBatch, IntentEvent, SystemEvent, Tag};
use kinetic_vm::{
    IntentSender, Interpreter, PresentationCue, Program, ProgramRegistry, VmProcessor,
};

use crate::config::SimulationConfig;
use crate::error::ConfigResult;
use crate::relevancy::{GridRelevancy, ObserverId};

/// Counters describing one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Frame number the tick ran for.
    pub frame: i32,
    /// Runtimes created during Build.
    pub vms_created: u64,
    /// Runtimes that completed.
    pub vms_completed: u64,
    /// Runtimes that faulted.
    pub vms_failed: u64,
    /// Events dropped (invalid source, pool exhausted).
    pub events_dropped: u64,
    /// Watched collision pairs resolved.
    pub collisions: usize,
    /// Entities that changed cell.
    pub cell_changes: usize,
    /// Runtimes still alive after the tick.
    pub active_vms: usize,
}

/// The authoritative simulation.
pub struct SimulationWorld {
    config: SimulationConfig,
    store: EntityStore,
    spatial: SpatialSystem,
    processor: VmProcessor,
    relevancy: GridRelevancy,
    collision_events: Vec<SystemEvent>,
    last_stats: TickStats,
}

impl SimulationWorld {
    /// Creates an empty world with its own program registry.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`](crate::ConfigError::Invalid) if `config`
    /// fails [`SimulationConfig::validate`].
    pub fn new(config: SimulationConfig) -> ConfigResult<Self> {
        Self::with_registry(config, Arc::new(ProgramRegistry::new()))
    }

    /// Creates an empty world sharing an existing program registry.
    ///
    /// # Errors
    ///
    /// Same as [`Self::new`].
    pub fn with_registry(
        config: SimulationConfig,
        registry: Arc<ProgramRegistry>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, registry))
    }

    fn assemble(config: SimulationConfig, registry: Arc<ProgramRegistry>) -> Self {
        let mut spatial = SpatialSystem::new(config.cell_size);
        spatial.set_collision_event_tag(Tag::new(&config.collision_event_tag));
        let processor = VmProcessor::new(
            registry,
            config.vm_pool_size,
            Interpreter::new(config.max_instructions_per_slice),
        );
        let relevancy = GridRelevancy::new(config.relevancy_interest_radius);

        tracing::info!(
            "[SimulationWorld] Initialized (cell size {:.0}, {} VM slots)",
            config.cell_size,
            config.vm_pool_size
        );
        Self {
            config,
            store: EntityStore::new(),
            spatial,
            processor,
            relevancy,
            collision_events: Vec::new(),
            last_stats: TickStats::default(),
        }
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Advances the simulation by one frame.
    pub fn tick(&mut self, frame: i32, delta_seconds: f32) -> TickStats {
        let vm_stats = {
            let mut stash = WorldStash::new(&mut self.store, &mut self.spatial);
            self.processor.tick(frame, delta_seconds, &mut stash)
        };

        self.spatial.update_entity_positions(&self.store);

        let mut collisions = 0;
        if self.config.resolve_overlaps {
            collisions = self
                .spatial
                .resolve_overlaps_and_gen_events(&mut self.store, &mut self.collision_events);
            for event in self.collision_events.drain(..) {
                self.processor.notify_collision(event.source, event.target);
                self.processor.notify_system_event(event);
            }
        }

        self.store.mark_frame_completed(frame);

        let cell_events = self.spatial.consume_cell_change_events();
        self.relevancy.update(&self.spatial, &cell_events);

        self.last_stats = TickStats {
            frame,
            vms_created: vm_stats.created,
            vms_completed: vm_stats.completed,
            vms_failed: vm_stats.failed,
            events_dropped: vm_stats.dropped,
            collisions,
            cell_changes: cell_events.len(),
            active_vms: self.processor.active_count(),
        };
        tracing::trace!("[SimulationWorld] {:?}", self.last_stats);
        self.last_stats
    }

    /// Counters of the most recent tick.
    #[must_use]
    pub const fn last_tick_stats(&self) -> TickStats {
        self.last_stats
    }

    // =========================================================================
    // Input
    // =========================================================================

    /// Queues an intent for the next tick.
    pub fn add_input_event(&self, event: IntentEvent) {
        self.processor.notify_intent_event(event);
    }

    /// Queues a system event for the next tick.
    pub fn add_system_event(&mut self, event: SystemEvent) {
        self.processor.notify_system_event(event);
    }

    /// Thread-safe intent producer.
    #[must_use]
    pub fn intent_sender(&self) -> IntentSender {
        self.processor.intent_sender()
    }

    /// Registers (or replaces) a program.
    pub fn register_program(&self, program: Program) -> Arc<Program> {
        self.processor.registry().register_program(program)
    }

    /// Shared program registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ProgramRegistry> {
        self.processor.registry()
    }

    // =========================================================================
    // State access
    // =========================================================================

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Entity store.
    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Mutable entity store, for setup outside the tick.
    ///
    /// Entities allocated here gain a cell on the next tick.
    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    /// Store and spatial index together, for setup that must keep both in
    /// step (allocation, freeing, watches).
    pub fn stash(&mut self) -> WorldStash<'_> {
        WorldStash::new(&mut self.store, &mut self.spatial)
    }

    /// Spatial index.
    #[must_use]
    pub const fn spatial(&self) -> &SpatialSystem {
        &self.spatial
    }

    /// VM processor.
    #[must_use]
    pub const fn processor(&self) -> &VmProcessor {
        &self.processor
    }

    /// Takes the presentation cues emitted since the last call.
    pub fn drain_presentation_cues(&mut self) -> Vec<PresentationCue> {
        self.processor.drain_presentation_cues()
    }

    /// Checksum of the whole store.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.store.calculate_checksum()
    }

    // =========================================================================
    // Relevancy
    // =========================================================================

    /// Observer interest sets.
    #[must_use]
    pub const fn relevancy(&self) -> &GridRelevancy {
        &self.relevancy
    }

    /// Mutable observer interest sets (register, move, unregister).
    pub fn relevancy_mut(&mut self) -> &mut GridRelevancy {
        &mut self.relevancy
    }

    /// One batch per observer for the last completed frame, carrying the
    /// intents that tick consumed.
    #[must_use]
    pub fn frame_batches(&self) -> Vec<(ObserverId, FrameBatch)> {
        self.relevancy.build_frame_batches(
            &self.store,
            self.spatial.cell_size(),
            self.store.completed_frame(),
            self.processor.frame_intents(),
        )
    }

    /// Applies a batch received from a server: removals first, then
    /// snapshots, then the batch's frame number. The spatial index follows
    /// the store. The batch's intents are left to the caller.
    ///
    /// Returns the ids that became live.
    pub fn apply_frame_batch(&mut self, batch: &FrameBatch) -> Vec<EntityId> {
        {
            let mut stash = WorldStash::new(&mut self.store, &mut self.spatial);
            for &entity in &batch.removed_entities {
                stash.free_entity(entity);
            }
        }

        let spawned = self.store.apply_snapshots(&batch.snapshots);
        for &entity in &spawned {
            self.spatial.on_entity_allocated(entity);
        }
        self.spatial.update_entity_positions(&self.store);
        self.store.mark_frame_completed(batch.frame_number);

        tracing::debug!(
            "[SimulationWorld] Applied batch for frame {}: {} snapshots, {} removals",
            batch.frame_number,
            batch.snapshots.len(),
            batch.removed_entities.len()
        );
        spawned
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Serializes the store.
    #[must_use]
    pub fn save_state(&self) -> Vec<u8> {
        self.store.serialize_full_state()
    }

    /// Restores the store and rebuilds everything derived from it.
    ///
    /// Running VMs are aborted and watches are dropped. Observers are
    /// re-synchronized on the next tick.
    ///
    /// # Errors
    ///
    /// Any [`StoreError`](kinetic_core::StoreError) from decoding; the world
    /// is left untouched in that case.
    pub fn load_state(&mut self, bytes: &[u8]) -> StoreResult<()> {
        self.store.deserialize_full_state(bytes)?;

        self.processor.reset();
        self.spatial.reset();
        for entity in self.store.iter_entities() {
            self.spatial.on_entity_allocated(entity);
        }
        self.spatial.update_entity_positions(&self.store);
        self.spatial.consume_cell_change_events();
        self.relevancy.invalidate();

        tracing::info!(
            "[SimulationWorld] Loaded state: {} entities, frame {}",
            self.store.entity_count(),
            self.store.completed_frame()
        );
        Ok(())
    }
}

impl Default for SimulationWorld {
    fn default() -> Self {
        Self::assemble(SimulationConfig::default(), Arc::new(ProgramRegistry::new()))
    }
}

impl std::fmt::Debug for SimulationWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationWorld")
            .field("entities", &self.store.entity_count())
            .field("completed_frame", &self.store.completed_frame())
            .field("processor", &self.processor)
            .field("observers", &self.relevancy.observer_count())
            .finish_non_exhaustive()
    }
}
