//! # VM Processor
//!
//! Turns events into running programs, once per tick:
//!
//! ```text
//! intents ──┐                     ┌── Execute ──┐
//!           ├── Build ── active ──┤             ├── Cleanup ── store
//! system  ──┘   (pool)            └── waits  ───┘  (commit, free)
//! ```
//!
//! 1. **Build** drains the intent queue and the system events deferred
//!    from the previous tick. Each event with a registered program gets a
//!    runtime, a bound context and its parameters.
//! 2. **Execute** resolves yields, timers and collision waits, then steps
//!    every runnable runtime in creation order.
//! 3. **Cleanup** commits the buffered writes of every finished runtime
//!    (failed ones included) and returns its slot.
//!
//! Intents may be submitted from any thread through an [`IntentSender`];
//! everything else is single-threaded.

use std::sync::Arc;

use kinetic_core::MasterStash;
use kinetic_shared::{prop, round_to_i32, EntityId, IntentEvent, SystemEvent, Tag, Vec3};
use parking_lot::Mutex;

use crate::cue::PresentationCue;
use crate::instruction::{reg, PendingEvent, VmStatus, WaitType};
use crate::interpreter::{clamp_delta, timer_expired, Interpreter};
use crate::program::{Program, ProgramRegistry};
use crate::runtime::{RuntimePool, VmHandle, VmRuntime};

/// Default number of concurrent runtimes.
pub const DEFAULT_VM_POOL_SIZE: usize = 256;

/// Number of intent payload parameters copied into `Param0..Param3`.
pub const MAX_INTENT_PARAMS: usize = 4;

// =============================================================================
// Intent hand-off
// =============================================================================

/// Cloneable, thread-safe producer handle for intent events.
///
/// The lock is held only for the push; the processor swaps the whole queue
/// out at the start of Build.
#[derive(Clone, Debug)]
pub struct IntentSender {
    queue: Arc<Mutex<Vec<IntentEvent>>>,
}

impl IntentSender {
    /// Queues one event for the next Build.
    pub fn send(&self, event: IntentEvent) {
        self.queue.lock().push(event);
    }

    /// Queues several events, keeping their order.
    pub fn send_batch(&self, events: impl IntoIterator<Item = IntentEvent>) {
        self.queue.lock().extend(events);
    }

    /// Events waiting for the next Build.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

// =============================================================================
// Stats
// =============================================================================

/// VM lifecycle counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Runtimes created.
    pub created: u64,
    /// Runtimes that halted normally.
    pub completed: u64,
    /// Runtimes that faulted.
    pub failed: u64,
    /// Events dropped (invalid source or pool exhausted).
    pub dropped: u64,
}

impl ProcessorStats {
    /// Adds another set of counters.
    pub fn accumulate(&mut self, other: Self) {
        self.created += other.created;
        self.completed += other.completed;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }
}

// =============================================================================
// Processor
// =============================================================================

/// Owns every in-flight VM.
pub struct VmProcessor {
    registry: Arc<ProgramRegistry>,
    pool: RuntimePool,
    interpreter: Interpreter,
    intents: Arc<Mutex<Vec<IntentEvent>>>,
    intent_buffer: Vec<IntentEvent>,
    system_events: Vec<SystemEvent>,
    external_events: Vec<PendingEvent>,
    /// Live handles in creation order.
    active: Vec<VmHandle>,
    finished: Vec<VmHandle>,
    cues: Vec<PresentationCue>,
    stats: ProcessorStats,
}

impl VmProcessor {
    /// Creates a processor with `pool_size` runtime slots.
    #[must_use]
    pub fn new(registry: Arc<ProgramRegistry>, pool_size: usize, interpreter: Interpreter) -> Self {
        tracing::debug!("[VMProcessor] Initialized with {} runtime slots", pool_size);
        Self {
            registry,
            pool: RuntimePool::new(pool_size),
            interpreter,
            intents: Arc::new(Mutex::new(Vec::new())),
            intent_buffer: Vec::new(),
            system_events: Vec::new(),
            external_events: Vec::new(),
            active: Vec::new(),
            finished: Vec::new(),
            cues: Vec::new(),
            stats: ProcessorStats::default(),
        }
    }

    // =========================================================================
    // Event intake
    // =========================================================================

    /// Producer handle for other threads.
    #[must_use]
    pub fn intent_sender(&self) -> IntentSender {
        IntentSender {
            queue: Arc::clone(&self.intents),
        }
    }

    /// Queues an intent for the next Build.
    pub fn notify_intent_event(&self, event: IntentEvent) {
        self.intents.lock().push(event);
    }

    /// Queues a system event for the next Build.
    pub fn notify_system_event(&mut self, event: SystemEvent) {
        self.system_events.push(event);
    }

    /// Reports a collision of a watched entity; wakes a matching wait on
    /// the next Execute.
    pub fn notify_collision(&mut self, watched: EntityId, hit: EntityId) {
        self.external_events.push(PendingEvent::collision(watched, hit));
    }

    /// Queues any external event for the next Execute.
    pub fn notify_external_event(&mut self, event: PendingEvent) {
        self.external_events.push(event);
    }

    // =========================================================================
    // Tick
    // =========================================================================

    /// Runs Build, Execute and Cleanup for one frame.
    ///
    /// # Returns
    ///
    /// Counters for this tick only; [`Self::stats`] keeps the running total.
    pub fn tick<S: MasterStash + ?Sized>(
        &mut self,
        frame: i32,
        delta_seconds: f32,
        stash: &mut S,
    ) -> ProcessorStats {
        let mut tick_stats = ProcessorStats::default();
        self.build(frame, stash, &mut tick_stats);
        self.execute(delta_seconds, stash);
        self.cleanup(stash, &mut tick_stats);
        self.stats.accumulate(tick_stats);
        tick_stats
    }

    fn build<S: MasterStash + ?Sized>(
        &mut self,
        frame: i32,
        stash: &S,
        stats: &mut ProcessorStats,
    ) {
        self.intent_buffer.clear();
        {
            let mut queue = self.intents.lock();
            std::mem::swap(&mut *queue, &mut self.intent_buffer);
        }

        let intents = std::mem::take(&mut self.intent_buffer);
        for event in &intents {
            if !stash.store().is_valid(event.source) {
                tracing::warn!(
                    "[VMProcessor] Intent {} ({}) has invalid source {}, dropped",
                    event.tag,
                    event.event_id,
                    event.source
                );
                stats.dropped += 1;
                continue;
            }
            let Some(program) = self.find_program(&event.tag) else {
                continue;
            };
            let Some(runtime) = self.spawn_runtime(program, frame, event.source, event.target)
            else {
                stats.dropped += 1;
                continue;
            };

            for (property, value) in (prop::PARAM0..)
                .zip(event.params())
                .take(MAX_INTENT_PARAMS)
            {
                runtime.context.write(property, value);
            }
            write_target_pos(runtime, event.location);
            stats.created += 1;
            tracing::debug!(
                "[VMProcessor] VM created for intent {} (source {})",
                event.tag,
                event.source
            );
        }
        self.intent_buffer = intents;

        let mut system_events = std::mem::take(&mut self.system_events);
        for event in system_events.drain(..) {
            if !event.source.is_invalid() && !stash.store().is_valid(event.source) {
                tracing::warn!(
                    "[VMProcessor] System event {} has invalid source {}, dropped",
                    event.tag,
                    event.source
                );
                stats.dropped += 1;
                continue;
            }
            let Some(program) = self.find_program(&event.tag) else {
                continue;
            };
            let Some(runtime) = self.spawn_runtime(program, frame, event.source, event.target)
            else {
                stats.dropped += 1;
                continue;
            };

            write_target_pos(runtime, event.location);
            runtime.context.write(prop::PARAM0, event.param0);
            runtime.context.write(prop::PARAM1, event.param1);
            stats.created += 1;
            tracing::debug!(
                "[VMProcessor] VM created for system event {} (source {})",
                event.tag,
                event.source
            );
        }
        self.system_events = system_events;
    }

    fn execute<S: MasterStash + ?Sized>(&mut self, delta_seconds: f32, stash: &mut S) {
        let delta_seconds = clamp_delta(delta_seconds);
        let mut events = std::mem::take(&mut self.external_events);
        let mut released = Vec::new();

        for &handle in &self.active {
            let Some(rt) = self.pool.get_mut(handle) else {
                continue;
            };
            match rt.status {
                VmStatus::WaitingEvent => match rt.event_wait.kind {
                    WaitType::Timer => {
                        rt.event_wait.remaining_time -= delta_seconds;
                        if timer_expired(rt.event_wait.remaining_time) {
                            wake(rt);
                        }
                    }
                    WaitType::Collision => {
                        let watched = rt.event_wait.watched;
                        let matched = events
                            .iter()
                            .rposition(|e| e.kind == WaitType::Collision && e.watched == watched);
                        if let Some(index) = matched {
                            let event = events.swap_remove(index);
                            rt.set_reg(reg::HIT, event.hit.raw());
                            wake(rt);
                            released.push(watched);
                        } else if !stash.store().is_valid(watched) {
                            rt.set_reg(reg::HIT, EntityId::INVALID.raw());
                            wake(rt);
                            released.push(watched);
                        }
                    }
                    WaitType::None => wake(rt),
                },
                VmStatus::Yielded => {
                    if rt.wait_frames <= 0 {
                        rt.status = VmStatus::Ready;
                    } else {
                        rt.wait_frames -= 1;
                    }
                }
                _ => {}
            }
        }

        for watched in released {
            let still_watched = self.active.iter().any(|h| {
                self.pool.get(*h).is_some_and(|rt| {
                    rt.status == VmStatus::WaitingEvent
                        && rt.event_wait.kind == WaitType::Collision
                        && rt.event_wait.watched == watched
                })
            });
            if !still_watched {
                stash.unwatch_collision(watched);
            }
        }
        events.clear();
        self.external_events = events;

        for &handle in &self.active {
            let Some(rt) = self.pool.get_mut(handle) else {
                continue;
            };
            if !rt.is_runnable() {
                continue;
            }
            if self.interpreter.execute(rt, stash, &mut self.cues).is_terminal() {
                self.finished.push(handle);
            }
        }
    }

    fn cleanup<S: MasterStash + ?Sized>(&mut self, stash: &mut S, stats: &mut ProcessorStats) {
        for handle in self.finished.drain(..) {
            let Some(rt) = self.pool.get_mut(handle) else {
                continue;
            };
            let writes = rt.context.commit_changes(stash.store_mut());
            if rt.status == VmStatus::Failed {
                stats.failed += 1;
            } else {
                stats.completed += 1;
            }
            tracing::debug!(
                "[VMProcessor] VM finalized: {} {:?} ({} writes)",
                rt.program.as_ref().map_or_else(Tag::default, |p| p.tag.clone()),
                rt.status,
                writes
            );
            self.pool.free(handle);
        }
        self.active.retain(|h| self.pool.is_valid(*h));
    }

    fn find_program(&self, tag: &Tag) -> Option<Arc<Program>> {
        let program = self.registry.find_program(tag);
        if program.is_none() {
            tracing::debug!("[VMProcessor] No program for {}", tag);
        }
        program.filter(|p| p.is_valid())
    }

    fn spawn_runtime(
        &mut self,
        program: Arc<Program>,
        frame: i32,
        source: EntityId,
        target: EntityId,
    ) -> Option<&mut VmRuntime> {
        let Some(handle) = self.pool.allocate() else {
            tracing::warn!(
                "[VMProcessor] Runtime pool exhausted ({} slots), dropping {}",
                self.pool.capacity(),
                program.tag
            );
            return None;
        };
        self.active.push(handle);

        let runtime = self.pool.get_mut(handle)?;
        runtime.reset(program, frame);
        runtime.context.bind(source, target);
        runtime.set_reg(reg::SELF, source.raw());
        runtime.set_reg(reg::TARGET, target.raw());
        Some(runtime)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Runtimes currently alive.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    /// Live handles in creation order.
    #[must_use]
    pub fn active_handles(&self) -> &[VmHandle] {
        &self.active
    }

    /// Intents consumed by the most recent Build, in arrival order.
    #[must_use]
    pub fn frame_intents(&self) -> &[IntentEvent] {
        &self.intent_buffer
    }

    /// Runtime behind a handle, `None` once it has been cleaned up.
    #[must_use]
    pub fn runtime(&self, handle: VmHandle) -> Option<&VmRuntime> {
        self.pool.get(handle)
    }

    /// Takes the presentation cues emitted since the last call.
    pub fn drain_presentation_cues(&mut self) -> Vec<PresentationCue> {
        std::mem::take(&mut self.cues)
    }

    /// Running totals since construction.
    #[must_use]
    pub const fn stats(&self) -> ProcessorStats {
        self.stats
    }

    /// Program registry used for lookups.
    #[must_use]
    pub fn registry(&self) -> &Arc<ProgramRegistry> {
        &self.registry
    }

    /// System events waiting for the next Build.
    #[must_use]
    pub fn pending_system_events(&self) -> usize {
        self.system_events.len()
    }

    /// Aborts every runtime and drops queued system and external events.
    /// Buffered writes are discarded; queued intents are kept.
    pub fn reset(&mut self) {
        let aborted = self.pool.active_count();
        self.pool.clear();
        self.active.clear();
        self.finished.clear();
        self.system_events.clear();
        self.external_events.clear();
        self.cues.clear();
        if aborted > 0 {
            tracing::info!("[VMProcessor] Reset, aborted {} runtimes", aborted);
        }
    }
}

impl std::fmt::Debug for VmProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmProcessor")
            .field("pool", &self.pool)
            .field("active", &self.active.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

fn wake(rt: &mut VmRuntime) {
    rt.event_wait.reset();
    rt.status = VmStatus::Ready;
}

fn write_target_pos(rt: &mut VmRuntime, location: Vec3) {
    rt.context.write(prop::TARGET_POS_X, round_to_i32(location.x));
    rt.context.write(prop::TARGET_POS_Y, round_to_i32(location.y));
    rt.context.write(prop::TARGET_POS_Z, round_to_i32(location.z));
}
