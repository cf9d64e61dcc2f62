//! # VM Runtimes
//!
//! One [`VmRuntime`] per in-flight program execution, kept in a fixed
//! [`RuntimePool`]. Slots are reused, so a handle carries the slot's
//! generation and goes stale once the slot is freed:
//!
//! ```text
//!  31           24 23                        0
//! +---------------+---------------------------+
//! |  generation   |          index            |
//! +---------------+---------------------------+
//! ```

use std::sync::Arc;

use kinetic_core::LocalContext;
use kinetic_shared::EntityId;

use crate::instruction::{reg, EventWait, RegisterIndex, VmStatus};
use crate::program::Program;

/// Largest slot index a handle can address.
pub const MAX_VM_INDEX: u32 = 0x00FF_FFFE;

const INDEX_MASK: u32 = 0x00FF_FFFF;

// =============================================================================
// Handle
// =============================================================================

/// Generational reference to a pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VmHandle(u32);

impl VmHandle {
    /// Handle that never resolves.
    pub const INVALID: Self = Self(INDEX_MASK);

    /// Packs an index and a generation.
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u8) -> Self {
        Self(((generation as u32) << 24) | (index & INDEX_MASK))
    }

    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// Slot generation at allocation time.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn generation(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// False for [`Self::INVALID`]-indexed handles.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.index() != INDEX_MASK
    }
}

impl Default for VmHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// Results of the last `FindInRadius`, walked by `NextFound`.
#[derive(Clone, Debug, Default)]
pub struct SpatialQuery {
    /// Entities found, ascending id.
    pub results: Vec<EntityId>,
    /// Next element to hand out.
    pub cursor: usize,
}

impl SpatialQuery {
    /// Clears results and cursor.
    pub fn reset(&mut self) {
        self.results.clear();
        self.cursor = 0;
    }

    /// Hands out the next result.
    pub fn next_entity(&mut self) -> Option<EntityId> {
        let entity = self.results.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(entity)
    }
}

/// Execution record of one program run.
#[derive(Debug, Default)]
pub struct VmRuntime {
    /// Program being executed.
    pub program: Option<Arc<Program>>,
    /// Program counter.
    pub pc: i32,
    /// Register file.
    pub registers: [i32; reg::REGISTER_COUNT],
    /// Current state.
    pub status: VmStatus,
    /// Frame the runtime was created on.
    pub creation_frame: i32,
    /// Ticks left before a `Yielded` runtime is ready.
    pub wait_frames: i32,
    /// Timer / collision wait.
    pub event_wait: EventWait,
    /// Radius-query iterator state.
    pub query: SpatialQuery,
    /// Buffered store view.
    pub context: LocalContext,
}

impl VmRuntime {
    /// Prepares the slot for a fresh run of `program`.
    pub fn reset(&mut self, program: Arc<Program>, creation_frame: i32) {
        self.program = Some(program);
        self.pc = 0;
        self.registers = [0; reg::REGISTER_COUNT];
        self.status = VmStatus::Ready;
        self.creation_frame = creation_frame;
        self.wait_frames = 0;
        self.event_wait.reset();
        self.query.reset();
    }

    /// Drops the program reference and any buffered state.
    pub fn release(&mut self) {
        self.program = None;
        self.status = VmStatus::Completed;
        self.event_wait.reset();
        self.query.reset();
        self.context.reset();
    }

    /// Register value (0 for out-of-range indices).
    #[inline]
    #[must_use]
    pub fn reg(&self, index: RegisterIndex) -> i32 {
        self.registers.get(usize::from(index)).copied().unwrap_or(0)
    }

    /// Writes a register (ignored for out-of-range indices).
    #[inline]
    pub fn set_reg(&mut self, index: RegisterIndex, value: i32) {
        if let Some(slot) = self.registers.get_mut(usize::from(index)) {
            *slot = value;
        }
    }

    /// Register interpreted as an entity id.
    #[inline]
    #[must_use]
    pub fn reg_entity(&self, index: RegisterIndex) -> EntityId {
        EntityId::new(self.reg(index))
    }

    /// True if the interpreter should step this runtime this tick.
    #[inline]
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        matches!(self.status, VmStatus::Ready | VmStatus::Running)
    }
}

// =============================================================================
// Pool
// =============================================================================

struct Slot {
    runtime: VmRuntime,
    generation: u8,
    in_use: bool,
}

/// Fixed-capacity runtime pool with generational handles.
///
/// All slots are allocated up front; allocation pops the lowest free index.
pub struct RuntimePool {
    slots: Box<[Slot]>,
    free_list: Vec<u32>,
    active_count: usize,
}

impl RuntimePool {
    /// Creates a pool of `capacity` slots (clamped to `1..=MAX_VM_INDEX + 1`).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = u32::try_from(capacity)
            .unwrap_or(u32::MAX)
            .clamp(1, MAX_VM_INDEX + 1);
        let slots: Vec<Slot> = (0..capacity)
            .map(|_| Slot {
                runtime: VmRuntime::default(),
                generation: 0,
                in_use: false,
            })
            .collect();

        Self {
            slots: slots.into_boxed_slice(),
            free_list: (0..capacity).rev().collect(),
            active_count: 0,
        }
    }

    /// Total slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots in use.
    #[inline]
    #[must_use]
    pub const fn active_count(&self) -> usize {
        self.active_count
    }

    /// Free slots.
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_list.len()
    }

    /// Claims a slot. `None` when the pool is exhausted.
    pub fn allocate(&mut self) -> Option<VmHandle> {
        let index = self.free_list.pop()?;
        let slot = &mut self.slots[index as usize];
        slot.in_use = true;
        self.active_count += 1;
        Some(VmHandle::new(index, slot.generation))
    }

    /// Returns a slot to the pool and bumps its generation. Stale handles
    /// are ignored.
    pub fn free(&mut self, handle: VmHandle) -> bool {
        let Some(slot) = self.slot_mut(handle) else {
            return false;
        };
        slot.runtime.release();
        slot.in_use = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index());
        self.active_count -= 1;
        true
    }

    /// Runtime for a live handle.
    #[must_use]
    pub fn get(&self, handle: VmHandle) -> Option<&VmRuntime> {
        let slot = self.slots.get(handle.index() as usize)?;
        (slot.in_use && slot.generation == handle.generation()).then_some(&slot.runtime)
    }

    /// Mutable runtime for a live handle.
    pub fn get_mut(&mut self, handle: VmHandle) -> Option<&mut VmRuntime> {
        self.slot_mut(handle).map(|slot| &mut slot.runtime)
    }

    /// True if `handle` still refers to its allocation.
    #[must_use]
    pub fn is_valid(&self, handle: VmHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Frees every slot.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.in_use) {
            slot.runtime.release();
            slot.in_use = false;
            slot.generation = slot.generation.wrapping_add(1);
        }
        let capacity = u32::try_from(self.slots.len()).unwrap_or(0);
        self.free_list = (0..capacity).rev().collect();
        self.active_count = 0;
    }

    fn slot_mut(&mut self, handle: VmHandle) -> Option<&mut Slot> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        (slot.in_use && slot.generation == handle.generation()).then_some(slot)
    }
}

impl std::fmt::Debug for RuntimePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimePool")
            .field("capacity", &self.capacity())
            .field("active_count", &self.active_count)
            .finish_non_exhaustive()
    }
}
