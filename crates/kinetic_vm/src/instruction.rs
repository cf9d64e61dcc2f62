//! # Instruction Set
//!
//! One instruction is one little-endian `u32`, in one of two layouts:
//!
//! ```text
//!  31            20 19   16 15   12 11    8 7      0
//! +----------------+-------+-------+-------+--------+
//! |     imm12      | src2  | src1  |  dst  |   op   |   three-operand
//! +----------------+-------+-------+-------+--------+
//! |          imm20                 |  dst  |   op   |   immediate
//! +--------------------------------+-------+--------+
//! ```
//!
//! Both immediates are sign-extended on decode.

use bytemuck::{Pod, Zeroable};
use kinetic_shared::EntityId;

/// Index into the register file.
pub type RegisterIndex = u8;

/// Register file layout.
pub mod reg {
    use super::RegisterIndex;

    /// General purpose.
    pub const R0: RegisterIndex = 0;
    /// General purpose.
    pub const R1: RegisterIndex = 1;
    /// General purpose.
    pub const R2: RegisterIndex = 2;
    /// General purpose.
    pub const R3: RegisterIndex = 3;
    /// General purpose.
    pub const R4: RegisterIndex = 4;
    /// General purpose.
    pub const R5: RegisterIndex = 5;
    /// General purpose.
    pub const R6: RegisterIndex = 6;
    /// General purpose.
    pub const R7: RegisterIndex = 7;
    /// General purpose.
    pub const R8: RegisterIndex = 8;
    /// General purpose, clobbered by builder helpers.
    pub const R9: RegisterIndex = 9;
    /// Scratch register used by builder helpers.
    pub const TEMP: RegisterIndex = 9;
    /// Source entity of the triggering event.
    pub const SELF: RegisterIndex = 10;
    /// Target entity of the triggering event.
    pub const TARGET: RegisterIndex = 11;
    /// Last entity spawned.
    pub const SPAWNED: RegisterIndex = 12;
    /// Entity hit by the last collision wait.
    pub const HIT: RegisterIndex = 13;
    /// Current radius-query element.
    pub const ITER: RegisterIndex = 14;
    /// Comparison / loop flag.
    pub const FLAG: RegisterIndex = 15;
    /// Radius-query result count (shares the flag slot).
    pub const COUNT: RegisterIndex = 15;

    /// Size of the register file.
    pub const REGISTER_COUNT: usize = 16;
}

// =============================================================================
// Opcodes
// =============================================================================

/// Operation byte of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// No operation.
    Nop = 0,
    /// Completes the VM.
    Halt,
    /// Suspends for `imm20` ticks.
    Yield,
    /// Suspends for `imm20` milliseconds.
    YieldSeconds,
    /// `pc = imm20`.
    Jump,
    /// `pc = imm20` if `dst != 0`.
    JumpIf,
    /// `pc = imm20` if `dst == 0`.
    JumpIfNot,
    /// Blocks until the entity in `dst` collides.
    WaitCollision,
    /// `dst = imm20`.
    LoadConst,
    /// `dst = (imm20 << 12) | (dst & 0xFFF)`.
    LoadConstHigh,
    /// `dst = self.prop[imm12]`.
    LoadStore,
    /// `dst = src1.prop[imm12]`.
    LoadStoreEntity,
    /// `self.prop[imm12] = src1`.
    SaveStore,
    /// `src1.prop[imm12] = src2`.
    SaveStoreEntity,
    /// `dst = src1`.
    Move,
    /// `dst = src1 + src2`.
    Add,
    /// `dst = src1 - src2`.
    Sub,
    /// `dst = src1 * src2`.
    Mul,
    /// `dst = src1 / src2`.
    Div,
    /// `dst = src1 % src2`.
    Mod,
    /// `dst = src1 + imm12`.
    AddImm,
    /// `dst = src1 == src2`.
    CmpEq,
    /// `dst = src1 != src2`.
    CmpNe,
    /// `dst = src1 < src2`.
    CmpLt,
    /// `dst = src1 <= src2`.
    CmpLe,
    /// `dst = src1 > src2`.
    CmpGt,
    /// `dst = src1 >= src2`.
    CmpGe,
    /// Spawns an entity of class `strings[imm20]` into `Spawned`.
    SpawnEntity,
    /// Frees the entity in `src1`.
    DestroyEntity,
    /// `dst..dst+2 = src1.position`.
    GetPosition,
    /// `src1.position = src2..src2+2`.
    SetPosition,
    /// `dst = |src1 - src2|`.
    GetDistance,
    /// Moves `dst` towards position `src1..src1+2` at speed `src2`.
    MoveToward,
    /// Moves `dst` along its facing at speed `src1`.
    MoveForward,
    /// Cancels movement of `dst`.
    StopMovement,
    /// Collects entities within `src2` of `src1`; count into `Count`.
    FindInRadius,
    /// Next query result into `Iter`, `Flag = 1`, or `Flag = 0` when done.
    NextFound,
    /// Deals `src2` damage to `src1`.
    ApplyDamage,
    /// Adds effect tag `strings[imm12]` to `src1`.
    ApplyEffect,
    /// Removes effect tag `strings[imm12]` from `src1`.
    RemoveEffect,
    /// Plays animation `strings[imm12]` on `src1`.
    PlayAnim,
    /// Plays montage `strings[imm12]` on `src1`.
    PlayAnimMontage,
    /// Stops animation on `src1`.
    StopAnim,
    /// VFX `strings[imm12]` at position `src1..src1+2`.
    PlayVfx,
    /// VFX `strings[imm12]` attached to `src1`.
    PlayVfxAttached,
    /// Sound `strings[imm20]`.
    PlaySound,
    /// Sound `strings[imm12]` at position `src1..src1+2`.
    PlaySoundAtLocation,
    /// Equips class `strings[imm12]` on `src1` in slot `src2`.
    SpawnEquipment,
    /// Logs `strings[imm20]`.
    Log,
}

impl OpCode {
    /// Every opcode, indexed by its byte.
    pub const ALL: [Self; 49] = [
        Self::Nop,
        Self::Halt,
        Self::Yield,
        Self::YieldSeconds,
        Self::Jump,
        Self::JumpIf,
        Self::JumpIfNot,
        Self::WaitCollision,
        Self::LoadConst,
        Self::LoadConstHigh,
        Self::LoadStore,
        Self::LoadStoreEntity,
        Self::SaveStore,
        Self::SaveStoreEntity,
        Self::Move,
        Self::Add,
        Self::Sub,
        Self::Mul,
        Self::Div,
        Self::Mod,
        Self::AddImm,
        Self::CmpEq,
        Self::CmpNe,
        Self::CmpLt,
        Self::CmpLe,
        Self::CmpGt,
        Self::CmpGe,
        Self::SpawnEntity,
        Self::DestroyEntity,
        Self::GetPosition,
        Self::SetPosition,
        Self::GetDistance,
        Self::MoveToward,
        Self::MoveForward,
        Self::StopMovement,
        Self::FindInRadius,
        Self::NextFound,
        Self::ApplyDamage,
        Self::ApplyEffect,
        Self::RemoveEffect,
        Self::PlayAnim,
        Self::PlayAnimMontage,
        Self::StopAnim,
        Self::PlayVfx,
        Self::PlayVfxAttached,
        Self::PlaySound,
        Self::PlaySoundAtLocation,
        Self::SpawnEquipment,
        Self::Log,
    ];

    /// Decodes an opcode byte.
    #[inline]
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(usize::from(value)).copied()
    }
}

// =============================================================================
// Instruction word
// =============================================================================

/// Smallest `imm12`.
pub const IMM12_MIN: i32 = -(1 << 11);
/// Largest `imm12`.
pub const IMM12_MAX: i32 = (1 << 11) - 1;
/// Smallest `imm20`.
pub const IMM20_MIN: i32 = -(1 << 19);
/// Largest `imm20`.
pub const IMM20_MAX: i32 = (1 << 19) - 1;

/// A single encoded instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct Instruction(pub u32);

impl Instruction {
    /// Encodes the three-operand layout. Operands are masked to their
    /// field widths.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn make(
        op: OpCode,
        dst: RegisterIndex,
        src1: RegisterIndex,
        src2: RegisterIndex,
        imm12: i32,
    ) -> Self {
        Self(
            (op as u32)
                | ((dst as u32 & 0xF) << 8)
                | ((src1 as u32 & 0xF) << 12)
                | ((src2 as u32 & 0xF) << 16)
                | (((imm12 as u32) & 0xFFF) << 20),
        )
    }

    /// Encodes the immediate layout.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn make_imm(op: OpCode, dst: RegisterIndex, imm20: i32) -> Self {
        Self((op as u32) | ((dst as u32 & 0xF) << 8) | (((imm20 as u32) & 0xF_FFFF) << 12))
    }

    /// Raw opcode byte.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn op_byte(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Decoded opcode, `None` for bytes outside the set.
    #[inline]
    #[must_use]
    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_u8(self.op_byte())
    }

    /// Destination register.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn dst(self) -> RegisterIndex {
        ((self.0 >> 8) & 0xF) as u8
    }

    /// First source register.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn src1(self) -> RegisterIndex {
        ((self.0 >> 12) & 0xF) as u8
    }

    /// Second source register.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn src2(self) -> RegisterIndex {
        ((self.0 >> 16) & 0xF) as u8
    }

    /// Sign-extended 12-bit immediate.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn imm12(self) -> i32 {
        (self.0 as i32) >> 20
    }

    /// Sign-extended 20-bit immediate.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn imm20(self) -> i32 {
        (self.0 as i32) >> 12
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode() {
            Some(op) => write!(
                f,
                "{op:?} d{} s{} s{} #{} #{}",
                self.dst(),
                self.src1(),
                self.src2(),
                self.imm12(),
                self.imm20()
            ),
            None => write!(f, "Invalid({:#010x})", self.0),
        }
    }
}

// =============================================================================
// Runtime state enums
// =============================================================================

/// Lifecycle of one VM runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum VmStatus {
    /// Runnable this tick.
    #[default]
    Ready,
    /// Inside the interpreter.
    Running,
    /// Counting down frames.
    Yielded,
    /// Blocked on a timer or an external event.
    WaitingEvent,
    /// Halted normally.
    Completed,
    /// Halted by a fault.
    Failed,
}

impl VmStatus {
    /// True once the runtime is waiting for cleanup.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What a `WaitingEvent` runtime is blocked on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WaitType {
    /// Not waiting.
    #[default]
    None,
    /// Remaining time reaches zero.
    Timer,
    /// The watched entity collides.
    Collision,
}

/// External event matched against waiting runtimes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingEvent {
    /// Kind of wait this event satisfies.
    pub kind: WaitType,
    /// Entity the waiting runtime watches.
    pub watched: EntityId,
    /// Other participant (written to `Hit` for collisions).
    pub hit: EntityId,
}

impl PendingEvent {
    /// Collision between `watched` and `hit`.
    #[must_use]
    pub const fn collision(watched: EntityId, hit: EntityId) -> Self {
        Self {
            kind: WaitType::Collision,
            watched,
            hit,
        }
    }
}

/// Wait descriptor stored on a runtime.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct EventWait {
    /// Kind of wait.
    pub kind: WaitType,
    /// Watched entity for collision waits.
    pub watched: EntityId,
    /// Seconds left for timer waits.
    pub remaining_time: f32,
}

impl EventWait {
    /// Clears the descriptor.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_operand_layout() {
        let inst = Instruction::make(OpCode::Add, 1, 2, 3, -5);
        assert_eq!(inst.opcode(), Some(OpCode::Add));
        assert_eq!(inst.dst(), 1);
        assert_eq!(inst.src1(), 2);
        assert_eq!(inst.src2(), 3);
        assert_eq!(inst.imm12(), -5);
        assert_eq!(inst.0 & 0xFF, OpCode::Add as u32);
    }

    #[test]
    fn test_immediate_sign_extension() {
        assert_eq!(Instruction::make_imm(OpCode::LoadConst, 0, IMM20_MAX).imm20(), IMM20_MAX);
        assert_eq!(Instruction::make_imm(OpCode::LoadConst, 0, IMM20_MIN).imm20(), IMM20_MIN);
        assert_eq!(Instruction::make_imm(OpCode::LoadConst, 0, -1).imm20(), -1);
        assert_eq!(Instruction::make(OpCode::AddImm, 0, 0, 0, IMM12_MIN).imm12(), IMM12_MIN);
        assert_eq!(Instruction::make(OpCode::AddImm, 0, 0, 0, IMM12_MAX).imm12(), IMM12_MAX);
    }

    #[test]
    fn test_opcode_table_matches_discriminants() {
        for (byte, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, byte);
        }
        assert_eq!(OpCode::from_u8(OpCode::Log as u8), Some(OpCode::Log));
        assert_eq!(OpCode::from_u8(OpCode::Log as u8 + 1), None);
        assert_eq!(Instruction(0xFF).opcode(), None);
    }

    #[test]
    fn test_words_are_pod() {
        let code = [
            Instruction::make_imm(OpCode::LoadConst, reg::R0, 77),
            Instruction::make(OpCode::Halt, 0, 0, 0, 0),
        ];
        let words: &[u32] = bytemuck::cast_slice(&code);
        assert_eq!(words.len(), 2);
        assert_eq!(Instruction(words[0]).imm20(), 77);
    }

    #[test]
    fn test_terminal_states() {
        assert!(VmStatus::Completed.is_terminal());
        assert!(VmStatus::Failed.is_terminal());
        assert!(!VmStatus::Yielded.is_terminal());
    }
}
