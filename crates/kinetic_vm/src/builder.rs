//! # Flow Builder
//!
//! Fluent authoring API for [`Program`]s. Reads top to bottom like the
//! gameplay it describes:
//!
//! ```rust,ignore
//! use kinetic_vm::{reg, FlowBuilder};
//!
//! let program = FlowBuilder::new("Ability.Skill.Fireball")
//!     .play_anim(reg::SELF, "CastStart")
//!     .wait_seconds(1.0)
//!     .spawn_entity("Projectile.Fireball")
//!     .move_forward(reg::SPAWNED, 500)
//!     .wait_collision(reg::SPAWNED)
//!     .apply_damage_const(reg::HIT, 100)
//!     .halt()
//!     .build()?;
//! ```
//!
//! Errors (bad label, immediate overflow, open loop) are remembered and
//! reported by [`FlowBuilder::build`], so a chain never has to stop midway.
//! Helpers that take literal operands stage them in [`reg::TEMP`].

use std::collections::HashMap;
use std::sync::Arc;

use kinetic_shared::{prop, round_to_i32, ColliderType, PropertyId, Tag};

use crate::error::{VmError, VmResult};
use crate::instruction::{
    reg, Instruction, OpCode, RegisterIndex, IMM12_MAX, IMM12_MIN, IMM20_MAX, IMM20_MIN,
};
use crate::program::{Program, ProgramRegistry};

/// Jump waiting for its label.
#[derive(Debug)]
struct Fixup {
    at: usize,
    op: OpCode,
    cond: RegisterIndex,
    label: String,
}

/// Builds a [`Program`] one instruction at a time.
#[derive(Debug)]
pub struct FlowBuilder {
    tag: Tag,
    code: Vec<Instruction>,
    constants: Vec<i32>,
    strings: Vec<String>,
    line_numbers: Vec<i32>,
    current_line: i32,
    labels: HashMap<String, usize>,
    fixups: Vec<Fixup>,
    loop_stack: Vec<(String, String)>,
    loop_counter: u32,
    error: Option<VmError>,
}

impl FlowBuilder {
    /// Starts a program for `tag`.
    #[must_use]
    pub fn new(tag: impl Into<Tag>) -> Self {
        Self {
            tag: tag.into(),
            code: Vec::new(),
            constants: Vec::new(),
            strings: Vec::new(),
            line_numbers: Vec::new(),
            current_line: 0,
            labels: HashMap::new(),
            fixups: Vec::new(),
            loop_stack: Vec::new(),
            loop_counter: 0,
            error: None,
        }
    }

    /// Source line recorded for the following instructions.
    pub fn at_line(&mut self, line: i32) -> &mut Self {
        self.current_line = line;
        self
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    /// Places a label at the next instruction.
    pub fn label(&mut self, name: &str) -> &mut Self {
        if self.labels.insert(name.to_owned(), self.code.len()).is_some() {
            self.fail(VmError::DuplicateLabel(name.to_owned()));
        }
        self
    }

    /// Unconditional jump.
    pub fn jump(&mut self, label: &str) -> &mut Self {
        self.emit_jump(OpCode::Jump, 0, label)
    }

    /// Jumps when `cond` is non-zero.
    pub fn jump_if(&mut self, cond: RegisterIndex, label: &str) -> &mut Self {
        self.emit_jump(OpCode::JumpIf, cond, label)
    }

    /// Jumps when `cond` is zero.
    pub fn jump_if_not(&mut self, cond: RegisterIndex, label: &str) -> &mut Self {
        self.emit_jump(OpCode::JumpIfNot, cond, label)
    }

    /// Suspends for `frames` ticks (1 = resume next tick).
    pub fn yield_frames(&mut self, frames: i32) -> &mut Self {
        self.op_imm(OpCode::Yield, 0, frames)
    }

    /// Suspends on a timer. Resolution is one millisecond.
    pub fn wait_seconds(&mut self, seconds: f32) -> &mut Self {
        let millis = round_to_i32(seconds * 1000.0);
        self.op_imm(OpCode::YieldSeconds, 0, millis)
    }

    /// Completes the program.
    pub fn halt(&mut self) -> &mut Self {
        self.op3(OpCode::Halt, 0, 0, 0, 0)
    }

    /// Blocks until the entity in `watch` collides; the other party lands
    /// in [`reg::HIT`].
    pub fn wait_collision(&mut self, watch: RegisterIndex) -> &mut Self {
        self.op3(OpCode::WaitCollision, watch, 0, 0, 0)
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Loads any `i32`, splitting values wider than 20 bits.
    pub fn load_const(&mut self, dst: RegisterIndex, value: i32) -> &mut Self {
        if !self.constants.contains(&value) {
            self.constants.push(value);
        }
        if (IMM20_MIN..=IMM20_MAX).contains(&value) {
            self.op_imm(OpCode::LoadConst, dst, value)
        } else {
            self.op_imm(OpCode::LoadConst, dst, value & 0xFFF)
                .op_imm(OpCode::LoadConstHigh, dst, value >> 12)
        }
    }

    /// `dst = self.property`.
    pub fn load_store(&mut self, dst: RegisterIndex, property: PropertyId) -> &mut Self {
        self.op3(OpCode::LoadStore, dst, 0, 0, i32::from(property))
    }

    /// `dst = entity.property`.
    pub fn load_entity_property(
        &mut self,
        dst: RegisterIndex,
        entity: RegisterIndex,
        property: PropertyId,
    ) -> &mut Self {
        self.op3(OpCode::LoadStoreEntity, dst, entity, 0, i32::from(property))
    }

    /// `self.property = src`.
    pub fn save_store(&mut self, property: PropertyId, src: RegisterIndex) -> &mut Self {
        self.op3(OpCode::SaveStore, 0, src, 0, i32::from(property))
    }

    /// `entity.property = src`.
    pub fn save_entity_property(
        &mut self,
        entity: RegisterIndex,
        property: PropertyId,
        src: RegisterIndex,
    ) -> &mut Self {
        self.op3(OpCode::SaveStoreEntity, 0, entity, src, i32::from(property))
    }

    /// `dst = src`.
    pub fn move_reg(&mut self, dst: RegisterIndex, src: RegisterIndex) -> &mut Self {
        self.op3(OpCode::Move, dst, src, 0, 0)
    }

    // =========================================================================
    // Arithmetic & Comparison
    // =========================================================================

    /// `dst = a + b` (wrapping).
    pub fn add(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::Add, dst, a, b, 0)
    }

    /// `dst = a - b` (wrapping).
    pub fn sub(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::Sub, dst, a, b, 0)
    }

    /// `dst = a * b` (wrapping).
    pub fn mul(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::Mul, dst, a, b, 0)
    }

    /// `dst = a / b`; fails the VM when `b == 0`.
    pub fn div(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::Div, dst, a, b, 0)
    }

    /// `dst = a % b`; fails the VM when `b == 0`.
    pub fn modulo(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::Mod, dst, a, b, 0)
    }

    /// `dst = src + imm` with a 12-bit immediate.
    pub fn add_imm(&mut self, dst: RegisterIndex, src: RegisterIndex, imm: i32) -> &mut Self {
        self.op3(OpCode::AddImm, dst, src, 0, imm)
    }

    /// `dst = (a == b)`.
    pub fn cmp_eq(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::CmpEq, dst, a, b, 0)
    }

    /// `dst = (a != b)`.
    pub fn cmp_ne(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::CmpNe, dst, a, b, 0)
    }

    /// `dst = (a < b)`.
    pub fn cmp_lt(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::CmpLt, dst, a, b, 0)
    }

    /// `dst = (a <= b)`.
    pub fn cmp_le(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::CmpLe, dst, a, b, 0)
    }

    /// `dst = (a > b)`.
    pub fn cmp_gt(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::CmpGt, dst, a, b, 0)
    }

    /// `dst = (a >= b)`.
    pub fn cmp_ge(&mut self, dst: RegisterIndex, a: RegisterIndex, b: RegisterIndex) -> &mut Self {
        self.op3(OpCode::CmpGe, dst, a, b, 0)
    }

    // =========================================================================
    // Entities & Movement
    // =========================================================================

    /// Spawns an entity tagged `class`; the id lands in [`reg::SPAWNED`].
    pub fn spawn_entity(&mut self, class: &str) -> &mut Self {
        let index = self.intern(class);
        self.op_imm(OpCode::SpawnEntity, reg::SPAWNED, index)
    }

    /// Frees the entity in `entity`.
    pub fn destroy_entity(&mut self, entity: RegisterIndex) -> &mut Self {
        self.op3(OpCode::DestroyEntity, 0, entity, 0, 0)
    }

    /// Position of `entity` into `dst_base..dst_base + 2`.
    pub fn get_position(&mut self, dst_base: RegisterIndex, entity: RegisterIndex) -> &mut Self {
        self.op3(OpCode::GetPosition, dst_base, entity, 0, 0)
    }

    /// Position of `entity` from `src_base..src_base + 2`.
    pub fn set_position(&mut self, entity: RegisterIndex, src_base: RegisterIndex) -> &mut Self {
        self.op3(OpCode::SetPosition, 0, entity, src_base, 0)
    }

    /// Integer distance between two entities into `dst`.
    pub fn get_distance(
        &mut self,
        dst: RegisterIndex,
        a: RegisterIndex,
        b: RegisterIndex,
    ) -> &mut Self {
        self.op3(OpCode::GetDistance, dst, a, b, 0)
    }

    /// Orders `entity` to move to the position in `target_base..target_base + 2`.
    pub fn move_toward(
        &mut self,
        entity: RegisterIndex,
        target_base: RegisterIndex,
        speed: i32,
    ) -> &mut Self {
        self.load_const(reg::TEMP, speed)
            .op3(OpCode::MoveToward, entity, target_base, reg::TEMP, 0)
    }

    /// Orders `entity` to move along its facing.
    pub fn move_forward(&mut self, entity: RegisterIndex, speed: i32) -> &mut Self {
        self.load_const(reg::TEMP, speed)
            .op3(OpCode::MoveForward, entity, reg::TEMP, 0, 0)
    }

    /// Cancels movement of `entity`.
    pub fn stop_movement(&mut self, entity: RegisterIndex) -> &mut Self {
        self.op3(OpCode::StopMovement, entity, 0, 0, 0)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Collects entities within `radius` of `center`; count into [`reg::COUNT`].
    pub fn find_in_radius(&mut self, center: RegisterIndex, radius: i32) -> &mut Self {
        self.load_const(reg::TEMP, radius)
            .op3(OpCode::FindInRadius, 0, center, reg::TEMP, 0)
    }

    /// Next query result into [`reg::ITER`]; [`reg::FLAG`] is 0 when exhausted.
    pub fn next_found(&mut self) -> &mut Self {
        self.op3(OpCode::NextFound, 0, 0, 0, 0)
    }

    /// Opens a loop over entities within `radius` of `center`. The body sees
    /// the current element in [`reg::ITER`]. Close with [`Self::end_for_each`].
    pub fn for_each_in_radius(&mut self, center: RegisterIndex, radius: i32) -> &mut Self {
        let id = self.loop_counter;
        self.loop_counter += 1;
        let start = format!("__for_each_{id}_start");
        let end = format!("__for_each_{id}_end");

        self.find_in_radius(center, radius)
            .label(&start)
            .next_found()
            .jump_if_not(reg::FLAG, &end);
        self.loop_stack.push((start, end));
        self
    }

    /// Closes the innermost loop.
    pub fn end_for_each(&mut self) -> &mut Self {
        match self.loop_stack.pop() {
            Some((start, end)) => self.jump(&start).label(&end),
            None => {
                self.fail(VmError::UnbalancedForEach);
                self
            }
        }
    }

    // =========================================================================
    // Combat & Effects
    // =========================================================================

    /// Deals the damage in `amount` to `target`.
    pub fn apply_damage(&mut self, target: RegisterIndex, amount: RegisterIndex) -> &mut Self {
        self.op3(OpCode::ApplyDamage, 0, target, amount, 0)
    }

    /// Deals a fixed amount of damage to `target`.
    pub fn apply_damage_const(&mut self, target: RegisterIndex, amount: i32) -> &mut Self {
        self.load_const(reg::TEMP, amount)
            .apply_damage(target, reg::TEMP)
    }

    /// Adds effect tag `effect` to `target`.
    pub fn apply_effect(&mut self, target: RegisterIndex, effect: &str) -> &mut Self {
        let index = self.intern(effect);
        self.op3(OpCode::ApplyEffect, 0, target, 0, index)
    }

    /// Removes effect tag `effect` from `target`.
    pub fn remove_effect(&mut self, target: RegisterIndex, effect: &str) -> &mut Self {
        let index = self.intern(effect);
        self.op3(OpCode::RemoveEffect, 0, target, 0, index)
    }

    // =========================================================================
    // Presentation
    // =========================================================================

    /// Plays a looping animation.
    pub fn play_anim(&mut self, entity: RegisterIndex, anim: &str) -> &mut Self {
        let index = self.intern(anim);
        self.op3(OpCode::PlayAnim, 0, entity, 0, index)
    }

    /// Plays a one-shot montage.
    pub fn play_anim_montage(&mut self, entity: RegisterIndex, montage: &str) -> &mut Self {
        let index = self.intern(montage);
        self.op3(OpCode::PlayAnimMontage, 0, entity, 0, index)
    }

    /// Stops animation.
    pub fn stop_anim(&mut self, entity: RegisterIndex) -> &mut Self {
        self.op3(OpCode::StopAnim, 0, entity, 0, 0)
    }

    /// VFX at the position in `pos_base..pos_base + 2`.
    pub fn play_vfx(&mut self, pos_base: RegisterIndex, path: &str) -> &mut Self {
        let index = self.intern(path);
        self.op3(OpCode::PlayVfx, 0, pos_base, 0, index)
    }

    /// VFX attached to `entity`.
    pub fn play_vfx_attached(&mut self, entity: RegisterIndex, path: &str) -> &mut Self {
        let index = self.intern(path);
        self.op3(OpCode::PlayVfxAttached, 0, entity, 0, index)
    }

    /// Non-positional sound.
    pub fn play_sound(&mut self, path: &str) -> &mut Self {
        let index = self.intern(path);
        self.op_imm(OpCode::PlaySound, 0, index)
    }

    /// Sound at the position in `pos_base..pos_base + 2`.
    pub fn play_sound_at_location(&mut self, pos_base: RegisterIndex, path: &str) -> &mut Self {
        let index = self.intern(path);
        self.op3(OpCode::PlaySoundAtLocation, 0, pos_base, 0, index)
    }

    /// Spawns equipment of `class` into `slot` on `owner`.
    pub fn spawn_equipment(&mut self, owner: RegisterIndex, slot: i32, class: &str) -> &mut Self {
        let index = self.intern(class);
        self.load_const(reg::TEMP, slot)
            .op3(OpCode::SpawnEquipment, 0, owner, reg::TEMP, index)
    }

    // =========================================================================
    // Colliders
    // =========================================================================

    /// Gives `entity` a sphere collider.
    pub fn set_collider_sphere(
        &mut self,
        entity: RegisterIndex,
        radius: i32,
        layer: u8,
        mask: u8,
    ) -> &mut Self {
        self.save_entity_const(entity, prop::COLLIDER_TYPE, ColliderType::Sphere as i32)
            .save_entity_const(entity, prop::COLLIDER_RADIUS, radius)
            .set_collision_layer(entity, layer)
            .set_collision_mask(entity, mask)
    }

    /// Gives `entity` a vertical capsule collider.
    pub fn set_collider_capsule(
        &mut self,
        entity: RegisterIndex,
        half_height: i32,
        radius: i32,
        layer: u8,
        mask: u8,
    ) -> &mut Self {
        self.save_entity_const(entity, prop::COLLIDER_TYPE, ColliderType::Capsule as i32)
            .save_entity_const(entity, prop::COLLIDER_RADIUS, radius)
            .save_entity_const(entity, prop::COLLIDER_HALF_HEIGHT, half_height)
            .set_collision_layer(entity, layer)
            .set_collision_mask(entity, mask)
    }

    /// Sets the collision layer bits.
    pub fn set_collision_layer(&mut self, entity: RegisterIndex, layer: u8) -> &mut Self {
        self.save_entity_const(entity, prop::COLLISION_LAYER, i32::from(layer))
    }

    /// Sets the collision mask bits.
    pub fn set_collision_mask(&mut self, entity: RegisterIndex, mask: u8) -> &mut Self {
        self.save_entity_const(entity, prop::COLLISION_MASK, i32::from(mask))
    }

    /// Removes the collider.
    pub fn disable_collider(&mut self, entity: RegisterIndex) -> &mut Self {
        self.save_entity_const(entity, prop::COLLIDER_TYPE, ColliderType::None as i32)
    }

    // =========================================================================
    // Debug
    // =========================================================================

    /// Emits `message` at debug level when executed.
    pub fn log(&mut self, message: &str) -> &mut Self {
        let index = self.intern(message);
        self.op_imm(OpCode::Log, 0, index)
    }

    // =========================================================================
    // Finish
    // =========================================================================

    /// Resolves labels and produces the program.
    ///
    /// # Errors
    ///
    /// The first error recorded while building, an open loop, an unknown
    /// label, or an empty program.
    pub fn build(&self) -> VmResult<Program> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if !self.loop_stack.is_empty() {
            return Err(VmError::UnbalancedForEach);
        }
        if self.code.is_empty() {
            return Err(VmError::EmptyProgram);
        }

        let mut code = self.code.clone();
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| VmError::UnknownLabel(fixup.label.clone()))?;
            let target = i32::try_from(*target)
                .ok()
                .filter(|t| *t <= IMM20_MAX)
                .ok_or(VmError::ImmediateOutOfRange {
                    value: i64::try_from(*target).unwrap_or(i64::MAX),
                    bits: 20,
                })?;
            code[fixup.at] = Instruction::make_imm(fixup.op, fixup.cond, target);
        }

        Ok(Program {
            tag: self.tag.clone(),
            code,
            constants: self.constants.clone(),
            strings: self.strings.clone(),
            line_numbers: self.line_numbers.clone(),
        })
    }

    /// Builds and registers under the program's tag.
    ///
    /// # Errors
    ///
    /// Same as [`Self::build`]; nothing is registered on error.
    pub fn build_and_register(&self, registry: &ProgramRegistry) -> VmResult<Arc<Program>> {
        Ok(registry.register_program(self.build()?))
    }

    // =========================================================================
    // Emitters
    // =========================================================================

    fn save_entity_const(&mut self, entity: RegisterIndex, property: PropertyId, value: i32) -> &mut Self {
        self.load_const(reg::TEMP, value)
            .save_entity_property(entity, property, reg::TEMP)
    }

    fn emit_jump(&mut self, op: OpCode, cond: RegisterIndex, label: &str) -> &mut Self {
        self.check_registers(&[cond]);
        self.fixups.push(Fixup {
            at: self.code.len(),
            op,
            cond,
            label: label.to_owned(),
        });
        self.emit(Instruction::make_imm(op, cond, 0))
    }

    fn op3(
        &mut self,
        op: OpCode,
        dst: RegisterIndex,
        src1: RegisterIndex,
        src2: RegisterIndex,
        imm12: i32,
    ) -> &mut Self {
        self.check_registers(&[dst, src1, src2]);
        if !(IMM12_MIN..=IMM12_MAX).contains(&imm12) {
            self.fail(VmError::ImmediateOutOfRange {
                value: i64::from(imm12),
                bits: 12,
            });
        }
        self.emit(Instruction::make(op, dst, src1, src2, imm12))
    }

    fn op_imm(&mut self, op: OpCode, dst: RegisterIndex, imm20: i32) -> &mut Self {
        self.check_registers(&[dst]);
        if !(IMM20_MIN..=IMM20_MAX).contains(&imm20) {
            self.fail(VmError::ImmediateOutOfRange {
                value: i64::from(imm20),
                bits: 20,
            });
        }
        self.emit(Instruction::make_imm(op, dst, imm20))
    }

    fn emit(&mut self, instruction: Instruction) -> &mut Self {
        self.code.push(instruction);
        self.line_numbers.push(self.current_line);
        self
    }

    fn check_registers(&mut self, registers: &[RegisterIndex]) {
        let pc = i32::try_from(self.code.len()).unwrap_or(i32::MAX);
        if let Some(bad) = registers.iter().find(|r| usize::from(**r) >= reg::REGISTER_COUNT) {
            self.fail(VmError::RegisterOutOfRange {
                pc,
                register: u32::from(*bad),
            });
        }
    }

    fn intern(&mut self, text: &str) -> i32 {
        let index = match self.strings.iter().position(|s| s == text) {
            Some(index) => index,
            None => {
                self.strings.push(text.to_owned());
                self.strings.len() - 1
            }
        };
        i32::try_from(index).unwrap_or(i32::MAX)
    }

    fn fail(&mut self, error: VmError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}
