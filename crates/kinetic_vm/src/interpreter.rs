//! # Interpreter
//!
//! Steps one runtime until it yields, blocks, completes or faults.
//!
//! Property reads and writes go through the runtime's [`LocalContext`], so
//! the rest of the world sees them only after cleanup. Entity lifecycle
//! (spawn / destroy) and tag changes are immediate: they go through the
//! [`MasterStash`] so the spatial index stays in step.
//!
//! A fault (division by zero, bad register base, bad string index, unknown
//! opcode) fails the VM and is logged; it never propagates out of a tick.
//!
//! [`LocalContext`]: kinetic_core::LocalContext

use kinetic_core::MasterStash;
use kinetic_shared::{
    entity_type, prop, yaw_direction, EntityId, PropertyId, Tag, Vec3,
    DIRECTION_SCALE, SMALL_NUMBER,
};

use crate::cue::{CueKind, PresentationCue};
use crate::error::{VmError, VmResult};
use crate::instruction::{reg, Instruction, OpCode, RegisterIndex, VmStatus, WaitType};
use crate::program::Program;
use crate::runtime::VmRuntime;

/// Default cap on instructions per runtime per tick.
pub const DEFAULT_MAX_INSTRUCTIONS_PER_SLICE: u32 = 10_000;

/// What the loop does after one instruction.
enum Flow {
    Continue,
    Suspend,
}

/// Bytecode interpreter. Stateless apart from its slice budget.
#[derive(Clone, Copy, Debug)]
pub struct Interpreter {
    max_instructions_per_slice: u32,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INSTRUCTIONS_PER_SLICE)
    }
}

impl Interpreter {
    /// Creates an interpreter with the given slice budget (at least 1).
    #[must_use]
    pub const fn new(max_instructions_per_slice: u32) -> Self {
        Self {
            max_instructions_per_slice: if max_instructions_per_slice == 0 {
                1
            } else {
                max_instructions_per_slice
            },
        }
    }

    /// Instructions a runtime may execute before it is forced to yield.
    #[inline]
    #[must_use]
    pub const fn max_instructions_per_slice(&self) -> u32 {
        self.max_instructions_per_slice
    }

    /// Runs `runtime` until it leaves the `Running` state and returns the
    /// new status.
    pub fn execute<S: MasterStash + ?Sized>(
        &self,
        runtime: &mut VmRuntime,
        stash: &mut S,
        cues: &mut Vec<PresentationCue>,
    ) -> VmStatus {
        let Some(program) = runtime.program.clone() else {
            runtime.status = VmStatus::Failed;
            return runtime.status;
        };

        runtime.status = VmStatus::Running;
        let mut budget = self.max_instructions_per_slice;

        while runtime.status == VmStatus::Running {
            if budget == 0 {
                tracing::trace!(
                    "[VM] {} hit the slice budget at pc {}, yielding",
                    program.tag,
                    runtime.pc
                );
                runtime.wait_frames = 0;
                runtime.status = VmStatus::Yielded;
                break;
            }
            budget -= 1;

            let pc = runtime.pc;
            let Some(instruction) = program.instruction(pc) else {
                if pc < 0 {
                    fault(&program, runtime, &VmError::InvalidProgramCounter(pc));
                } else {
                    runtime.status = VmStatus::Completed;
                }
                break;
            };
            runtime.pc += 1;

            match Self::step(&program, instruction, pc, runtime, stash, cues) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Suspend) => break,
                Err(err) => fault(&program, runtime, &err),
            }
        }

        runtime.status
    }

    #[allow(clippy::too_many_lines)]
    fn step<S: MasterStash + ?Sized>(
        program: &Program,
        inst: Instruction,
        pc: i32,
        rt: &mut VmRuntime,
        stash: &mut S,
        cues: &mut Vec<PresentationCue>,
    ) -> VmResult<Flow> {
        let Some(op) = inst.opcode() else {
            return Err(VmError::InvalidOpcode {
                pc,
                opcode: inst.op_byte(),
            });
        };
        let (dst, src1, src2) = (inst.dst(), inst.src1(), inst.src2());

        match op {
            // -----------------------------------------------------------------
            // Control
            // -----------------------------------------------------------------
            OpCode::Nop => {}
            OpCode::Halt => {
                rt.status = VmStatus::Completed;
                return Ok(Flow::Suspend);
            }
            OpCode::Yield => {
                rt.wait_frames = inst.imm20().max(1) - 1;
                rt.status = VmStatus::Yielded;
                return Ok(Flow::Suspend);
            }
            OpCode::YieldSeconds => {
                #[allow(clippy::cast_precision_loss)]
                let seconds = inst.imm20().max(0) as f32 / 1000.0;
                rt.event_wait.kind = WaitType::Timer;
                rt.event_wait.watched = EntityId::INVALID;
                rt.event_wait.remaining_time = seconds;
                rt.status = VmStatus::WaitingEvent;
                return Ok(Flow::Suspend);
            }
            OpCode::Jump => rt.pc = inst.imm20(),
            OpCode::JumpIf => {
                if rt.reg(dst) != 0 {
                    rt.pc = inst.imm20();
                }
            }
            OpCode::JumpIfNot => {
                if rt.reg(dst) == 0 {
                    rt.pc = inst.imm20();
                }
            }
            OpCode::WaitCollision => {
                let watched = rt.reg_entity(dst);
                if !stash.store().is_valid(watched) {
                    tracing::warn!(
                        "[VM] {} waits on collision of invalid entity {}, skipping",
                        program.tag,
                        watched
                    );
                    rt.set_reg(reg::HIT, EntityId::INVALID.raw());
                    return Ok(Flow::Continue);
                }
                stash.watch_collision(watched);
                rt.event_wait.kind = WaitType::Collision;
                rt.event_wait.watched = watched;
                rt.event_wait.remaining_time = 0.0;
                rt.status = VmStatus::WaitingEvent;
                return Ok(Flow::Suspend);
            }

            // -----------------------------------------------------------------
            // Data
            // -----------------------------------------------------------------
            OpCode::LoadConst => rt.set_reg(dst, inst.imm20()),
            OpCode::LoadConstHigh => {
                let value = inst.imm20().wrapping_shl(12) | (rt.reg(dst) & 0xFFF);
                rt.set_reg(dst, value);
            }
            OpCode::LoadStore => {
                let value = rt.context.read(stash.store(), property(inst)?);
                rt.set_reg(dst, value);
            }
            OpCode::LoadStoreEntity => {
                let value = rt
                    .context
                    .read_entity(stash.store(), rt.reg_entity(src1), property(inst)?);
                rt.set_reg(dst, value);
            }
            OpCode::SaveStore => {
                let value = rt.reg(src1);
                rt.context.write(property(inst)?, value);
            }
            OpCode::SaveStoreEntity => {
                let (entity, value) = (rt.reg_entity(src1), rt.reg(src2));
                rt.context.write_entity(entity, property(inst)?, value);
            }
            OpCode::Move => rt.set_reg(dst, rt.reg(src1)),

            // -----------------------------------------------------------------
            // Arithmetic
            // -----------------------------------------------------------------
            OpCode::Add => rt.set_reg(dst, rt.reg(src1).wrapping_add(rt.reg(src2))),
            OpCode::Sub => rt.set_reg(dst, rt.reg(src1).wrapping_sub(rt.reg(src2))),
            OpCode::Mul => rt.set_reg(dst, rt.reg(src1).wrapping_mul(rt.reg(src2))),
            OpCode::Div | OpCode::Mod => {
                let divisor = rt.reg(src2);
                if divisor == 0 {
                    return Err(VmError::DivisionByZero(pc));
                }
                let value = if op == OpCode::Div {
                    rt.reg(src1).wrapping_div(divisor)
                } else {
                    rt.reg(src1).wrapping_rem(divisor)
                };
                rt.set_reg(dst, value);
            }
            OpCode::AddImm => rt.set_reg(dst, rt.reg(src1).wrapping_add(inst.imm12())),
            OpCode::CmpEq => rt.set_reg(dst, i32::from(rt.reg(src1) == rt.reg(src2))),
            OpCode::CmpNe => rt.set_reg(dst, i32::from(rt.reg(src1) != rt.reg(src2))),
            OpCode::CmpLt => rt.set_reg(dst, i32::from(rt.reg(src1) < rt.reg(src2))),
            OpCode::CmpLe => rt.set_reg(dst, i32::from(rt.reg(src1) <= rt.reg(src2))),
            OpCode::CmpGt => rt.set_reg(dst, i32::from(rt.reg(src1) > rt.reg(src2))),
            OpCode::CmpGe => rt.set_reg(dst, i32::from(rt.reg(src1) >= rt.reg(src2))),

            // -----------------------------------------------------------------
            // Entities & movement
            // -----------------------------------------------------------------
            OpCode::SpawnEntity => {
                let class = string(program, inst.imm20(), pc)?;
                let entity = spawn(program, rt, stash, class);
                rt.set_reg(reg::SPAWNED, entity.raw());
            }
            OpCode::DestroyEntity => {
                let entity = rt.reg_entity(src1);
                if stash.store().is_valid(entity) {
                    stash.free_entity(entity);
                    rt.context.forget_entity(entity);
                }
            }
            OpCode::GetPosition => {
                check_base(dst, pc)?;
                let position = read_position(rt, stash, rt.reg_entity(src1));
                for (i, value) in (0u8..).zip(position) {
                    rt.set_reg(dst + i, value);
                }
            }
            OpCode::SetPosition => {
                let position = reg_triple(rt, src2, pc)?;
                let entity = rt.reg_entity(src1);
                write_position(rt, entity, position);
            }
            OpCode::GetDistance => {
                let a = read_position(rt, stash, rt.reg_entity(src1));
                let b = read_position(rt, stash, rt.reg_entity(src2));
                rt.set_reg(dst, int_distance(a, b));
            }
            OpCode::MoveToward => {
                let target = reg_triple(rt, src1, pc)?;
                let entity = rt.reg_entity(dst);
                let speed = rt.reg(src2);
                start_move(rt, entity, target, speed);
            }
            OpCode::MoveForward => {
                let entity = rt.reg_entity(dst);
                let speed = rt.reg(src1);
                let [x, y, z] = read_position(rt, stash, entity);
                let yaw = rt.context.read_entity(stash.store(), entity, prop::ROT_YAW);
                let (dir_x, dir_y) = yaw_direction(yaw);
                let step = |origin: i32, dir: i32| {
                    let delta = i64::from(dir) * i64::from(speed) / i64::from(DIRECTION_SCALE);
                    saturate(i64::from(origin) + delta)
                };
                start_move(rt, entity, [step(x, dir_x), step(y, dir_y), z], speed);
            }
            OpCode::StopMovement => {
                let entity = rt.reg_entity(dst);
                rt.context.write_entity(entity, prop::IS_MOVING, 0);
                rt.context.write_entity(entity, prop::MOVE_SPEED, 0);
            }

            // -----------------------------------------------------------------
            // Queries
            // -----------------------------------------------------------------
            OpCode::FindInRadius => {
                let center = rt.reg_entity(src1);
                let radius = rt.reg(src2);
                rt.query.reset();
                let results = &mut rt.query.results;
                stash
                    .store()
                    .for_each_entity_in_radius(center, radius, |e| results.push(e));
                let count = i32::try_from(rt.query.results.len()).unwrap_or(i32::MAX);
                rt.set_reg(reg::COUNT, count);
            }
            OpCode::NextFound => match rt.query.next_entity() {
                Some(entity) => {
                    rt.set_reg(reg::ITER, entity.raw());
                    rt.set_reg(reg::FLAG, 1);
                }
                None => rt.set_reg(reg::FLAG, 0),
            },

            // -----------------------------------------------------------------
            // Combat & effects
            // -----------------------------------------------------------------
            OpCode::ApplyDamage => {
                let target = rt.reg_entity(src1);
                let amount = rt.reg(src2);
                if stash.store().is_valid(target) {
                    let health = rt.context.read_entity(stash.store(), target, prop::HEALTH);
                    let remaining = health.saturating_sub(amount).max(0);
                    rt.context.write_entity(target, prop::HEALTH, remaining);
                    cues.push(
                        PresentationCue::on_entity(CueKind::Damage, target, None).with_value(amount),
                    );
                }
            }
            OpCode::ApplyEffect | OpCode::RemoveEffect => {
                let target = rt.reg_entity(src1);
                let effect = Tag::new(string(program, inst.imm12(), pc)?);
                let kind = if op == OpCode::ApplyEffect {
                    stash.store_mut().add_tag(target, effect.clone());
                    CueKind::EffectApplied
                } else {
                    stash.store_mut().remove_tag(target, &effect);
                    CueKind::EffectRemoved
                };
                cues.push(PresentationCue::on_entity(kind, target, Some(effect)));
            }

            // -----------------------------------------------------------------
            // Presentation
            // -----------------------------------------------------------------
            OpCode::PlayAnim | OpCode::PlayAnimMontage => {
                let entity = rt.reg_entity(src1);
                let anim = Tag::new(string(program, inst.imm12(), pc)?);
                rt.context
                    .write_entity(entity, prop::ANIM_STATE, asset_id(&anim));
                let kind = if op == OpCode::PlayAnim {
                    CueKind::Animation
                } else {
                    CueKind::Montage
                };
                cues.push(PresentationCue::on_entity(kind, entity, Some(anim)));
            }
            OpCode::StopAnim => {
                let entity = rt.reg_entity(src1);
                rt.context.write_entity(entity, prop::ANIM_STATE, 0);
                cues.push(PresentationCue::on_entity(CueKind::StopAnimation, entity, None));
            }
            OpCode::PlayVfx | OpCode::PlaySoundAtLocation => {
                let [x, y, z] = reg_triple(rt, src1, pc)?;
                let asset = Tag::new(string(program, inst.imm12(), pc)?);
                let kind = if op == OpCode::PlayVfx {
                    CueKind::Vfx
                } else {
                    CueKind::SoundAtLocation
                };
                cues.push(PresentationCue::at_location(
                    kind,
                    Vec3::from_ints(x, y, z),
                    Some(asset),
                ));
            }
            OpCode::PlayVfxAttached => {
                let entity = rt.reg_entity(src1);
                let asset = Tag::new(string(program, inst.imm12(), pc)?);
                rt.context
                    .write_entity(entity, prop::VISUAL_STATE, asset_id(&asset));
                cues.push(PresentationCue::on_entity(CueKind::VfxAttached, entity, Some(asset)));
            }
            OpCode::PlaySound => {
                let asset = Tag::new(string(program, inst.imm20(), pc)?);
                cues.push(PresentationCue::on_entity(
                    CueKind::Sound,
                    rt.reg_entity(reg::SELF),
                    Some(asset),
                ));
            }
            OpCode::SpawnEquipment => {
                let owner = rt.reg_entity(src1);
                let slot = rt.reg(src2);
                let class = string(program, inst.imm12(), pc)?;
                let entity = spawn_equipment(program, rt, stash, owner, slot, class);
                rt.set_reg(reg::SPAWNED, entity.raw());
                if !entity.is_invalid() {
                    cues.push(
                        PresentationCue::on_entity(
                            CueKind::EquipmentSpawned,
                            owner,
                            Some(Tag::new(class)),
                        )
                        .with_value(slot),
                    );
                }
            }

            // -----------------------------------------------------------------
            // Debug
            // -----------------------------------------------------------------
            OpCode::Log => {
                let message = string(program, inst.imm20(), pc)?;
                tracing::debug!("[VM] {} (pc {}): {}", program.tag, pc, message);
            }
        }

        Ok(Flow::Continue)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn fault(program: &Program, runtime: &mut VmRuntime, err: &VmError) {
    tracing::warn!(
        "[VM] {} failed at pc {} (line {}): {}",
        program.tag,
        runtime.pc.saturating_sub(1),
        program.line_at(runtime.pc.saturating_sub(1)),
        err
    );
    runtime.status = VmStatus::Failed;
}

fn property(inst: Instruction) -> VmResult<PropertyId> {
    let imm = inst.imm12();
    PropertyId::try_from(imm).map_err(|_| VmError::ImmediateOutOfRange {
        value: i64::from(imm),
        bits: 12,
    })
}

fn string(program: &Program, index: i32, pc: i32) -> VmResult<&str> {
    program
        .string(index)
        .ok_or(VmError::InvalidString { pc, index })
}

fn check_base(base: RegisterIndex, pc: i32) -> VmResult<()> {
    if usize::from(base) + 2 >= reg::REGISTER_COUNT {
        return Err(VmError::RegisterOutOfRange {
            pc,
            register: u32::from(base) + 2,
        });
    }
    Ok(())
}

fn reg_triple(rt: &VmRuntime, base: RegisterIndex, pc: i32) -> VmResult<[i32; 3]> {
    check_base(base, pc)?;
    Ok([rt.reg(base), rt.reg(base + 1), rt.reg(base + 2)])
}

fn read_position<S: MasterStash + ?Sized>(rt: &VmRuntime, stash: &S, entity: EntityId) -> [i32; 3] {
    let store = stash.store();
    [prop::POS_X, prop::POS_Y, prop::POS_Z].map(|p| rt.context.read_entity(store, entity, p))
}

fn write_position(rt: &mut VmRuntime, entity: EntityId, [x, y, z]: [i32; 3]) {
    rt.context.write_entity(entity, prop::POS_X, x);
    rt.context.write_entity(entity, prop::POS_Y, y);
    rt.context.write_entity(entity, prop::POS_Z, z);
}

fn start_move(rt: &mut VmRuntime, entity: EntityId, [x, y, z]: [i32; 3], speed: i32) {
    rt.context.write_entity(entity, prop::MOVE_TARGET_X, x);
    rt.context.write_entity(entity, prop::MOVE_TARGET_Y, y);
    rt.context.write_entity(entity, prop::MOVE_TARGET_Z, z);
    rt.context.write_entity(entity, prop::MOVE_SPEED, speed);
    rt.context.write_entity(entity, prop::IS_MOVING, 1);
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn int_distance(a: [i32; 3], b: [i32; 3]) -> i32 {
    let sq: i64 = a
        .iter()
        .zip(b)
        .map(|(a, b)| {
            let d = i64::from(*a) - i64::from(b);
            d * d
        })
        .sum();
    let distance = (sq as f64).sqrt().round();
    if distance >= f64::from(i32::MAX) {
        i32::MAX
    } else {
        distance as i32
    }
}

fn saturate(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

/// Property encoding of an asset name.
#[allow(clippy::cast_possible_wrap)]
fn asset_id(asset: &Tag) -> i32 {
    asset.stable_hash() as i32
}

fn spawn<S: MasterStash + ?Sized>(
    program: &Program,
    rt: &mut VmRuntime,
    stash: &mut S,
    class: &str,
) -> EntityId {
    let entity = stash.allocate_entity();
    if entity.is_invalid() {
        tracing::warn!("[VM] {} could not spawn '{}': entity store full", program.tag, class);
        return entity;
    }
    stash.store_mut().add_tag(entity, Tag::new(class));
    let owner = rt.context.source();
    rt.context.write_entity(entity, prop::OWNER_ENTITY, owner.raw());
    entity
}

fn spawn_equipment<S: MasterStash + ?Sized>(
    program: &Program,
    rt: &mut VmRuntime,
    stash: &mut S,
    owner: EntityId,
    slot: i32,
    class: &str,
) -> EntityId {
    let slot_property = PropertyId::try_from(slot)
        .ok()
        .filter(|s| *s < prop::EQUIP_SLOT_COUNT)
        .map(|s| prop::EQUIP_SLOT0 + s);
    let Some(slot_property) = slot_property else {
        tracing::warn!("[VM] {} equipment slot {} out of range", program.tag, slot);
        return EntityId::INVALID;
    };
    if !stash.store().is_valid(owner) {
        tracing::warn!("[VM] {} cannot equip invalid owner {}", program.tag, owner);
        return EntityId::INVALID;
    }

    let entity = spawn(program, rt, stash, class);
    if entity.is_invalid() {
        return entity;
    }
    rt.context.write_entity(entity, prop::OWNER_ENTITY, owner.raw());
    rt.context.write_entity(entity, prop::ENTITY_TYPE, entity_type::EQUIPMENT);
    rt.context.write_entity(owner, slot_property, entity.raw());
    entity
}

/// True once a timer wait has run out.
#[inline]
pub(crate) fn timer_expired(remaining: f32) -> bool {
    remaining <= SMALL_NUMBER
}

/// Seconds to subtract from a timer for one tick.
#[inline]
pub(crate) fn clamp_delta(delta_seconds: f32) -> f32 {
    if delta_seconds.is_finite() {
        delta_seconds.max(0.0)
    } else {
        0.0
    }
}
