//! # Programs & Registry
//!
//! A [`Program`] is immutable once built. The [`ProgramRegistry`] maps a
//! dispatch tag to a shared program; the processor only ever looks
//! programs up, it never constructs them.

use std::collections::HashMap;
use std::sync::Arc;

use kinetic_shared::Tag;
use parking_lot::RwLock;

use crate::instruction::Instruction;

/// Compiled bytecode keyed by a dispatch tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    /// Dispatch tag.
    pub tag: Tag,
    /// Instruction stream.
    pub code: Vec<Instruction>,
    /// Every literal loaded by the program, in first-use order.
    pub constants: Vec<i32>,
    /// String pool (classes, tags, asset names, log lines).
    pub strings: Vec<String>,
    /// Author line per instruction, 0 when unknown.
    pub line_numbers: Vec<i32>,
}

impl Program {
    /// True if there is anything to execute.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.code.is_empty()
    }

    /// Number of instructions.
    #[inline]
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code.len()
    }

    /// Instruction at `pc`, `None` past the end.
    #[inline]
    #[must_use]
    pub fn instruction(&self, pc: i32) -> Option<Instruction> {
        usize::try_from(pc).ok().and_then(|i| self.code.get(i)).copied()
    }

    /// String-pool entry.
    #[inline]
    #[must_use]
    pub fn string(&self, index: i32) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.strings.get(i))
            .map(String::as_str)
    }

    /// Author line for `pc`, 0 when unknown.
    #[must_use]
    pub fn line_at(&self, pc: i32) -> i32 {
        usize::try_from(pc)
            .ok()
            .and_then(|i| self.line_numbers.get(i))
            .copied()
            .unwrap_or(0)
    }
}

/// Tag -> program map shared between content authors and the processor.
///
/// Reads take a shared lock; registration is rare.
#[derive(Debug, Default)]
pub struct ProgramRegistry {
    programs: RwLock<HashMap<Tag, Arc<Program>>>,
}

impl ProgramRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Program registered for `tag`, exact match only.
    #[must_use]
    pub fn find_program(&self, tag: &Tag) -> Option<Arc<Program>> {
        self.programs.read().get(tag).cloned()
    }

    /// Registers (or replaces) the program for its tag.
    pub fn register_program(&self, program: Program) -> Arc<Program> {
        let program = Arc::new(program);
        let previous = self
            .programs
            .write()
            .insert(program.tag.clone(), Arc::clone(&program));
        if previous.is_some() {
            tracing::debug!("[ProgramRegistry] Replaced program for {}", program.tag);
        } else {
            tracing::debug!(
                "[ProgramRegistry] Registered {} ({} instructions)",
                program.tag,
                program.code_size()
            );
        }
        program
    }

    /// True if a program exists for `tag`.
    #[must_use]
    pub fn contains(&self, tag: &Tag) -> bool {
        self.programs.read().contains_key(tag)
    }

    /// Number of registered programs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.read().len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.read().is_empty()
    }

    /// Drops every program. Running VMs keep their `Arc`.
    pub fn clear(&self) {
        self.programs.write().clear();
    }
}
