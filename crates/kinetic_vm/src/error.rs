//! # VM Error Types
//!
//! Build-time errors come back from [`crate::FlowBuilder::build`].
//! Interpreter faults never escape a tick: they fail the offending VM and
//! are logged.

use thiserror::Error;

/// Errors raised while building or executing a program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// A jump names a label that was never placed.
    #[error("unknown label '{0}'")]
    UnknownLabel(String),

    /// The same label was placed twice.
    #[error("duplicate label '{0}'")]
    DuplicateLabel(String),

    /// An immediate does not fit its field.
    #[error("immediate {value} does not fit in {bits} bits")]
    ImmediateOutOfRange {
        /// Offending value.
        value: i64,
        /// Field width.
        bits: u32,
    },

    /// `end_for_each` without a matching `for_each_in_radius`, or a loop
    /// left open at build time.
    #[error("unbalanced for-each loop")]
    UnbalancedForEach,

    /// Program has no instructions.
    #[error("empty program")]
    EmptyProgram,

    /// Register operand outside the register file.
    #[error("register {register} out of range at pc {pc}")]
    RegisterOutOfRange {
        /// Program counter of the instruction.
        pc: i32,
        /// Offending register index.
        register: u32,
    },

    /// Integer division or modulo by zero.
    #[error("division by zero at pc {0}")]
    DivisionByZero(i32),

    /// Opcode byte outside the instruction set.
    #[error("invalid opcode {opcode:#04x} at pc {pc}")]
    InvalidOpcode {
        /// Program counter of the instruction.
        pc: i32,
        /// Raw opcode byte.
        opcode: u8,
    },

    /// String-pool index outside the program's pool.
    #[error("string index {index} out of range at pc {pc}")]
    InvalidString {
        /// Program counter of the instruction.
        pc: i32,
        /// Offending index.
        index: i32,
    },

    /// Program counter went negative.
    #[error("invalid program counter {0}")]
    InvalidProgramCounter(i32),
}

/// Result type for VM operations.
pub type VmResult<T> = Result<T, VmError>;
