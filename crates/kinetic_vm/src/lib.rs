//! # KINETIC VM
//!
//! Gameplay reactions as bytecode. Content authors describe a flow with
//! the [`FlowBuilder`], register it under a tag, and the [`VmProcessor`]
//! runs one instance per matching event:
//!
//! ```text
//! IntentEvent / SystemEvent ── tag ──> ProgramRegistry ──> VmRuntime
//!                                                           │
//!                          LocalContext (buffered) <────────┘
//!                                  │ commit at termination
//!                                  ▼
//!                             EntityStore
//! ```
//!
//! ## Architecture Rules
//!
//! 1. **Buffered effects** - property writes land when the VM terminates
//! 2. **Cooperative** - yields and waits are states, never blocking calls
//! 3. **Deterministic** - runtimes execute in creation order
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kinetic_vm::{reg, FlowBuilder, Interpreter, ProgramRegistry, VmProcessor};
//! use kinetic_shared::prop;
//!
//! let registry = Arc::new(ProgramRegistry::new());
//! FlowBuilder::new("Test.SetHealth")
//!     .load_const(reg::R0, 77)
//!     .save_entity_property(reg::SELF, prop::HEALTH, reg::R0)
//!     .halt()
//!     .build_and_register(&registry)?;
//!
//! let mut vm = VmProcessor::new(registry, 256, Interpreter::default());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod builder;
pub mod cue;
pub mod error;
pub mod instruction;
pub mod interpreter;
pub mod processor;
pub mod program;
pub mod runtime;

pub use builder::FlowBuilder;
pub use cue::{CueKind, PresentationCue};
pub use error::{VmError, VmResult};
pub use instruction::{
    reg, EventWait, Instruction, OpCode, PendingEvent, RegisterIndex, VmStatus, WaitType,
};
pub use interpreter::{Interpreter, DEFAULT_MAX_INSTRUCTIONS_PER_SLICE};
pub use processor::{IntentSender, ProcessorStats, VmProcessor, DEFAULT_VM_POOL_SIZE};
pub use program::{Program, ProgramRegistry};
pub use runtime::{RuntimePool, SpatialQuery, VmHandle, VmRuntime};
