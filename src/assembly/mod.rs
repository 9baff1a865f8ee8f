//! Bytecode consumed by the execution engine.
//!
//! Modules hand the engine method bodies that are already decoded into [`Instruction`]s; this
//! module only defines that representation and its control-flow classification.

mod instruction;

pub use instruction::{FlowType, Instruction};
