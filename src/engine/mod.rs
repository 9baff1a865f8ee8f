//! The stack based execution engine.
//!
//! # Architecture
//!
//! - [`StackSlot`] is one evaluation stack cell; [`RuntimeStack`] is the index addressed arena
//!   of slots with its managed side table and the value-type region growing down from the top
//! - [`Value`] and [`ObjectRef`] are host side values and heap objects
//! - [`Interpreter`] executes method bodies on one stack; [`InterpreterPool`] hands out
//!   interpreters to concurrent calls
//! - [`select_catch`], [`unwind_clauses`] and [`finally_on_leave`] implement exception clause
//!   selection over a method's handler table
//! - [`NativeFrame`] is what method redirections see of a call, [`InvocationContext`] is the
//!   streaming host invocation surface
//! - [`DebugService`] and [`SuspendHandle`] are the hooks of an attached debugger
//!
//! # Value types
//!
//! Interpreted value types, and native value types with a registered binder, are stored
//! inline: a descriptor slot followed by one slot per field, allocated from the top of the
//! stack. Copies are structural; no two locations ever share a block or a managed entry.
//! Native value types without a binder are boxed with copy-on-load semantics.

mod debug;
mod exception;
mod interpreter;
mod invocation;
mod native;
mod object;
mod pool;
mod slot;
mod stack;
mod value;

pub use debug::{DebugService, SuspendHandle};
pub use exception::{
    finally_on_leave, select_catch, unwind_clauses, ExceptionData, ManagedException, StackTraceEntry,
};
pub use interpreter::Interpreter;
pub use invocation::InvocationContext;
pub use native::{FieldAccess, NativeFrame};
pub use object::{ArrayObject, HeapObject, InstanceObject, NativeObject, ObjectRef};
pub use pool::{InterpreterPool, PooledInterpreter};
pub use slot::StackSlot;
pub use stack::{FrameBounds, RuntimeStack, StackMark};
pub use value::Value;
