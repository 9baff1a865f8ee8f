//! Interpreted exceptions and exception clause selection.
//!
//! An interpreted exception is any object raised by `throw` or by the engine itself for a
//! runtime fault. While it travels through interpreted frames it is carried as
//! [`crate::Error::Exception`]; each frame consults its handler table with the functions in
//! this module:
//!
//! - [`select_catch`] picks the catch clause a faulting address transfers to
//! - [`unwind_clauses`] lists the finally and fault clauses to run before that transfer, or
//!   before the exception leaves the frame
//! - [`finally_on_leave`] lists the finally clauses a `leave` runs on its way out
//!
//! All lists are ordered innermost first.

use std::fmt;

use crate::{engine::Value, metadata::method::ExceptionHandler, Result};

/// Host data of the built-in exception types.
#[derive(Debug, Clone, Default)]
pub struct ExceptionData {
    /// Message passed to the constructor
    pub message: Option<String>,
}

impl ExceptionData {
    /// Exception data carrying `message`
    pub fn new(message: impl Into<String>) -> Self {
        ExceptionData {
            message: Some(message.into()),
        }
    }
}

/// One interpreted frame of a stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTraceEntry {
    /// `Type::Method` of the frame
    pub method: String,
    /// Address of the executing instruction
    pub offset: u32,
    /// Source line from the module's symbols
    pub line: Option<u32>,
}

impl fmt::Display for StackTraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} IL_{:04}", self.method, self.offset)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// A raised interpreted exception with the stack trace captured where it was raised.
#[derive(Debug, Clone)]
pub struct ManagedException {
    exception: Value,
    stack_trace: Vec<StackTraceEntry>,
}

impl ManagedException {
    /// Wraps a raised object; the trace is filled in by the first interpreted frame it reaches
    #[must_use]
    pub fn new(exception: Value) -> Self {
        ManagedException {
            exception,
            stack_trace: Vec::new(),
        }
    }

    /// The raised object
    #[must_use]
    pub fn exception(&self) -> &Value {
        &self.exception
    }

    /// Interpreted frames from the raising frame outwards
    #[must_use]
    pub fn stack_trace(&self) -> &[StackTraceEntry] {
        &self.stack_trace
    }

    pub(crate) fn set_stack_trace(&mut self, trace: Vec<StackTraceEntry>) {
        self.stack_trace = trace;
    }

    /// Full name of the raised object's type
    #[must_use]
    pub fn type_name(&self) -> &str {
        match &self.exception {
            Value::Object(object) => object.ty().name(),
            Value::Str(_) => "System.String",
            _ => "null",
        }
    }

    /// Message of built-in exception objects
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.exception
            .as_object()
            .and_then(|object| object.with_native(|data: &ExceptionData| data.message.clone()))
            .flatten()
    }
}

impl fmt::Display for ManagedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {}", self.type_name(), message),
            None => f.write_str(self.type_name()),
        }
    }
}

/// The catch clause that handles an exception raised at `addr`.
///
/// `matches` tells for a catch clause whether it catches the exception: `Some(true)` for an
/// exact type match, `Some(false)` for a match through assignability, `None` otherwise.
/// Among all matching clauses whose protected range contains `addr` the one whose range
/// starts closest to `addr` wins, which is the innermost one for nested ranges. An exact
/// match wins over an assignable one at the same distance.
///
/// # Errors
/// Returns the errors of `matches`.
pub fn select_catch<F>(handlers: &[ExceptionHandler], addr: u32, mut matches: F) -> Result<Option<usize>>
where
    F: FnMut(&ExceptionHandler) -> Result<Option<bool>>,
{
    let mut best: Option<(usize, u32, bool)> = None;
    for (index, handler) in handlers.iter().enumerate() {
        if !handler.is_catch() || !handler.protects(addr) {
            continue;
        }
        let Some(explicit) = matches(handler)? else {
            continue;
        };
        let distance = addr - handler.try_start;
        let better = match best {
            None => true,
            Some((_, best_distance, best_explicit)) => {
                distance < best_distance || (distance == best_distance && explicit && !best_explicit)
            }
        };
        if better {
            best = Some((index, distance, explicit));
        }
    }
    Ok(best.map(|(index, _, _)| index))
}

fn innermost_first(handlers: &[ExceptionHandler], mut selected: Vec<usize>, addr: u32) -> Vec<usize> {
    selected.sort_by_key(|&i| {
        let h = &handlers[i];
        (addr - h.try_start, h.try_end - h.try_start)
    });
    selected
}

/// Finally and fault clauses an exception raised at `addr` passes on its way to `catch`, or
/// out of the method when `catch` is `None`.
#[must_use]
pub fn unwind_clauses(handlers: &[ExceptionHandler], addr: u32, catch: Option<&ExceptionHandler>) -> Vec<usize> {
    let selected = handlers
        .iter()
        .enumerate()
        .filter(|(_, h)| (h.is_finally() || h.is_fault()) && h.protects(addr))
        .filter(|(_, h)| catch.map_or(true, |c| c.encloses(h) && *h != c))
        .map(|(i, _)| i)
        .collect();
    innermost_first(handlers, selected, addr)
}

/// Finally clauses a `leave` from `addr` to `target` runs: those protecting `addr` but not
/// `target`.
#[must_use]
pub fn finally_on_leave(handlers: &[ExceptionHandler], addr: u32, target: u32) -> Vec<usize> {
    let selected = handlers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.is_finally() && h.protects(addr) && !h.protects(target))
        .map(|(i, _)| i)
        .collect();
    innermost_first(handlers, selected, addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    const EXCEPTION: Token = Token(0x0100_0001);
    const DERIVED: Token = Token(0x0100_0002);

    fn exact_or_base(handler: &ExceptionHandler) -> Result<Option<bool>> {
        Ok(match handler.catch_type {
            Some(DERIVED) => Some(true),
            Some(EXCEPTION) | None => Some(false),
            Some(_) => None,
        })
    }

    #[test]
    fn nested_catch_prefers_innermost() {
        let handlers = vec![
            ExceptionHandler::catch((0, 20), (21, 25), Some(EXCEPTION)),
            ExceptionHandler::catch((5, 10), (11, 15), Some(EXCEPTION)),
            ExceptionHandler::catch((6, 8), (9, 9), Some(Token(0x0100_0009))),
        ];
        assert_eq!(select_catch(&handlers, 7, exact_or_base).unwrap(), Some(1));
        assert_eq!(select_catch(&handlers, 2, exact_or_base).unwrap(), Some(0));
        assert_eq!(select_catch(&handlers, 30, exact_or_base).unwrap(), None);
    }

    #[test]
    fn explicit_match_breaks_ties() {
        let handlers = vec![
            ExceptionHandler::catch((0, 4), (5, 6), Some(EXCEPTION)),
            ExceptionHandler::catch((0, 4), (7, 8), Some(DERIVED)),
        ];
        assert_eq!(select_catch(&handlers, 3, exact_or_base).unwrap(), Some(1));
    }

    #[test]
    fn finally_is_never_selected_as_catch() {
        let handlers = vec![ExceptionHandler::finally((0, 4), (5, 6))];
        assert_eq!(select_catch(&handlers, 1, exact_or_base).unwrap(), None);
    }

    #[test]
    fn leave_runs_only_exited_finallies() {
        let handlers = vec![
            ExceptionHandler::finally((0, 20), (21, 22)),
            ExceptionHandler::finally((2, 10), (11, 12)),
        ];
        assert_eq!(finally_on_leave(&handlers, 5, 13), vec![1]);
        assert_eq!(finally_on_leave(&handlers, 5, 30), vec![1, 0]);
        assert!(finally_on_leave(&handlers, 5, 6).is_empty());
    }

    #[test]
    fn unwinding_stops_at_the_catch() {
        let handlers = vec![
            ExceptionHandler::catch((0, 20), (21, 25), None),
            ExceptionHandler::finally((2, 10), (11, 12)),
            ExceptionHandler::fault((3, 8), (13, 14)),
            ExceptionHandler::finally((0, 30), (31, 32)),
        ];
        assert_eq!(unwind_clauses(&handlers, 4, Some(&handlers[0])), vec![2, 1]);
        assert_eq!(unwind_clauses(&handlers, 4, None), vec![2, 1, 3]);
    }

    #[test]
    fn display() {
        let entry = StackTraceEntry {
            method: "Sample.Program::Main".to_string(),
            offset: 3,
            line: Some(12),
        };
        assert_eq!(entry.to_string(), "Sample.Program::Main IL_0003 (line 12)");

        let exception = ManagedException::new(Value::Null);
        assert_eq!(exception.to_string(), "null");
        assert!(exception.stack_trace().is_empty());
    }
}
