//! Exception clause representation for interpreted method bodies.
//!
//! Ranges are expressed in instruction indices and are inclusive on both ends, so a faulting
//! address `addr` is protected by a clause when `try_start <= addr <= try_end`.

use bitflags::bitflags;

use crate::metadata::token::Token;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed catch clause; `catch_type` names the caught type, `None` catches everything
        const EXCEPTION = 0x0000;
        /// A finally clause, runs when control leaves the protected range
        const FINALLY = 0x0002;
        /// A fault clause, runs only when an exception leaves the protected range
        const FAULT = 0x0004;
    }
}

/// One entry of a method's exception handler table.
///
/// # Layout
///
/// ```text
/// try {
///     // try_start ..= try_end
/// }
/// catch (catch_type) {
///     // handler_start ..= handler_end
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Kind of the clause
    pub flags: ExceptionHandlerFlags,
    /// First protected instruction
    pub try_start: u32,
    /// Last protected instruction
    pub try_end: u32,
    /// First instruction of the handler
    pub handler_start: u32,
    /// Last instruction of the handler
    pub handler_end: u32,
    /// Caught type (`TypeDef`, `TypeRef` or `TypeSpec` token), catch clauses only
    pub catch_type: Option<Token>,
}

impl ExceptionHandler {
    /// A catch clause; `catch_type` of `None` catches every exception
    #[must_use]
    pub fn catch(try_range: (u32, u32), handler_range: (u32, u32), catch_type: Option<Token>) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start: try_range.0,
            try_end: try_range.1,
            handler_start: handler_range.0,
            handler_end: handler_range.1,
            catch_type,
        }
    }

    /// A finally clause
    #[must_use]
    pub fn finally(try_range: (u32, u32), handler_range: (u32, u32)) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_start: try_range.0,
            try_end: try_range.1,
            handler_start: handler_range.0,
            handler_end: handler_range.1,
            catch_type: None,
        }
    }

    /// A fault clause
    #[must_use]
    pub fn fault(try_range: (u32, u32), handler_range: (u32, u32)) -> Self {
        ExceptionHandler {
            flags: ExceptionHandlerFlags::FAULT,
            ..Self::finally(try_range, handler_range)
        }
    }

    /// Returns true for typed catch clauses
    #[must_use]
    pub fn is_catch(&self) -> bool {
        self.flags == ExceptionHandlerFlags::EXCEPTION
    }

    /// Returns true for finally clauses
    #[must_use]
    pub fn is_finally(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FINALLY)
    }

    /// Returns true for fault clauses
    #[must_use]
    pub fn is_fault(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FAULT)
    }

    /// Returns true if `addr` lies inside the protected range
    #[must_use]
    pub fn protects(&self, addr: u32) -> bool {
        self.try_start <= addr && addr <= self.try_end
    }

    /// Returns true if the protected range of `other` lies within this clause's range
    #[must_use]
    pub fn encloses(&self, other: &ExceptionHandler) -> bool {
        self.try_start <= other.try_start && other.try_end <= self.try_end
    }
}
