//! Instruction set executed by the interpreter.
//!
//! Method bodies are stored pre-decoded: one [`Instruction`] per element, with branch targets
//! expressed as instruction indices rather than byte offsets. Exception clause ranges use the
//! same addressing, so the address of an instruction is simply its position in the body.
//!
//! Operands that reference metadata carry the raw [`Token`] of the owning module. The engine
//! resolves them on first execution through the token caches, or ahead of time when a method
//! is prewarmed.
//!
//! # Key Components
//!
//! - [`Instruction`] - A single decoded operation
//! - [`FlowType`] - Control-flow classification used for validation and prewarming

use std::fmt;

use strum::IntoStaticStr;

use crate::metadata::token::Token;

/// Control-flow behavior of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Unconditional transfer to the target
    Branch,
    /// Transfer to the target or fall through
    ConditionalBranch,
    /// Leaves a protected region, running finally blocks on the way
    Leave,
    /// Invokes another method
    Call,
    /// Returns from the current method
    Return,
    /// Raises an exception
    Throw,
    /// Ends a finally block
    EndFinally,
}

/// A single pre-decoded operation.
///
/// The set covers locals and arguments, constants, arithmetic and comparison on the four
/// numeric stack kinds, calls, object and value-type construction, field, static field and
/// array element access, address-taking, casts, boxing, branches and exception control.
#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Instruction {
    /// Does nothing
    Nop,
    /// Debugger break point; suspends only when a debug service is attached
    Break,

    /// Pushes a 32-bit integer constant
    LdcI4(i32),
    /// Pushes a 64-bit integer constant
    LdcI8(i64),
    /// Pushes a 32-bit float constant
    LdcR4(f32),
    /// Pushes a 64-bit float constant
    LdcR8(f64),
    /// Pushes a null object reference
    LdNull,
    /// Pushes an interned user string
    LdStr(Token),

    /// Pushes argument `n` (argument 0 is the receiver of instance methods)
    LdArg(u16),
    /// Pushes the address of argument `n`
    LdArgA(u16),
    /// Pops into argument `n`
    StArg(u16),
    /// Pushes local `n`
    LdLoc(u16),
    /// Pushes the address of local `n`
    LdLocA(u16),
    /// Pops into local `n`
    StLoc(u16),

    /// Duplicates the top of the stack
    Dup,
    /// Discards the top of the stack
    Pop,

    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Remainder
    Rem,
    /// Arithmetic negation
    Neg,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise exclusive or
    Xor,
    /// Shift left
    Shl,
    /// Arithmetic shift right
    Shr,
    /// Pushes 1 if the two values are equal, 0 otherwise
    Ceq,
    /// Pushes 1 if the first value is greater than the second
    Cgt,
    /// Pushes 1 if the first value is less than the second
    Clt,

    /// Converts to a 32-bit integer
    ConvI4,
    /// Converts to a 64-bit integer
    ConvI8,
    /// Converts to a 32-bit float
    ConvR4,
    /// Converts to a 64-bit float
    ConvR8,

    /// Unconditional branch
    Br(u32),
    /// Branch if the value is non-zero or non-null
    BrTrue(u32),
    /// Branch if the value is zero or null
    BrFalse(u32),
    /// Branch if equal
    Beq(u32),
    /// Branch if not equal
    Bne(u32),
    /// Branch if less than
    Blt(u32),
    /// Branch if less than or equal
    Ble(u32),
    /// Branch if greater than
    Bgt(u32),
    /// Branch if greater than or equal
    Bge(u32),
    /// Leaves a protected region, emptying the stack
    Leave(u32),
    /// Ends a finally or fault block
    EndFinally,

    /// Calls a method
    Call(Token),
    /// Calls a method through virtual dispatch on the receiver
    CallVirt(Token),
    /// Allocates an object or value type and runs its constructor
    NewObj(Token),
    /// Returns from the current method
    Ret,

    /// Loads an instance field
    LdFld(Token),
    /// Loads the address of an instance field
    LdFldA(Token),
    /// Stores an instance field
    StFld(Token),
    /// Loads a static field
    LdSFld(Token),
    /// Loads the address of a static field
    LdSFldA(Token),
    /// Stores a static field
    StSFld(Token),

    /// Allocates a single dimensional array of the element type
    NewArr(Token),
    /// Pushes the length of an array
    LdLen,
    /// Loads an array element
    LdElem,
    /// Loads the address of an array element
    LdElemA(Token),
    /// Stores an array element
    StElem,

    /// Loads a value through an address
    LdObj(Token),
    /// Stores a value through an address
    StObj(Token),
    /// Resets the value at an address to its default
    InitObj(Token),

    /// Boxes a value
    Box(Token),
    /// Unboxes to a value, or casts for reference types
    UnboxAny(Token),
    /// Casts to a type, raising an invalid cast exception on failure
    CastClass(Token),
    /// Casts to a type, pushing null on failure
    IsInst(Token),

    /// Raises the object on top of the stack
    Throw,
    /// Raises the exception being handled again
    Rethrow,
}

impl Instruction {
    /// The mnemonic of this instruction
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }

    /// Control-flow behavior
    #[must_use]
    pub fn flow(&self) -> FlowType {
        match self {
            Instruction::Br(_) => FlowType::Branch,
            Instruction::BrTrue(_)
            | Instruction::BrFalse(_)
            | Instruction::Beq(_)
            | Instruction::Bne(_)
            | Instruction::Blt(_)
            | Instruction::Ble(_)
            | Instruction::Bgt(_)
            | Instruction::Bge(_) => FlowType::ConditionalBranch,
            Instruction::Leave(_) => FlowType::Leave,
            Instruction::Call(_) | Instruction::CallVirt(_) | Instruction::NewObj(_) => {
                FlowType::Call
            }
            Instruction::Ret => FlowType::Return,
            Instruction::Throw | Instruction::Rethrow => FlowType::Throw,
            Instruction::EndFinally => FlowType::EndFinally,
            _ => FlowType::Sequential,
        }
    }

    /// Branch target of branching instructions
    #[must_use]
    pub fn branch_target(&self) -> Option<u32> {
        match *self {
            Instruction::Br(t)
            | Instruction::BrTrue(t)
            | Instruction::BrFalse(t)
            | Instruction::Beq(t)
            | Instruction::Bne(t)
            | Instruction::Blt(t)
            | Instruction::Ble(t)
            | Instruction::Bgt(t)
            | Instruction::Bge(t)
            | Instruction::Leave(t) => Some(t),
            _ => None,
        }
    }

    /// Metadata token operand, if any
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match *self {
            Instruction::LdStr(t)
            | Instruction::Call(t)
            | Instruction::CallVirt(t)
            | Instruction::NewObj(t)
            | Instruction::LdFld(t)
            | Instruction::LdFldA(t)
            | Instruction::StFld(t)
            | Instruction::LdSFld(t)
            | Instruction::LdSFldA(t)
            | Instruction::StSFld(t)
            | Instruction::NewArr(t)
            | Instruction::LdElemA(t)
            | Instruction::LdObj(t)
            | Instruction::StObj(t)
            | Instruction::InitObj(t)
            | Instruction::Box(t)
            | Instruction::UnboxAny(t)
            | Instruction::CastClass(t)
            | Instruction::IsInst(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.mnemonic();
        match *self {
            Instruction::LdcI4(v) => write!(f, "{} {}", name, v),
            Instruction::LdcI8(v) => write!(f, "{} {}", name, v),
            Instruction::LdcR4(v) => write!(f, "{} {}", name, v),
            Instruction::LdcR8(v) => write!(f, "{} {}", name, v),
            Instruction::LdArg(n)
            | Instruction::LdArgA(n)
            | Instruction::StArg(n)
            | Instruction::LdLoc(n)
            | Instruction::LdLocA(n)
            | Instruction::StLoc(n) => write!(f, "{} {}", name, n),
            _ => {
                if let Some(target) = self.branch_target() {
                    write!(f, "{} IL_{:04}", name, target)
                } else if let Some(token) = self.token() {
                    write!(f, "{} {}", name, token)
                } else {
                    write!(f, "{}", name)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(Instruction::Br(3).flow(), FlowType::Branch);
        assert_eq!(Instruction::Bge(3).flow(), FlowType::ConditionalBranch);
        assert_eq!(Instruction::Leave(9).flow(), FlowType::Leave);
        assert_eq!(Instruction::NewObj(Token(0x06000001)).flow(), FlowType::Call);
        assert_eq!(Instruction::Add.flow(), FlowType::Sequential);
        assert_eq!(Instruction::Leave(9).branch_target(), Some(9));
        assert_eq!(Instruction::Add.branch_target(), None);
        assert_eq!(Instruction::LdFld(Token(0x04000002)).token(), Some(Token(0x04000002)));
    }

    #[test]
    fn display() {
        assert!(Instruction::LdcI4(7).to_string().ends_with(" 7"));
        assert_eq!(Instruction::Br(12).to_string(), "br IL_0012");
        assert_eq!(Instruction::Call(Token(0x06000001)).to_string(), "call 0x06000001");
        assert_eq!(Instruction::EndFinally.to_string(), "end_finally");
    }
}
