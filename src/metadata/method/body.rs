use crate::{
    assembly::{FlowType, Instruction},
    metadata::{method::ExceptionHandler, signatures::TypeSig},
    Result,
};

/// The executable part of an interpreted method.
///
/// Local variable types are kept as signatures; the engine resolves them in the generic
/// context of the concrete method instance the first time that instance runs.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// Declared local variable types
    pub locals: Vec<TypeSig>,
    /// Decoded instructions, addressed by index
    pub code: Vec<Instruction>,
    /// Exception handler table, in declaration order
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Creates a body from its instructions
    #[must_use]
    pub fn new(code: Vec<Instruction>) -> Self {
        MethodBody {
            locals: Vec::new(),
            code,
            exception_handlers: Vec::new(),
        }
    }

    /// Sets the local variable types
    #[must_use]
    pub fn with_locals(mut self, locals: Vec<TypeSig>) -> Self {
        self.locals = locals;
        self
    }

    /// Appends an exception handler
    #[must_use]
    pub fn with_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exception_handlers.push(handler);
        self
    }

    /// Number of instructions
    #[must_use]
    pub fn size(&self) -> usize {
        self.code.len()
    }

    /// Checks that every branch target and handler range addresses an instruction of the body
    /// and that the last instruction does not fall through.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let len = self.code.len() as u32;
        let Some(last) = self.code.last() else {
            return Err(malformed_error!("Method body is empty"));
        };

        for (addr, instruction) in self.code.iter().enumerate() {
            if let Some(target) = instruction.branch_target() {
                if target >= len {
                    return Err(malformed_error!(
                        "IL_{:04}: branch target IL_{:04} outside of body",
                        addr,
                        target
                    ));
                }
            }
        }

        for handler in &self.exception_handlers {
            if handler.try_start > handler.try_end
                || handler.handler_start > handler.handler_end
                || handler.try_end >= len
                || handler.handler_end >= len
            {
                return Err(malformed_error!(
                    "Exception handler {:?} outside of body",
                    handler
                ));
            }
        }

        match last.flow() {
            FlowType::Branch | FlowType::Return | FlowType::Throw | FlowType::Leave | FlowType::EndFinally => Ok(()),
            _ => Err(malformed_error!("Last instruction {} falls through", last)),
        }
    }
}
