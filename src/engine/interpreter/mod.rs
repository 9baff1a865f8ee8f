//! Core bytecode interpreter.
//!
//! An [`Interpreter`] owns one [`RuntimeStack`] and executes interpreted method bodies on it,
//! one instruction at a time. Nested interpreted calls recurse into [`Interpreter::run`] on
//! the same stack; each call gets its own frame:
//!
//! ```text
//! arg_base    arguments (receiver first)
//! local_base  declared locals
//! eval_base   evaluation stack of the frame
//! ```
//!
//! Inline value-type blocks of the locals are allocated from the top of the stack when the
//! frame starts and are released en masse when it ends, together with every managed entry
//! the frame created.
//!
//! Interpreted exceptions travel as [`crate::Error::Exception`]. When one reaches a frame,
//! the frame's handler table decides whether control moves to a catch clause, after running
//! the finally and fault clauses in between, or leaves the frame.

mod calls;
mod dispatch;
mod ops;
mod values;

pub(crate) use values::Carry;

use crate::{
    domain::Domain,
    engine::{
        exception::{finally_on_leave, select_catch, unwind_clauses},
        ExceptionData, ManagedException, NativeObject, ObjectRef, RuntimeStack, StackSlot,
        StackTraceEntry, SuspendHandle, Value,
    },
    metadata::{
        method::{ExceptionHandler, MethodBody, MethodRc},
        module::ModuleId,
        typesystem::{GenericContext, Primitive, TypeRc},
    },
    Error, Result,
};

/// Outcome of one instruction
pub(crate) enum StepResult {
    /// Continue with the next instruction
    Continue,
    /// Continue at `target`
    Branch { target: usize },
    /// Leave the method
    Return { value: Option<Carry> },
}

/// What happens once the pending finally and fault clauses have run.
enum Resume {
    Leave(usize),
    Catch {
        handler: usize,
        exception: Box<ManagedException>,
    },
    Propagate(Box<ManagedException>),
}

/// Finally and fault clauses still to run, innermost first.
struct Unwind {
    clauses: Vec<usize>,
    next: usize,
    resume: Resume,
}

/// Per-call state of an executing interpreted method.
pub(crate) struct Frame<'m> {
    method: &'m MethodRc,
    body: &'m MethodBody,
    module_id: ModuleId,
    arg_base: usize,
    arg_count: usize,
    local_base: usize,
    local_count: usize,
    eval_base: usize,
    unwinds: Vec<Unwind>,
    /// Exceptions of the catch clauses currently executing, with the clause index
    caught: Vec<(usize, Box<ManagedException>)>,
}

impl Frame<'_> {
    fn handlers(&self) -> &[ExceptionHandler] {
        &self.body.exception_handlers
    }

    fn context(&self) -> GenericContext<'_> {
        GenericContext {
            ty: Some(&self.method.declaring),
            method_args: &self.method.generic_args,
        }
    }
}

fn in_handler(handler: &ExceptionHandler, addr: u32) -> bool {
    (handler.handler_start..=handler.handler_end).contains(&addr)
}

struct FrameInfo {
    method: MethodRc,
    ip: u32,
}

/// One bytecode interpreter: an evaluation stack, its managed table and the interpreted call
/// chain running on it.
///
/// Interpreters are pooled by the domain and never shared between two concurrent calls.
pub struct Interpreter {
    id: u64,
    stack: RuntimeStack,
    frames: Vec<FrameInfo>,
    suspend: SuspendHandle,
}

impl Interpreter {
    /// Creates an interpreter with a stack of `stack_capacity` slots
    #[must_use]
    pub fn new(id: u64, stack_capacity: usize) -> Self {
        Interpreter {
            id,
            stack: RuntimeStack::new(stack_capacity),
            frames: Vec::new(),
            suspend: SuspendHandle::new(),
        }
    }

    /// Pool-wide identity
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The evaluation stack
    #[must_use]
    pub fn stack(&self) -> &RuntimeStack {
        &self.stack
    }

    pub(crate) fn stack_mut(&mut self) -> &mut RuntimeStack {
        &mut self.stack
    }

    /// Handle a debugger uses to suspend and resume this interpreter
    #[must_use]
    pub fn suspend_handle(&self) -> &SuspendHandle {
        &self.suspend
    }

    /// Number of interpreted frames currently executing
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Empties the stack for reuse
    pub fn clear(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }

    /// The interpreted call chain, innermost frame first
    #[must_use]
    pub fn stack_trace(&self) -> Vec<StackTraceEntry> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let line = frame.method.interpreted().and_then(|(module, _, token)| {
                    module.symbols().and_then(|symbols| symbols.line_for(token, frame.ip))
                });
                StackTraceEntry {
                    method: frame.method.full_name(),
                    offset: frame.ip,
                    line,
                }
            })
            .collect()
    }

    /// An interpreted exception of the built-in type `type_name`
    pub(crate) fn fault(&self, domain: &Domain, type_name: &str, message: impl Into<String>) -> Error {
        match domain.registry().corlib(type_name) {
            Ok(ty) => {
                let object = NativeObject::new(ty, Box::new(ExceptionData::new(message)));
                Error::Exception(Box::new(ManagedException::new(Value::Object(ObjectRef::native(object)))))
            }
            Err(error) => error,
        }
    }

    /// The runtime type of a host value; `None` for null
    pub(crate) fn type_of_value(&self, domain: &Domain, value: &Value) -> Result<Option<TypeRc>> {
        let registry = domain.registry();
        Ok(Some(match value {
            Value::Null => return Ok(None),
            Value::Bool(_) => registry.primitive(Primitive::Boolean)?,
            Value::I32(_) => registry.primitive(Primitive::Int32)?,
            Value::I64(_) => registry.primitive(Primitive::Int64)?,
            Value::F32(_) => registry.primitive(Primitive::Single)?,
            Value::F64(_) => registry.primitive(Primitive::Double)?,
            Value::Str(_) => registry.corlib(crate::metadata::typesystem::corlib::STRING)?,
            Value::Object(object) => object.ty().clone(),
        }))
    }

    /// Executes the interpreted method whose arguments occupy the stack from `arg_base` up.
    ///
    /// On return, successful or not, the stack is back at `arg_base` and everything the call
    /// allocated is released. The returned carry never refers to stack storage.
    ///
    /// # Errors
    /// Returns [`Error::CallDepthExceeded`] when the interpreted call chain is too deep,
    /// unhandled interpreted exceptions, and the errors of the executed instructions.
    pub(crate) fn run(&mut self, domain: &Domain, method: &MethodRc, arg_base: usize) -> Result<Option<Carry>> {
        let max_depth = domain.config().max_call_depth;
        if self.frames.len() >= max_depth {
            return Err(Error::CallDepthExceeded(max_depth));
        }
        let body = method
            .body()
            .cloned()
            .ok_or_else(|| Error::MissingMethodBody(method.full_name()))?;
        let (_, module_id, _) = method
            .interpreted()
            .ok_or_else(|| Error::MissingMethodBody(method.full_name()))?;

        let mark = self.stack.mark();
        let bounds = self.stack.enter_frame();
        self.frames.push(FrameInfo {
            method: method.clone(),
            ip: 0,
        });
        let result = self.execute(domain, method, &body, module_id, arg_base);
        self.frames.pop();
        self.stack.leave_frame(bounds);
        self.stack.reset(&mark);
        let popped = self.stack.pop_to(arg_base);
        let value = result?;
        popped?;
        Ok(value)
    }

    fn execute(
        &mut self,
        domain: &Domain,
        method: &MethodRc,
        body: &MethodBody,
        module_id: ModuleId,
        arg_base: usize,
    ) -> Result<Option<Carry>> {
        let arg_count = method.arg_count();
        if self.stack.esp() != arg_base + arg_count {
            return Err(Error::InvalidStackState(format!(
                "{} expects {} argument slots, found {}",
                method.full_name(),
                arg_count,
                self.stack.esp().saturating_sub(arg_base)
            )));
        }

        // references to arguments must never see an entry allocated by a callee
        let receiver = usize::from(method.has_this());
        for (i, ty) in method.params.iter().enumerate() {
            let addr = arg_base + receiver + i;
            if ty.primitive().is_none() && self.stack.get(addr)? == StackSlot::Null {
                let index = self.stack.push_managed(Value::Null)?;
                self.stack.set(addr, StackSlot::Object(index))?;
            }
        }

        let locals = domain.registry().method_locals(method)?;
        let local_base = self.stack.esp();
        for ty in locals.iter() {
            let slot = self.default_slot(domain, ty)?;
            self.stack.push(slot)?;
        }
        self.stack.seal_locals();

        let mut frame = Frame {
            method,
            body,
            module_id,
            arg_base,
            arg_count,
            local_base,
            local_count: locals.len(),
            eval_base: self.stack.esp(),
            unwinds: Vec::new(),
            caught: Vec::new(),
        };

        let mut ip = 0usize;
        loop {
            let Some(instruction) = body.code.get(ip) else {
                return Err(malformed_error!(
                    "{} runs past the end of its body at {}",
                    method.full_name(),
                    ip
                ));
            };
            if let Some(info) = self.frames.last_mut() {
                info.ip = ip as u32;
            }
            match self.step(domain, &mut frame, ip, instruction) {
                Ok(StepResult::Continue) => ip += 1,
                Ok(StepResult::Branch { target }) => ip = target,
                Ok(StepResult::Return { value }) => return Ok(value),
                Err(Error::Exception(exception)) => {
                    ip = self.handle_exception(domain, &mut frame, ip, exception)?;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Routes an exception raised at `addr` to a catch clause of the frame, or out of it.
    ///
    /// Returns the address execution continues at.
    fn handle_exception(
        &mut self,
        domain: &Domain,
        frame: &mut Frame<'_>,
        addr: usize,
        mut exception: Box<ManagedException>,
    ) -> Result<usize> {
        if exception.stack_trace().is_empty() {
            exception.set_stack_trace(self.stack_trace());
        }
        let addr = addr as u32;
        let catch = select_catch(frame.handlers(), addr, |handler| {
            self.catch_matches(domain, frame, handler, exception.exception())
        })?;

        // finally and fault clauses that raised this exception are abandoned
        while let Some(unwind) = frame.unwinds.last() {
            let Some(&active) = unwind.clauses.get(unwind.next) else {
                break;
            };
            let running = &frame.handlers()[active];
            let caught_inside = catch.is_some_and(|c| in_handler(running, frame.handlers()[c].try_start));
            if in_handler(running, addr) && !caught_inside {
                frame.unwinds.pop();
            } else {
                break;
            }
        }

        let clauses = unwind_clauses(frame.handlers(), addr, catch.map(|c| &frame.handlers()[c]));
        let resume = match catch {
            Some(handler) => Resume::Catch { handler, exception },
            None => Resume::Propagate(exception),
        };
        self.stack.pop_to(frame.eval_base)?;
        self.unwind(frame, clauses, resume)
    }

    fn catch_matches(
        &self,
        domain: &Domain,
        frame: &Frame<'_>,
        handler: &ExceptionHandler,
        exception: &Value,
    ) -> Result<Option<bool>> {
        let Some(token) = handler.catch_type else {
            return Ok(Some(false));
        };
        let registry = domain.registry();
        let catch_type = registry.resolve_type_token(frame.module_id, token, frame.context())?;
        let Some(thrown) = self.type_of_value(domain, exception)? else {
            return Ok(None);
        };
        if thrown.index() == catch_type.index() {
            Ok(Some(true))
        } else if registry.is_assignable(&thrown, &catch_type)? {
            Ok(Some(false))
        } else {
            Ok(None)
        }
    }

    /// Runs `clauses` and then resumes; returns the address execution continues at
    fn unwind(&mut self, frame: &mut Frame<'_>, clauses: Vec<usize>, resume: Resume) -> Result<usize> {
        match clauses.first() {
            Some(&first) => {
                let start = frame.handlers()[first].handler_start as usize;
                frame.unwinds.push(Unwind {
                    clauses,
                    next: 0,
                    resume,
                });
                Ok(start)
            }
            None => self.resume(frame, resume),
        }
    }

    fn resume(&mut self, frame: &mut Frame<'_>, resume: Resume) -> Result<usize> {
        match resume {
            Resume::Leave(target) => Ok(target),
            Resume::Catch { handler, exception } => {
                self.stack.pop_to(frame.eval_base)?;
                self.stack.push_object(exception.exception().clone())?;
                frame.caught.push((handler, exception));
                Ok(frame.handlers()[handler].handler_start as usize)
            }
            Resume::Propagate(exception) => Err(Error::Exception(exception)),
        }
    }

    /// `leave`: empties the evaluation stack and exits protected regions through their
    /// finally clauses
    fn leave(&mut self, frame: &mut Frame<'_>, addr: usize, target: usize) -> Result<usize> {
        self.stack.pop_to(frame.eval_base)?;
        let (from, to) = (addr as u32, target as u32);
        let handlers = frame.handlers();
        let clauses = finally_on_leave(handlers, from, to);
        let kept: Vec<bool> = frame
            .caught
            .iter()
            .map(|(h, _)| !in_handler(&handlers[*h], from) || in_handler(&handlers[*h], to))
            .collect();
        let mut keep = kept.into_iter();
        frame.caught.retain(|_| keep.next().unwrap_or(true));
        self.unwind(frame, clauses, Resume::Leave(target))
    }

    /// `endfinally`: continues with the next pending clause or completes the unwinding
    fn end_finally(&mut self, frame: &mut Frame<'_>) -> Result<usize> {
        let Some(unwind) = frame.unwinds.last_mut() else {
            return Err(malformed_error!(
                "endfinally outside of a finally or fault clause in {}",
                frame.method.full_name()
            ));
        };
        unwind.next += 1;
        if let Some(&next) = unwind.clauses.get(unwind.next) {
            self.stack.pop_to(frame.eval_base)?;
            return Ok(frame.handlers()[next].handler_start as usize);
        }
        match frame.unwinds.pop() {
            Some(unwind) => self.resume(frame, unwind.resume),
            None => Err(malformed_error!("unbalanced endfinally")),
        }
    }

    /// `rethrow`: the exception of the innermost catch clause containing `addr`
    fn rethrow(&self, frame: &Frame<'_>, addr: usize) -> Error {
        let addr = addr as u32;
        frame
            .caught
            .iter()
            .rev()
            .find(|(h, _)| in_handler(&frame.handlers()[*h], addr))
            .map_or_else(
                || malformed_error!("rethrow outside of a catch clause"),
                |(_, exception)| Error::Exception(exception.clone()),
            )
    }

    /// `break`: blocks until the attached debugger resumes this interpreter
    fn breakpoint(&self, domain: &Domain) -> Result<()> {
        let Some(debug) = domain.debug() else {
            return Ok(());
        };
        self.suspend.suspend()?;
        debug.breakpoint_hit(self.id, &self.stack_trace(), &self.suspend);
        self.suspend.wait()
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("id", &self.id)
            .field("depth", &self.frames.len())
            .field("stack", &self.stack)
            .finish()
    }
}
