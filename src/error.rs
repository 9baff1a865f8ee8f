use thiserror::Error;

use crate::{engine::ManagedException, metadata::token::Token};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants split into three groups: resolution failures raised by the type registry and
/// the token caches, invocation failures raised by the host surface before or while a call runs,
/// and configuration failures raised while the binding tables are populated. Interpreted-level
/// exceptions that escape the outermost frame arrive as [`Error::Exception`].
///
/// # Error Categories
///
/// ## Resolution Errors
/// - [`Error::TypeNotFound`] - A type name could not be resolved in any scope
/// - [`Error::MethodNotFound`] - A method reference did not match any method
/// - [`Error::FieldNotFound`] - A field reference did not match any field
/// - [`Error::UnsupportedReferenceShape`] - The reference shape is not implemented
/// - [`Error::GenericArityMismatch`] - Wrong number of generic arguments
/// - [`Error::InvalidToken`] - A token does not address a row of its module
///
/// ## Invocation Errors
/// - [`Error::ArgumentCountMismatch`] - Wrong number of arguments supplied
/// - [`Error::ArgumentTypeMismatch`] - An argument does not fit its parameter
/// - [`Error::NullReceiver`] - Instance method invoked without a receiver
/// - [`Error::DomainDropped`] - A weak domain handle outlived its domain
/// - [`Error::InvalidCast`] - Value-type copy across incompatible descriptors
/// - [`Error::Exception`] - Unhandled interpreted exception
/// - [`Error::StackOverflow`] / [`Error::CallDepthExceeded`] - Resource limits hit
///
/// ## Configuration Errors
/// - [`Error::AdaptorAlreadyRegistered`] - A base type already has an adaptor
/// - [`Error::BindingsFrozen`] - Registration after the binding phase completed
/// - [`Error::DuplicateType`] - Two modules define the same full name
///
/// # Examples
///
/// ```rust,ignore
/// use dotrun::{Domain, Error};
///
/// match domain.invoke_by_name("Sample.Program", "Main", None, &[]) {
///     Ok(result) => println!("returned {:?}", result),
///     Err(Error::Exception(exception)) => {
///         eprintln!("unhandled exception: {}", exception);
///         for frame in exception.stack_trace() {
///             eprintln!("    at {}", frame);
///         }
///     }
///     Err(e) => eprintln!("invocation failed: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The bytecode of a method body is ill-formed.
    ///
    /// Raised when the engine meets an instruction stream it cannot execute, such as a branch
    /// outside the method body or an operand token of the wrong table. The error includes the
    /// source location where the malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Failed to find a type by name.
    ///
    /// Raised when neither the interpreted modules nor any native module known to the host
    /// defines the requested name. The attempted (canonical) name is carried along. This is
    /// fatal to the resolution chain that requested it.
    #[error("Cannot find type - {0}")]
    TypeNotFound(String),

    /// Failed to find a method matching a reference.
    ///
    /// # Fields
    ///
    /// * `method` - Name of the method that was searched
    /// * `declaring_type` - Full name of the type that was searched
    /// * `token` - The metadata token of the reference, when resolution started from one
    #[error("Cannot find method: {method} in type: {declaring_type}, token={token:?}")]
    MethodNotFound {
        /// Name of the method
        method: String,
        /// Full name of the declaring type
        declaring_type: String,
        /// Token the lookup started from
        token: Option<Token>,
    },

    /// Failed to find a field matching a reference.
    #[error("Cannot find field: {field} in type: {declaring_type}")]
    FieldNotFound {
        /// Name of the field
        field: String,
        /// Full name of the declaring type
        declaring_type: String,
    },

    /// The number of supplied arguments does not match the declared parameters.
    ///
    /// Always raised before anything was pushed to an evaluation stack.
    #[error("Parameter mismatch - expected {expected} arguments, found {found}")]
    ArgumentCountMismatch {
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        found: usize,
    },

    /// An argument is not an instance of the declared parameter type.
    #[error("Parameter type mismatch - argument {index} is not a {expected}")]
    ArgumentTypeMismatch {
        /// Zero based argument position
        index: usize,
        /// Full name of the declared parameter type
        expected: String,
    },

    /// A value type was copied into storage of an incompatible value type.
    #[error("Invalid cast from {from} to {to}")]
    InvalidCast {
        /// Source type name
        from: String,
        /// Destination type name
        to: String,
    },

    /// The resolver met a metadata reference shape it does not implement.
    ///
    /// Unmanaged pointers and function pointers fall into this category.
    #[error("Unsupported reference shape - {0}")]
    UnsupportedReferenceShape(String),

    /// An instance method was invoked without a receiver.
    #[error("Instance method {0} invoked without a receiver")]
    NullReceiver(String),

    /// A call went through a weak domain handle after the domain was dropped.
    #[error("The domain was dropped")]
    DomainDropped,

    /// An interpreted exception found no handler anywhere in the call chain.
    ///
    /// Carries the raised object together with the interpreted stack trace captured at the
    /// point of raise. Native code may also return this variant to throw into interpreted code.
    #[error("{0}")]
    Exception(Box<ManagedException>),

    /// Two loaded modules define a type with the same full name.
    #[error("Type {0} is already defined")]
    DuplicateType(String),

    /// A generic definition was instantiated with the wrong number of arguments.
    #[error("Generic type {type_name} expects {expected} arguments, found {found}")]
    GenericArityMismatch {
        /// Full name of the generic definition
        type_name: String,
        /// Declared generic parameter count
        expected: usize,
        /// Supplied argument count
        found: usize,
    },

    /// A cross-domain adaptor is already registered for this native base type.
    ///
    /// Raised immediately at registration, never deferred to first use.
    #[error("Adaptor for base type {0} is already added")]
    AdaptorAlreadyRegistered(String),

    /// The binding tables are frozen and no longer accept registrations.
    #[error("Binding tables are frozen")]
    BindingsFrozen,

    /// The background thread populating the binding tables could not be started or panicked.
    #[error("Binding thread failed - {0}")]
    BindingThread(String),

    /// A native method without a redirection was called while reflection calls are disabled.
    #[error("Native method {0} has no binding and unbound calls are disabled")]
    UnboundNativeMethod(String),

    /// An interpreted method has no body to execute.
    #[error("Method {0} has no body")]
    MissingMethodBody(String),

    /// A metadata token does not address a row in its module.
    #[error("Invalid token - {0}")]
    InvalidToken(Token),

    /// The evaluation stack ran into the value-type region.
    #[error("Evaluation stack overflow")]
    StackOverflow,

    /// The maximum number of nested interpreted frames was reached.
    #[error("Call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    /// The evaluation stack does not hold what the current instruction needs.
    #[error("Invalid stack state - {0}")]
    InvalidStackState(String),

    /// Failed to lock target.
    ///
    /// Raised when a mutex or rwlock guarding shared state was poisoned by a panicking thread.
    #[error("Failed to lock target")]
    LockError,
}
