//! Error types for the program runtime.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors surfaced by `initialize`, `call` and meter transfers
//! - [`StorageError`]: Errors from the storage collaborator

use thiserror::Error;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur during the lifecycle of a
/// program runtime, from compilation to cross-program execution. None of them
/// are swallowed inside the runtime; they surface to the immediate caller.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The bytecode is malformed or uses unsupported features.
    #[error("Compile error: {reason}")]
    CompileError {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The module could not be instantiated (missing imports, bad layout).
    #[error("Instantiation error: {reason}")]
    InstantiationError {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// A call was attempted before `initialize`.
    #[error("Runtime is not initialized")]
    NotInitialized,

    /// The requested export does not exist or is not a function.
    #[error("Function not found: {name}")]
    FunctionNotFound {
        /// Name of the missing export.
        name: String,
    },

    /// Call arguments do not match the export's signature.
    #[error("Argument mismatch calling '{function}': {reason}")]
    ArgumentMismatch {
        /// Name of the called export.
        function: String,
        /// Description of the mismatch.
        reason: String,
    },

    /// A meter could not cover a consumption or transfer.
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Units requested.
        requested: u64,
        /// Units available.
        available: u64,
    },

    /// Execution ran out of units.
    #[error("Meter exhausted: unit budget exceeded")]
    MeterExhausted,

    /// A guest-level fault aborted the call.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// The guest could not provide the requested memory.
    #[error("Out of memory: cannot allocate {requested} bytes")]
    OutOfMemory {
        /// Number of bytes requested.
        requested: usize,
    },

    /// A pointer does not address valid memory of this instance.
    #[error("Invalid pointer {offset:#x}: {reason}")]
    InvalidPointer {
        /// Offset of the offending pointer.
        offset: u32,
        /// Why the pointer was rejected.
        reason: String,
    },

    /// The runtime was stopped.
    #[error("Runtime is stopped")]
    RuntimeStopped,

    /// A cross-program call failed inside the target program.
    #[error("Cross-program call to {program}::{function} failed: {source}")]
    CrossCallFailed {
        /// Hex identity of the target program.
        program: String,
        /// Target export name.
        function: String,
        /// Underlying failure in the target.
        #[source]
        source: Box<RuntimeError>,
    },

    /// Nested cross-program calls exceeded the configured depth.
    #[error("Call depth exceeded: limit {limit}")]
    CallDepthExceeded {
        /// The configured maximum depth.
        limit: u32,
    },

    /// The execution context was cancelled.
    #[error("Execution cancelled")]
    Cancelled,

    /// Execution exceeded the configured wall-clock timeout.
    #[error("Execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// A program tried to act under an identity it does not own.
    #[error("State access denied: {reason}")]
    StateAccessDenied {
        /// Description of the violation.
        reason: String,
    },

    /// A host function received a malformed argument.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },

    /// Storage collaborator failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors from the storage collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No program is stored under the given identity.
    #[error("Program not found: {program}")]
    NotFound {
        /// Hex identity of the missing program.
        program: String,
    },

    /// The backend failed.
    #[error("Storage backend failure: {0}")]
    Backend(String),
}

impl RuntimeError {
    /// Create a new `CompileError`.
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::CompileError {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationError`.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::InstantiationError {
            reason: reason.into(),
        }
    }

    /// Create a new `FunctionNotFound` error.
    pub fn function_not_found(name: impl Into<String>) -> Self {
        Self::FunctionNotFound { name: name.into() }
    }

    /// Create a new `ArgumentMismatch` error.
    pub fn argument_mismatch(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ArgumentMismatch {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidPointer` error.
    pub fn invalid_pointer(offset: u32, reason: impl Into<String>) -> Self {
        Self::InvalidPointer {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a new `StateAccessDenied` error.
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::StateAccessDenied {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is storage `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::NotFound { .. }))
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::MeterExhausted
                | Self::InsufficientBalance { .. }
                | Self::OutOfMemory { .. }
                | Self::ExecutionTimeout { .. }
                | Self::CallDepthExceeded { .. }
        )
    }

    /// Follow `CrossCallFailed` wrappers down to the innermost cause.
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            Self::CrossCallFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
