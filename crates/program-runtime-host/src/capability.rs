//! The closed set of host capabilities.

use std::sync::Arc;

use wasmtime::Linker;

use program_runtime_common::{RuntimeError, StateBatch, Storage};
use program_runtime_core::{Import, RuntimeContext, SupportedImports};

use crate::program::ProgramImport;
use crate::state::StateImport;

/// Registry name of the state capability.
pub const STATE: &str = "state";

/// Registry name of the cross-program call capability.
pub const PROGRAM: &str = "program";

/// A host capability realized for one runtime.
pub enum Capability {
    /// Per-program key/value state.
    State(StateImport),
    /// Cross-program calls.
    Program(ProgramImport),
}

impl Import for Capability {
    fn module(&self) -> &'static str {
        match self {
            Self::State(_) => StateImport::MODULE,
            Self::Program(_) => ProgramImport::MODULE,
        }
    }

    fn link(&self, linker: &mut Linker<RuntimeContext>) -> Result<(), RuntimeError> {
        match self {
            Self::State(import) => import.link(linker),
            Self::Program(import) => import.link(linker),
        }
    }

    fn commit(&self, writes: &StateBatch) -> Result<(), RuntimeError> {
        match self {
            Self::State(import) => import.commit(writes),
            Self::Program(_) => Ok(()),
        }
    }
}

/// Register the `state` and `program` capabilities, both backed by `storage`.
///
/// # Errors
///
/// Returns `InvalidConfig` if either name is already registered.
pub fn register_defaults(
    supported: &mut SupportedImports,
    storage: Arc<dyn Storage>,
) -> Result<(), RuntimeError> {
    let state_storage = Arc::clone(&storage);
    supported.register(STATE, move || {
        Capability::State(StateImport::new(Arc::clone(&state_storage)))
    })?;
    supported.register(PROGRAM, move || {
        Capability::Program(ProgramImport::new(Arc::clone(&storage)))
    })?;
    Ok(())
}
