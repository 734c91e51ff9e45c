//! Host import registry.
//!
//! Imports are named bundles of host functions. A [`SupportedImports`]
//! registry maps each name to a factory; its [`Imports`] snapshot is handed to
//! every runtime, which realizes one fresh import per factory when it is
//! initialized.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use wasmtime::Linker;

use program_runtime_common::{RuntimeError, StateBatch};

use crate::store::RuntimeContext;

/// A bundle of host functions exposed to guest code.
pub trait Import: Send + Sync {
    /// Guest module name the bundle links under.
    fn module(&self) -> &'static str;

    /// Define the bundle's functions on a runtime's linker.
    fn link(&self, linker: &mut Linker<RuntimeContext>) -> Result<(), RuntimeError>;

    /// Persist the writes of a successful top-level call.
    ///
    /// Only imports that own persistent state need to implement this.
    fn commit(&self, _writes: &StateBatch) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Produces a fresh import for each runtime.
pub type ImportFactory = Arc<dyn Fn() -> Box<dyn Import> + Send + Sync>;

/// Registry of import factories.
///
/// Populate it before constructing any runtime.
#[derive(Default)]
pub struct SupportedImports {
    factories: BTreeMap<String, ImportFactory>,
}

impl SupportedImports {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`.
    ///
    /// Fails with `InvalidConfig` if the name is already taken.
    pub fn register<F, I>(&mut self, name: impl Into<String>, factory: F) -> Result<(), RuntimeError>
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Import + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RuntimeError::invalid_config(format!(
                "import '{name}' is already registered"
            )));
        }

        let factory: ImportFactory = Arc::new(move || Box::new(factory()) as Box<dyn Import>);
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Snapshot the registry for runtime construction.
    pub fn imports(&self) -> Imports {
        Imports {
            factories: Arc::new(self.factories.clone()),
        }
    }
}

/// Immutable snapshot of registered imports.
///
/// Cloning is cheap. Nested runtimes created by cross-program calls reuse the
/// snapshot of the runtime that spawned them.
#[derive(Clone, Default)]
pub struct Imports {
    factories: Arc<BTreeMap<String, ImportFactory>>,
}

impl Imports {
    /// Realize one fresh import per registered factory, in name order.
    pub fn realize(&self) -> Vec<(String, Box<dyn Import>)> {
        self.factories
            .iter()
            .map(|(name, factory)| (name.clone(), factory()))
            .collect()
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Number of registered imports.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for Imports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
