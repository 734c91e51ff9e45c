//! Storage collaborator interface.
//!
//! The runtime only reads program bytecode and reads/writes program state
//! through the [`Storage`] trait. [`MemoryStorage`] is the in-process
//! implementation used by tests and the CLI.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::{ProgramId, StorageError};

/// Key of a state entry, namespaced by the owning program.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    /// Program that owns the entry.
    pub program: ProgramId,
    /// Program-chosen key bytes.
    pub key: Vec<u8>,
}

impl StateKey {
    /// Create a namespaced key.
    pub fn new(program: ProgramId, key: impl Into<Vec<u8>>) -> Self {
        Self {
            program,
            key: key.into(),
        }
    }
}

/// An ordered set of pending state writes.
///
/// `None` values are deletions. Iteration follows key order, so applying a
/// batch is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateBatch {
    writes: BTreeMap<StateKey, Option<Vec<u8>>>,
}

impl StateBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write.
    pub fn put(&mut self, key: StateKey, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    /// Record a deletion.
    pub fn delete(&mut self, key: StateKey) {
        self.writes.insert(key, None);
    }

    /// Look up a pending write.
    ///
    /// Returns `None` if the batch does not touch the key, `Some(None)` if it
    /// deletes it.
    pub fn get(&self, key: &StateKey) -> Option<Option<&[u8]>> {
        self.writes.get(key).map(Option::as_deref)
    }

    /// Number of touched keys.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns `true` if the batch touches nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Iterate over pending writes in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, StateKey, Option<Vec<u8>>> {
        self.writes.iter()
    }
}

impl IntoIterator for StateBatch {
    type Item = (StateKey, Option<Vec<u8>>);
    type IntoIter = btree_map::IntoIter<StateKey, Option<Vec<u8>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

/// Persistent program and state storage.
///
/// Implementations must be safe under concurrent access from independent
/// runtimes; each owns its own locking discipline.
pub trait Storage: Send + Sync {
    /// Store program bytecode under `id`.
    fn set_program(&self, id: ProgramId, bytecode: Vec<u8>) -> Result<(), StorageError>;

    /// Fetch program bytecode. Fails with [`StorageError::NotFound`] if absent.
    fn get_program(&self, id: &ProgramId) -> Result<Arc<[u8]>, StorageError>;

    /// Read a state entry.
    fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a state entry.
    fn put_state(&self, key: StateKey, value: Vec<u8>) -> Result<(), StorageError>;

    /// Delete a state entry, returning whether it existed.
    fn delete_state(&self, key: &StateKey) -> Result<bool, StorageError>;

    /// Apply a batch of writes.
    ///
    /// The default applies entries one at a time in key order; backends with
    /// transactions should override it to apply atomically.
    fn apply(&self, batch: StateBatch) -> Result<(), StorageError> {
        for (key, value) in batch {
            match value {
                Some(value) => self.put_state(key, value)?,
                None => {
                    self.delete_state(&key)?;
                }
            }
        }
        Ok(())
    }
}

/// In-memory [`Storage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    programs: DashMap<ProgramId, Arc<[u8]>>,
    state: RwLock<BTreeMap<StateKey, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored programs.
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Number of stored state entries.
    pub fn state_len(&self) -> usize {
        self.state.read().len()
    }
}

impl Storage for MemoryStorage {
    fn set_program(&self, id: ProgramId, bytecode: Vec<u8>) -> Result<(), StorageError> {
        debug!(program_id = %id, bytes_len = bytecode.len(), "Program stored");
        self.programs.insert(id, bytecode.into());
        Ok(())
    }

    fn get_program(&self, id: &ProgramId) -> Result<Arc<[u8]>, StorageError> {
        self.programs
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::NotFound {
                program: id.to_hex(),
            })
    }

    fn get_state(&self, key: &StateKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.state.read().get(key).cloned())
    }

    fn put_state(&self, key: StateKey, value: Vec<u8>) -> Result<(), StorageError> {
        self.state.write().insert(key, value);
        Ok(())
    }

    fn delete_state(&self, key: &StateKey) -> Result<bool, StorageError> {
        Ok(self.state.write().remove(key).is_some())
    }

    fn apply(&self, batch: StateBatch) -> Result<(), StorageError> {
        let mut state = self.state.write();
        for (key, value) in batch {
            match value {
                Some(value) => {
                    state.insert(key, value);
                }
                None => {
                    state.remove(&key);
                }
            }
        }
        Ok(())
    }
}
