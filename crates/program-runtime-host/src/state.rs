//! `state` import: per-program key/value storage.
//!
//! Guest functions (offsets and lengths are `i64`):
//!
//! | Function                                          | Returns                 |
//! |---------------------------------------------------|-------------------------|
//! | `put(program, key, key_len, value, value_len)`    | `0`                     |
//! | `get_len(program, key, key_len)`                  | value length or `-1`    |
//! | `get(program, key, key_len, out, out_len)`        | bytes copied or `-1`    |
//! | `delete(program, key, key_len)`                   | `1` if a value existed  |
//!
//! `program` points at the caller's 32-byte id, which must be the identity of
//! the executing runtime. Keys are namespaced by that id. Writes go to the
//! call's journal; reads see the journal first, then storage.

use std::sync::Arc;

use tracing::debug;
use wasmtime::{Caller, Linker};

use program_runtime_common::{RuntimeError, StateBatch, StateKey, Storage};
use program_runtime_core::{
    RuntimeContext, enter_host_call, read_guest_bytes, write_guest_bytes,
};

use crate::guest::{byte_len, verify_identity};

/// Host side of the `state` import.
pub struct StateImport {
    storage: Arc<dyn Storage>,
}

impl StateImport {
    /// Guest module name.
    pub const MODULE: &'static str = "state";

    /// Create an import backed by `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Define `state.*` on `linker`.
    pub fn link(&self, linker: &mut Linker<RuntimeContext>) -> Result<(), RuntimeError> {
        linker
            .func_wrap(
                Self::MODULE,
                "put",
                |mut caller: Caller<'_, RuntimeContext>,
                 program: i64,
                 key_ptr: i64,
                 key_len: i64,
                 value_ptr: i64,
                 value_len: i64|
                 -> wasmtime::Result<i32> {
                    enter_host_call(&mut caller, byte_len(key_len) + byte_len(value_len))?;
                    let key = state_key(&mut caller, program, key_ptr, key_len)?;
                    let value = read_guest_bytes(&mut caller, value_ptr, value_len)?;

                    debug!(program_id = %key.program, value_len = value.len(), "state.put");
                    caller.data_mut().journal_mut().put(key, value);
                    Ok(0)
                },
            )
            .map_err(|e| define_failed("put", &e))?;

        let storage = Arc::clone(&self.storage);
        linker
            .func_wrap(
                Self::MODULE,
                "get_len",
                move |mut caller: Caller<'_, RuntimeContext>,
                      program: i64,
                      key_ptr: i64,
                      key_len: i64|
                      -> wasmtime::Result<i32> {
                    enter_host_call(&mut caller, byte_len(key_len))?;
                    let key = state_key(&mut caller, program, key_ptr, key_len)?;

                    match lookup(&caller, storage.as_ref(), &key)? {
                        Some(value) => Ok(length_i32(value.len())?),
                        None => Ok(-1),
                    }
                },
            )
            .map_err(|e| define_failed("get_len", &e))?;

        let storage = Arc::clone(&self.storage);
        linker
            .func_wrap(
                Self::MODULE,
                "get",
                move |mut caller: Caller<'_, RuntimeContext>,
                      program: i64,
                      key_ptr: i64,
                      key_len: i64,
                      out_ptr: i64,
                      out_len: i64|
                      -> wasmtime::Result<i32> {
                    enter_host_call(&mut caller, byte_len(key_len) + byte_len(out_len))?;
                    let key = state_key(&mut caller, program, key_ptr, key_len)?;

                    let Some(value) = lookup(&caller, storage.as_ref(), &key)? else {
                        return Ok(-1);
                    };
                    let copied = value.len().min(byte_len(out_len));
                    if copied > 0 {
                        write_guest_bytes(&mut caller, out_ptr, &value[..copied])?;
                    }
                    Ok(length_i32(copied)?)
                },
            )
            .map_err(|e| define_failed("get", &e))?;

        let storage = Arc::clone(&self.storage);
        linker
            .func_wrap(
                Self::MODULE,
                "delete",
                move |mut caller: Caller<'_, RuntimeContext>,
                      program: i64,
                      key_ptr: i64,
                      key_len: i64|
                      -> wasmtime::Result<i32> {
                    enter_host_call(&mut caller, byte_len(key_len))?;
                    let key = state_key(&mut caller, program, key_ptr, key_len)?;

                    let existed = lookup(&caller, storage.as_ref(), &key)?.is_some();
                    caller.data_mut().journal_mut().delete(key);
                    Ok(i32::from(existed))
                },
            )
            .map_err(|e| define_failed("delete", &e))?;

        Ok(())
    }

    /// Apply the writes of a successful top-level call to storage.
    pub fn commit(&self, writes: &StateBatch) -> Result<(), RuntimeError> {
        if writes.is_empty() {
            return Ok(());
        }
        self.storage.apply(writes.clone())?;
        debug!(writes = writes.len(), "State committed");
        Ok(())
    }
}

fn state_key(
    caller: &mut Caller<'_, RuntimeContext>,
    program: i64,
    key_ptr: i64,
    key_len: i64,
) -> Result<StateKey, RuntimeError> {
    let program = verify_identity(caller, program)?;
    let key = read_guest_bytes(caller, key_ptr, key_len)?;
    Ok(StateKey::new(program, key))
}

/// Value visible to the call in flight: its own pending write, else storage.
fn lookup(
    caller: &Caller<'_, RuntimeContext>,
    storage: &dyn Storage,
    key: &StateKey,
) -> Result<Option<Vec<u8>>, RuntimeError> {
    match caller.data().journal().get(key) {
        Some(pending) => Ok(pending.map(<[u8]>::to_vec)),
        None => Ok(storage.get_state(key)?),
    }
}

fn length_i32(len: usize) -> Result<i32, RuntimeError> {
    i32::try_from(len).map_err(|_| RuntimeError::invalid_argument("state value too large"))
}

fn define_failed(function: &str, error: &wasmtime::Error) -> RuntimeError {
    RuntimeError::instantiation(format!("failed to define state.{function}: {error}"))
}
