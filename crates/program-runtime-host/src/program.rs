//! `program` import: cross-program calls.
//!
//! `call_program(caller, target, max_units, fn_ptr, fn_len, args_ptr, args_len) -> i64`
//! runs export `fn` of the stored program `target` in a fresh nested runtime,
//! funded with `max_units` taken from the calling runtime up front. Whatever
//! the target leaves unspent flows back when it returns, whether it succeeded
//! or not.
//!
//! The argument buffer is a sequence of tagged entries:
//!
//! - `0x00` + `i64` LE: an integer argument
//! - `0x01` + `ptr: u32` LE + `len: u32` LE: bytes in the caller's memory,
//!   copied into the target and passed as a target pointer
//!
//! The target always receives a pointer to its own id as the first argument.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use wasmtime::{Caller, Linker};

use program_runtime_common::{ProgramId, RuntimeError, StateBatch, Storage};
use program_runtime_core::{
    CallArg, ExecutionContext, NO_UNITS, Runtime, RuntimeContext, enter_host_call,
    read_guest_bytes, reclaim_into_caller, transfer_from_caller,
};

use crate::guest::{byte_len, read_program_id, verify_identity};

/// Argument-buffer tag of an integer entry.
pub const ARG_INT: u8 = 0x00;

/// Argument-buffer tag of a byte-range entry.
pub const ARG_BYTES: u8 = 0x01;

/// One decoded argument-buffer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestArg {
    /// Integer passed through unchanged.
    Int(i64),
    /// Byte range in the caller's memory.
    Bytes {
        /// Offset in the caller's memory.
        ptr: u32,
        /// Length of the range.
        len: u32,
    },
}

/// Decode an argument buffer.
///
/// Fails with `InvalidArgument` on an unknown tag or a truncated entry.
pub fn decode_args(mut buf: &[u8]) -> Result<Vec<GuestArg>, RuntimeError> {
    let mut args = Vec::new();
    while let Some((&tag, rest)) = buf.split_first() {
        let (arg, rest) = match tag {
            ARG_INT => {
                let (value, rest) = take::<8>(rest)?;
                (GuestArg::Int(i64::from_le_bytes(value)), rest)
            }
            ARG_BYTES => {
                let (ptr, rest) = take::<4>(rest)?;
                let (len, rest) = take::<4>(rest)?;
                let arg = GuestArg::Bytes {
                    ptr: u32::from_le_bytes(ptr),
                    len: u32::from_le_bytes(len),
                };
                (arg, rest)
            }
            other => {
                return Err(RuntimeError::invalid_argument(format!(
                    "unknown argument tag {other:#04x}"
                )));
            }
        };
        args.push(arg);
        buf = rest;
    }
    Ok(args)
}

fn take<const N: usize>(buf: &[u8]) -> Result<([u8; N], &[u8]), RuntimeError> {
    if buf.len() < N {
        return Err(RuntimeError::invalid_argument("truncated argument buffer"));
    }
    let (head, rest) = buf.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok((out, rest))
}

/// Argument after it has been read out of the caller's memory.
enum Payload {
    Int(i64),
    Bytes(Vec<u8>),
}

/// Raw `call_program` parameters as the guest passed them.
#[derive(Debug, Clone, Copy)]
struct CallRequest {
    caller: i64,
    target: i64,
    max_units: i64,
    fn_ptr: i64,
    fn_len: i64,
    args_ptr: i64,
    args_len: i64,
}

/// Host side of the `program` import.
pub struct ProgramImport {
    storage: Arc<dyn Storage>,
}

impl ProgramImport {
    /// Guest module name.
    pub const MODULE: &'static str = "program";

    /// Create an import resolving targets from `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Define `program.call_program` on `linker`.
    pub fn link(&self, linker: &mut Linker<RuntimeContext>) -> Result<(), RuntimeError> {
        let storage = Arc::clone(&self.storage);
        linker
            .func_wrap(
                Self::MODULE,
                "call_program",
                move |mut caller: Caller<'_, RuntimeContext>,
                      caller_ptr: i64,
                      target: i64,
                      max_units: i64,
                      fn_ptr: i64,
                      fn_len: i64,
                      args_ptr: i64,
                      args_len: i64|
                      -> wasmtime::Result<i64> {
                    let request = CallRequest {
                        caller: caller_ptr,
                        target,
                        max_units,
                        fn_ptr,
                        fn_len,
                        args_ptr,
                        args_len,
                    };
                    Ok(call_program(&mut caller, storage.as_ref(), request)?)
                },
            )
            .map_err(|e| {
                RuntimeError::instantiation(format!("failed to define program.call_program: {e}"))
            })?;
        Ok(())
    }
}

#[instrument(skip_all, fields(caller = %caller.data().program_id(), depth = caller.data().depth()))]
fn call_program(
    caller: &mut Caller<'_, RuntimeContext>,
    storage: &dyn Storage,
    request: CallRequest,
) -> Result<i64, RuntimeError> {
    enter_host_call(caller, byte_len(request.fn_len) + byte_len(request.args_len))?;
    verify_identity(caller, request.caller)?;

    let target = read_program_id(caller, request.target)?;
    let function = String::from_utf8(read_guest_bytes(caller, request.fn_ptr, request.fn_len)?)
        .map_err(|_| RuntimeError::invalid_argument("function name is not valid UTF-8"))?;
    let payloads = read_payloads(caller, request.args_ptr, request.args_len)?;
    let budget = u64::try_from(request.max_units)
        .map_err(|_| RuntimeError::invalid_argument("negative unit budget"))?;

    let failed = |source: RuntimeError| RuntimeError::CrossCallFailed {
        program: target.to_hex(),
        function: function.clone(),
        source: Box::new(source),
    };

    let mut nested = Runtime::nested(caller.data(), target)?;
    let bytecode = storage.get_program(&target).map_err(|e| failed(e.into()))?;
    let ctx = caller.data().execution().clone();
    nested.initialize(&ctx, &bytecode, NO_UNITS).map_err(failed)?;

    transfer_from_caller(caller, nested.meter(), budget)?;

    let journal = caller.data().journal().clone();
    let outcome = invoke(&mut nested, &ctx, target, &function, payloads, journal);

    let returned = reclaim_into_caller(nested.meter(), caller)?;
    nested.stop();

    match outcome {
        Ok((results, journal)) => {
            debug!(
                target = %target,
                function = %function,
                units_used = budget.saturating_sub(returned),
                "Cross-program call completed"
            );
            caller.data_mut().replace_journal(journal);
            Ok(results.first().copied().unwrap_or(0))
        }
        Err(error) => {
            warn!(
                target = %target,
                function = %function,
                units_used = budget.saturating_sub(returned),
                error = %error,
                "Cross-program call failed"
            );
            Err(failed(error))
        }
    }
}

fn read_payloads(
    caller: &mut Caller<'_, RuntimeContext>,
    args_ptr: i64,
    args_len: i64,
) -> Result<Vec<Payload>, RuntimeError> {
    if args_len == 0 {
        return Ok(Vec::new());
    }

    let buf = read_guest_bytes(caller, args_ptr, args_len)?;
    decode_args(&buf)?
        .into_iter()
        .map(|arg| match arg {
            GuestArg::Int(value) => Ok(Payload::Int(value)),
            GuestArg::Bytes { ptr, len } => {
                read_guest_bytes(caller, i64::from(ptr), i64::from(len)).map(Payload::Bytes)
            }
        })
        .collect()
}

/// Marshal the arguments into the target and run the call there.
fn invoke(
    nested: &mut Runtime,
    ctx: &ExecutionContext,
    target: ProgramId,
    function: &str,
    payloads: Vec<Payload>,
    journal: StateBatch,
) -> Result<(Vec<i64>, StateBatch), RuntimeError> {
    let mut args = Vec::with_capacity(payloads.len() + 1);
    {
        let mut memory = nested.memory()?;
        args.push(CallArg::Ptr(memory.write_bytes(target.as_bytes())?));
        for payload in payloads {
            args.push(match payload {
                Payload::Int(value) => CallArg::Int(value),
                Payload::Bytes(bytes) => CallArg::Ptr(memory.write_bytes(&bytes)?),
            });
        }
    }
    nested.call_nested(ctx, function, &args, journal)
}
