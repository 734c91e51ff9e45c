//! Guest-supplied identities and lengths.

use wasmtime::Caller;

use program_runtime_common::{PROGRAM_ID_LEN, ProgramId, RuntimeError};
use program_runtime_core::{RuntimeContext, read_guest_bytes};

#[allow(clippy::cast_possible_wrap)]
const PROGRAM_ID_BYTES: i64 = PROGRAM_ID_LEN as i64;

/// Number of bytes a guest length stands for when charging a host call.
///
/// Negative lengths are rejected later by the memory access itself.
pub(crate) fn byte_len(len: i64) -> usize {
    usize::try_from(len).unwrap_or(0)
}

/// Read a 32-byte program id at a guest offset.
pub(crate) fn read_program_id(
    caller: &mut Caller<'_, RuntimeContext>,
    ptr: i64,
) -> Result<ProgramId, RuntimeError> {
    let bytes = read_guest_bytes(caller, ptr, PROGRAM_ID_BYTES)?;
    ProgramId::try_from(bytes.as_slice())
}

/// Read the id the guest claims to act as and check it against the identity
/// of the runtime that is executing.
pub(crate) fn verify_identity(
    caller: &mut Caller<'_, RuntimeContext>,
    ptr: i64,
) -> Result<ProgramId, RuntimeError> {
    let claimed = read_program_id(caller, ptr)?;
    let own = caller.data().program_id();
    if claimed != own {
        return Err(RuntimeError::access_denied(format!(
            "runtime of program {own} cannot act as program {claimed}"
        )));
    }
    Ok(own)
}
