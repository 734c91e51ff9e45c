//! Host/guest memory marshaling.
//!
//! A [`Pointer`] is an offset into the linear memory of the instance that
//! issued it, tagged with that instance's [`InstanceId`]. A [`Memory`] view
//! refuses pointers from any other instance, so moving data between instances
//! always means reading from one and writing into the other.
//!
//! Allocation goes through the guest's exported `alloc(len: i32) -> i32`,
//! metered against the owning runtime's meter. Offset 0 is the null pointer.

use std::fmt;

use uuid::Uuid;
use wasmtime::{Caller, Extern, Store, TypedFunc};

use program_runtime_common::RuntimeError;

use crate::meter::Meter;
use crate::runtime::{classify_error, finish_guest_execution, prepare_guest_execution};
use crate::store::RuntimeContext;

/// Identity of one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An offset into the linear memory of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    offset: u32,
    instance: InstanceId,
}

impl Pointer {
    pub(crate) fn new(offset: u32, instance: InstanceId) -> Self {
        Self { offset, instance }
    }

    /// Offset into the issuing instance's memory.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Instance that issued the pointer.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Fail with `InvalidPointer` unless the pointer is non-null and was
    /// issued by `instance`.
    pub fn check_owner(&self, instance: InstanceId) -> Result<(), RuntimeError> {
        if self.instance != instance {
            return Err(RuntimeError::invalid_pointer(
                self.offset,
                format!("issued by instance {}, used with {instance}", self.instance),
            ));
        }
        if self.offset == 0 {
            return Err(RuntimeError::invalid_pointer(0, "null pointer"));
        }
        Ok(())
    }
}

/// Borrowed view of a runtime's linear memory.
///
/// Obtained from [`Runtime::memory`](crate::Runtime::memory).
pub struct Memory<'a> {
    pub(crate) store: &'a mut Store<RuntimeContext>,
    pub(crate) memory: wasmtime::Memory,
    pub(crate) alloc: &'a TypedFunc<i32, i32>,
    pub(crate) meter: &'a Meter,
    pub(crate) instance: InstanceId,
}

impl Memory<'_> {
    /// Allocate `data.len()` bytes in guest memory, copy `data` in and return
    /// the pointer.
    ///
    /// Fails with `OutOfMemory` if the guest cannot allocate (its allocator
    /// returns 0 or an out-of-range offset, or growth hits the memory
    /// ceiling) and with `MeterExhausted` if the allocator runs out of units.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<Pointer, RuntimeError> {
        let out_of_memory = || RuntimeError::OutOfMemory {
            requested: data.len(),
        };
        let len = i32::try_from(data.len()).map_err(|_| out_of_memory())?;
        let alloc = self.alloc;

        let result = {
            let mut balance = self.meter.lock();
            prepare_guest_execution(self.store, *balance)?;
            let result = alloc.call(&mut *self.store, len);
            *balance = finish_guest_execution(self.store);
            result
        };

        let offset = result.map_err(classify_error)?;
        let offset = u32::try_from(offset)
            .ok()
            .filter(|offset| *offset != 0)
            .ok_or_else(out_of_memory)?;

        let end = (offset as usize)
            .checked_add(data.len())
            .ok_or_else(out_of_memory)?;
        if end > self.memory.data_size(&*self.store) {
            return Err(out_of_memory());
        }

        self.memory
            .write(&mut *self.store, offset as usize, data)
            .map_err(|_| out_of_memory())?;

        Ok(Pointer::new(offset, self.instance))
    }

    /// Copy `len` bytes starting at `pointer` out of guest memory.
    ///
    /// Fails with `InvalidPointer` for null or foreign pointers and for ranges
    /// outside the memory.
    pub fn read_bytes(&self, pointer: Pointer, len: usize) -> Result<Vec<u8>, RuntimeError> {
        pointer.check_owner(self.instance)?;

        let start = pointer.offset() as usize;
        let in_bounds = start
            .checked_add(len)
            .is_some_and(|end| end <= self.memory.data_size(&*self.store));
        if !in_bounds {
            return Err(RuntimeError::invalid_pointer(
                pointer.offset(),
                format!("range of {len} bytes leaves linear memory"),
            ));
        }

        let mut buf = vec![0u8; len];
        self.memory
            .read(&*self.store, start, &mut buf)
            .map_err(|e| RuntimeError::invalid_pointer(pointer.offset(), e.to_string()))?;
        Ok(buf)
    }

    /// Current size of the linear memory in bytes.
    pub fn size(&self) -> usize {
        self.memory.data_size(&*self.store)
    }

    /// Instance this memory belongs to.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }
}

/// Read `len` bytes at a guest-supplied offset of the calling instance.
pub fn read_guest_bytes(
    caller: &mut Caller<'_, RuntimeContext>,
    offset: i64,
    len: i64,
) -> Result<Vec<u8>, RuntimeError> {
    let memory = caller_memory(caller)?;
    let (start, len) = guest_range(offset, len, memory.data_size(&*caller))?;

    let mut buf = vec![0u8; len];
    memory
        .read(&*caller, start, &mut buf)
        .map_err(|e| RuntimeError::invalid_pointer(truncate_offset(offset), e.to_string()))?;
    Ok(buf)
}

/// Write `data` at a guest-supplied offset of the calling instance.
pub fn write_guest_bytes(
    caller: &mut Caller<'_, RuntimeContext>,
    offset: i64,
    data: &[u8],
) -> Result<(), RuntimeError> {
    let memory = caller_memory(caller)?;
    let len = i64::try_from(data.len()).unwrap_or(i64::MAX);
    let (start, _) = guest_range(offset, len, memory.data_size(&*caller))?;

    memory
        .write(&mut *caller, start, data)
        .map_err(|e| RuntimeError::invalid_pointer(truncate_offset(offset), e.to_string()))
}

fn caller_memory(caller: &mut Caller<'_, RuntimeContext>) -> Result<wasmtime::Memory, RuntimeError> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| RuntimeError::instantiation("program does not export `memory`"))
}

/// Validate a guest `(offset, len)` pair against the memory size.
fn guest_range(offset: i64, len: i64, size: usize) -> Result<(usize, usize), RuntimeError> {
    let invalid = |reason: &str| RuntimeError::invalid_pointer(truncate_offset(offset), reason);

    if offset == 0 {
        return Err(invalid("null pointer"));
    }
    let start = usize::try_from(offset).map_err(|_| invalid("negative offset"))?;
    let len = usize::try_from(len).map_err(|_| invalid("negative length"))?;
    let end = start.checked_add(len).ok_or_else(|| invalid("range overflow"))?;
    if end > size {
        return Err(invalid("range leaves linear memory"));
    }
    Ok((start, len))
}

fn truncate_offset(offset: i64) -> u32 {
    u32::try_from(offset).unwrap_or(u32::MAX)
}
