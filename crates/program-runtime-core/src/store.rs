//! Per-runtime store state.
//!
//! This module provides [`RuntimeContext`], the data attached to every
//! Wasmtime store. Host imports reach it through [`wasmtime::Caller`] to learn
//! which program they are acting for, what the call may still cost, and where
//! pending state writes go.

use std::sync::Arc;
use std::time::Instant;

use wasmtime::{Caller, StoreLimits, StoreLimitsBuilder};

use program_runtime_common::{CostTable, ExecutionConfig, ProgramId, RuntimeError, StateBatch};

use crate::context::ExecutionContext;
use crate::engine::WasmEngine;
use crate::imports::Imports;
use crate::memory::InstanceId;
use crate::meter::consume_caller_units;

/// Store data of one runtime instance.
pub struct RuntimeContext {
    instance_id: InstanceId,
    program_id: ProgramId,
    engine: WasmEngine,
    config: Arc<ExecutionConfig>,
    imports: Imports,
    depth: u32,

    /// Resource limits enforced by the store limiter.
    pub(crate) limits: StoreLimits,

    /// Writes buffered by the call in flight.
    journal: StateBatch,

    /// Context of the call in flight.
    execution: ExecutionContext,

    /// When the call in flight started.
    started_at: Option<Instant>,
}

impl RuntimeContext {
    pub(crate) fn new(
        instance_id: InstanceId,
        program_id: ProgramId,
        engine: WasmEngine,
        config: Arc<ExecutionConfig>,
        imports: Imports,
        depth: u32,
    ) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .trap_on_grow_failure(false)
            .build();

        Self {
            instance_id,
            program_id,
            engine,
            config,
            imports,
            depth,
            limits,
            journal: StateBatch::new(),
            execution: ExecutionContext::new(),
            started_at: None,
        }
    }

    /// Instance this store belongs to.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Identity the runtime executes as.
    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    /// Shared engine, used to build nested runtimes.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Execution configuration.
    pub fn config(&self) -> &Arc<ExecutionConfig> {
        &self.config
    }

    /// Import snapshot the runtime was built with.
    pub fn imports(&self) -> &Imports {
        &self.imports
    }

    /// Cross-program nesting depth; 0 for a top-level runtime.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Cost table of the configured cost model.
    pub fn costs(&self) -> CostTable {
        self.config.cost_model.table()
    }

    /// Pending writes of the call in flight.
    pub fn journal(&self) -> &StateBatch {
        &self.journal
    }

    /// Mutable access to the pending writes.
    pub fn journal_mut(&mut self) -> &mut StateBatch {
        &mut self.journal
    }

    /// Replace the pending writes, e.g. with a nested call's journal.
    pub fn replace_journal(&mut self, journal: StateBatch) {
        self.journal = journal;
    }

    /// Execution context of the call in flight.
    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    /// Fail if the call in flight was cancelled or ran past its time budget.
    pub fn check_interrupted(&self) -> Result<(), RuntimeError> {
        self.execution.check()?;
        if let Some(started_at) = self.started_at {
            let timeout = self.config.timeout();
            if started_at.elapsed() > timeout {
                return Err(RuntimeError::ExecutionTimeout {
                    duration_ms: self.config.timeout_ms,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn begin_call(&mut self, execution: ExecutionContext, journal: StateBatch) {
        self.execution = execution;
        self.journal = journal;
        self.started_at = Some(Instant::now());
    }

    pub(crate) fn end_call(&mut self) -> StateBatch {
        self.execution = ExecutionContext::new();
        self.started_at = None;
        std::mem::take(&mut self.journal)
    }
}

/// Entry bookkeeping for every host import function.
///
/// Observes cancellation and the call's wall-clock timeout, then charges the host-call base cost plus the
/// per-byte cost for `bytes` moved across the boundary.
pub fn enter_host_call(
    caller: &mut Caller<'_, RuntimeContext>,
    bytes: usize,
) -> Result<(), RuntimeError> {
    caller.data().check_interrupted()?;

    let costs = caller.data().costs();
    let byte_units = costs
        .host_byte_cost
        .saturating_mul(u64::try_from(bytes).unwrap_or(u64::MAX));
    consume_caller_units(caller, costs.host_call_base.saturating_add(byte_units))
}
