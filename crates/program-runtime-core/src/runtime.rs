//! Runtime lifecycle and metered execution.
//!
//! A [`Runtime`] executes one program on behalf of one [`ProgramId`]:
//!
//! 1. [`Runtime::new`] binds the engine, configuration and import snapshot
//! 2. [`Runtime::initialize`] compiles the bytecode, links the imports, mints
//!    the initial units and instantiates the module
//! 3. [`Runtime::call`] runs exported functions, charging the meter
//! 4. [`Runtime::stop`] releases the instance; the meter outlives it so the
//!    remaining balance can still be moved with [`Runtime::release_units_to`]
//!
//! Every call is atomic: on failure, state writes are discarded and, with
//! `rollback_memory` enabled, the linear memory and every exported mutable
//! global are restored to their pre-call values. Units consumed before the
//! failure stay consumed. Globals a program does not export cannot be
//! restored, so programs export the ones that carry state.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use wasmtime::{
    Export, FuncType, Global, Instance, Linker, Mutability, Store, StoreContextMut, Trap,
    TypedFunc, UpdateDeadline, Val, ValType,
};

use program_runtime_common::{ExecutionConfig, ProgramId, RuntimeError, StateBatch};

use crate::context::ExecutionContext;
use crate::engine::WasmEngine;
use crate::imports::{Import, Imports};
use crate::memory::{InstanceId, Memory, Pointer};
use crate::meter::{Advisory, Meter, NO_UNITS};
use crate::store::RuntimeContext;

/// Argument to an exported function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallArg {
    /// Plain integer, narrowed to `i32` when the parameter requires it.
    Int(i64),
    /// Pointer into this runtime's memory, passed as its offset.
    Ptr(Pointer),
}

impl From<i64> for CallArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for CallArg {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<Pointer> for CallArg {
    fn from(pointer: Pointer) -> Self {
        Self::Ptr(pointer)
    }
}

/// Lifecycle state of a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, not yet initialized.
    Created,
    /// Initialized and accepting calls.
    Running,
    /// Stopped; every further call fails with `RuntimeStopped`.
    Stopped,
}

/// Instantiated state of an initialized runtime.
struct Live {
    store: Store<RuntimeContext>,
    instance: Instance,
    memory: wasmtime::Memory,
    alloc: TypedFunc<i32, i32>,
    globals: Vec<Global>,
    imports: Vec<(String, Box<dyn Import>)>,
}

/// Guest state captured before a call, restored if it fails.
struct Snapshot {
    memory: Vec<u8>,
    globals: Vec<Val>,
}

/// A metered, sandboxed program instance.
pub struct Runtime {
    engine: WasmEngine,
    config: Arc<ExecutionConfig>,
    imports: Imports,
    program_id: ProgramId,
    instance_id: InstanceId,
    depth: u32,
    meter: Meter,
    live: Option<Live>,
    stopped: bool,
}

impl Runtime {
    /// Create a top-level runtime executing as `program_id`.
    ///
    /// The runtime holds no units until [`initialize`](Self::initialize) mints
    /// them or another meter transfers some in.
    pub fn new(
        engine: &WasmEngine,
        config: &ExecutionConfig,
        imports: Imports,
        program_id: ProgramId,
    ) -> Self {
        Self {
            engine: engine.clone(),
            config: Arc::new(config.clone()),
            imports,
            program_id,
            instance_id: InstanceId::generate(),
            depth: 0,
            meter: Meter::new(NO_UNITS),
            live: None,
            stopped: false,
        }
    }

    /// Create a runtime for a cross-program call made from `parent`.
    ///
    /// The nested runtime shares the parent's engine, configuration and import
    /// snapshot, one level deeper. Fails with `CallDepthExceeded` beyond
    /// `max_call_depth`.
    pub fn nested(parent: &RuntimeContext, program_id: ProgramId) -> Result<Self, RuntimeError> {
        let limit = parent.config().max_call_depth;
        let depth = parent.depth() + 1;
        if depth > limit {
            return Err(RuntimeError::CallDepthExceeded { limit });
        }

        Ok(Self {
            engine: parent.engine().clone(),
            config: Arc::clone(parent.config()),
            imports: parent.imports().clone(),
            program_id,
            instance_id: InstanceId::generate(),
            depth,
            meter: Meter::new(NO_UNITS),
            live: None,
            stopped: false,
        })
    }

    /// Compile and instantiate `bytecode`, minting `units` into the meter.
    ///
    /// The module's start function, if any, runs metered against the fresh
    /// balance and its state writes commit with a successful initialization.
    /// The module must export `memory` and `alloc(i32) -> i32`.
    ///
    /// A failed initialization takes the minted units back (units the start
    /// function burned stay consumed) and leaves the runtime stopped.
    #[instrument(skip(self, ctx, bytecode), fields(program_id = %self.program_id, instance_id = %self.instance_id))]
    pub fn initialize(
        &mut self,
        ctx: &ExecutionContext,
        bytecode: &[u8],
        units: u64,
    ) -> Result<(), RuntimeError> {
        if self.stopped {
            return Err(RuntimeError::RuntimeStopped);
        }
        if self.live.is_some() {
            return Err(RuntimeError::instantiation("runtime is already initialized"));
        }

        match self.instantiate(ctx, bytecode, units) {
            Ok(live) => {
                self.live = Some(live);
                Ok(())
            }
            Err(error) => {
                self.stopped = true;
                warn!(
                    error = %error,
                    balance = self.meter.balance(),
                    "Initialization failed, runtime stopped"
                );
                Err(error)
            }
        }
    }

    fn instantiate(
        &self,
        ctx: &ExecutionContext,
        bytecode: &[u8],
        units: u64,
    ) -> Result<Live, RuntimeError> {
        ctx.check()?;

        let module = self.engine.compile(bytecode)?;

        let mut linker = Linker::new(self.engine.inner());
        let imports = self.imports.realize();
        for (name, import) in &imports {
            import.link(&mut linker).map_err(|e| {
                RuntimeError::instantiation(format!("failed to link import '{name}': {e}"))
            })?;
        }

        let data = RuntimeContext::new(
            self.instance_id,
            self.program_id,
            self.engine.clone(),
            Arc::clone(&self.config),
            self.imports.clone(),
            self.depth,
        );
        let mut store = Store::new(self.engine.inner(), data);
        store.limiter(|ctx| &mut ctx.limits);
        if self.engine.is_epoch_enabled() {
            store.epoch_deadline_callback(
                |ctx: StoreContextMut<'_, RuntimeContext>| -> wasmtime::Result<UpdateDeadline> {
                    ctx.data().check_interrupted()?;
                    Ok(UpdateDeadline::Continue(1))
                },
            );
        }

        let instantiated = {
            let mut balance = self.meter.lock();
            let funded = balance
                .checked_add(units)
                .ok_or_else(|| RuntimeError::invalid_argument("meter balance overflow"))?;

            prepare_guest_execution(&mut store, funded)?;
            store.data_mut().begin_call(ctx.clone(), StateBatch::new());
            let instantiated = linker.instantiate(&mut store, module.module());
            *balance = finish_guest_execution(&mut store);
            instantiated
        };
        let journal = store.data_mut().end_call();

        let bound = bind_live(store, instantiated, imports)
            .and_then(|live| self.commit_start_writes(&live, &journal).map(|()| live));

        match bound {
            Ok(live) => {
                info!(
                    units,
                    depth = self.depth,
                    content_hash = %module.content_hash(),
                    start_writes = journal.len(),
                    "Runtime initialized"
                );
                Ok(live)
            }
            Err(error) => {
                let mut balance = self.meter.lock();
                *balance = balance.saturating_sub(units);
                Err(error)
            }
        }
    }

    /// Commit what the start function wrote.
    ///
    /// A called program has no journal of its own to commit into, so its
    /// start function may not write state.
    fn commit_start_writes(&self, live: &Live, journal: &StateBatch) -> Result<(), RuntimeError> {
        if journal.is_empty() {
            return Ok(());
        }
        if self.depth > 0 {
            return Err(RuntimeError::instantiation(
                "start function of a called program may not write state",
            ));
        }
        for (import_name, import) in &live.imports {
            import.commit(journal).map_err(|e| {
                warn!(import = %import_name, error = %e, "Commit failed");
                e
            })?;
        }
        Ok(())
    }

    /// Call an exported function and commit its state writes.
    ///
    /// Parameters and results must be `i32` or `i64`; results are widened to
    /// `i64`. The meter is charged the call base cost up front and one unit
    /// per executed instruction.
    ///
    /// # Errors
    ///
    /// - `RuntimeStopped` / `NotInitialized` outside the running state
    /// - `FunctionNotFound` / `ArgumentMismatch` for a bad call shape
    /// - `MeterExhausted`, `Trap`, `Cancelled` or an import's error during
    ///   execution, in which case the call leaves no state behind
    #[instrument(skip(self, ctx, args), fields(program_id = %self.program_id, function = %name))]
    pub fn call(
        &mut self,
        ctx: &ExecutionContext,
        name: &str,
        args: &[CallArg],
    ) -> Result<Vec<i64>, RuntimeError> {
        let (results, _) = self.execute(ctx, name, args, StateBatch::new(), true)?;
        Ok(results)
    }

    /// Call an exported function on behalf of a cross-program caller.
    ///
    /// The call starts from `journal`, the caller's pending writes, and
    /// returns the extended journal instead of committing it.
    pub fn call_nested(
        &mut self,
        ctx: &ExecutionContext,
        name: &str,
        args: &[CallArg],
        journal: StateBatch,
    ) -> Result<(Vec<i64>, StateBatch), RuntimeError> {
        self.execute(ctx, name, args, journal, false)
    }

    fn execute(
        &mut self,
        ctx: &ExecutionContext,
        name: &str,
        args: &[CallArg],
        journal: StateBatch,
        commit: bool,
    ) -> Result<(Vec<i64>, StateBatch), RuntimeError> {
        if self.stopped {
            return Err(RuntimeError::RuntimeStopped);
        }
        let Some(live) = self.live.as_mut() else {
            return Err(RuntimeError::NotInitialized);
        };
        ctx.check()?;

        let func = live
            .instance
            .get_func(&mut live.store, name)
            .ok_or_else(|| RuntimeError::function_not_found(name))?;
        let ty = func.ty(&live.store);
        let params = bind_params(name, &ty, args, self.instance_id)?;
        let mut results = result_slots(name, &ty)?;

        let snapshot = self.config.rollback_memory.then(|| capture_guest_state(live));
        let call_base = self.config.cost_model.table().call_base;
        let started = Instant::now();

        let (outcome, units_before, units_after) = {
            let mut balance = self.meter.lock();
            let units_before = *balance;
            if call_base > units_before {
                return Err(RuntimeError::MeterExhausted);
            }

            prepare_guest_execution(&mut live.store, units_before - call_base)?;
            live.store.data_mut().begin_call(ctx.clone(), journal);
            let outcome = func.call(&mut live.store, &params, &mut results);
            *balance = finish_guest_execution(&mut live.store);
            (outcome, units_before, *balance)
        };
        let journal = live.store.data_mut().end_call();
        let consumed = units_before - units_after;

        let outcome = outcome.map_err(classify_error).and_then(|()| {
            if commit {
                for (import_name, import) in &live.imports {
                    import.commit(&journal).map_err(|e| {
                        warn!(import = %import_name, error = %e, "Commit failed");
                        e
                    })?;
                }
            }
            Ok(())
        });

        match outcome {
            Ok(()) => {
                debug!(
                    units_consumed = consumed,
                    writes = journal.len(),
                    duration_ms = started.elapsed().as_millis(),
                    "Call completed"
                );
                let results = results.iter().map(widen).collect();
                let journal = if commit { StateBatch::new() } else { journal };
                Ok((results, journal))
            }
            Err(error) => {
                if let Some(snapshot) = snapshot {
                    restore_guest_state(live, &snapshot);
                }
                warn!(
                    units_consumed = consumed,
                    discarded_writes = journal.len(),
                    error = %error,
                    "Call failed"
                );
                Err(error)
            }
        }
    }

    /// Stop the runtime and release its instance.
    ///
    /// Idempotent. The meter and its balance survive.
    pub fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live = None;
            info!(
                program_id = %self.program_id,
                instance_id = %self.instance_id,
                balance = self.meter.balance(),
                "Runtime stopped"
            );
        }
    }

    /// Returns `true` once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        if self.stopped {
            Lifecycle::Stopped
        } else if self.live.is_some() {
            Lifecycle::Running
        } else {
            Lifecycle::Created
        }
    }

    /// The runtime's meter.
    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// View of the linear memory for host-side marshaling.
    pub fn memory(&mut self) -> Result<Memory<'_>, RuntimeError> {
        if self.stopped {
            return Err(RuntimeError::RuntimeStopped);
        }
        let live = self.live.as_mut().ok_or(RuntimeError::NotInitialized)?;

        Ok(Memory {
            store: &mut live.store,
            memory: live.memory,
            alloc: &live.alloc,
            meter: &self.meter,
            instance: self.instance_id,
        })
    }

    /// Move the whole remaining balance to `to`.
    ///
    /// Best-effort: a failure is reported as [`Advisory::Degraded`] and leaves
    /// both balances untouched.
    pub fn release_units_to(&self, to: &Meter) -> Advisory {
        match self.meter.transfer_all_to(to) {
            Ok(units) => {
                debug!(program_id = %self.program_id, units, to_meter = to.id(), "Units released");
                Advisory::Clean
            }
            Err(error) => Advisory::Degraded(error),
        }
    }

    /// Identity the runtime executes as.
    pub fn program_id(&self) -> ProgramId {
        self.program_id
    }

    /// Identity of this instance; tags every pointer it issues.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Cross-program nesting depth; 0 for a top-level runtime.
    pub fn depth(&self) -> u32 {
        self.depth
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("program_id", &self.program_id)
            .field("instance_id", &self.instance_id)
            .field("depth", &self.depth)
            .field("lifecycle", &self.lifecycle())
            .field("balance", &self.meter.balance())
            .finish_non_exhaustive()
    }
}

/// Map a Wasmtime error onto the runtime error taxonomy.
///
/// Errors raised by host imports travel through Wasmtime as [`RuntimeError`]
/// and come back out unchanged.
pub(crate) fn classify_error(error: wasmtime::Error) -> RuntimeError {
    if let Some(trap) = error.downcast_ref::<Trap>() {
        return match trap {
            Trap::OutOfFuel => RuntimeError::MeterExhausted,
            other => RuntimeError::trap(other.to_string()),
        };
    }

    match error.downcast::<RuntimeError>() {
        Ok(error) => error,
        Err(error) => RuntimeError::trap(format!("{error:#}")),
    }
}

/// Load `fuel` into the store and arm the epoch deadline.
pub(crate) fn prepare_guest_execution(
    store: &mut Store<RuntimeContext>,
    fuel: u64,
) -> Result<(), RuntimeError> {
    store
        .set_fuel(fuel)
        .map_err(|e| RuntimeError::invalid_config(format!("fuel metering unavailable: {e}")))?;
    if store.data().engine().is_epoch_enabled() {
        store.set_epoch_deadline(1);
    }
    Ok(())
}

/// Fuel left in the store after guest execution.
pub(crate) fn finish_guest_execution(store: &mut Store<RuntimeContext>) -> u64 {
    store.get_fuel().unwrap_or(0)
}

fn bind_params(
    function: &str,
    ty: &FuncType,
    args: &[CallArg],
    instance: InstanceId,
) -> Result<Vec<Val>, RuntimeError> {
    let params: Vec<ValType> = ty.params().collect();
    if params.len() != args.len() {
        return Err(RuntimeError::argument_mismatch(
            function,
            format!("expected {} arguments, got {}", params.len(), args.len()),
        ));
    }

    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (param, arg))| match (param, arg) {
            (ValType::I64, CallArg::Int(value)) => Ok(Val::I64(*value)),
            (ValType::I32, CallArg::Int(value)) => {
                i32::try_from(*value).map(Val::I32).map_err(|_| {
                    RuntimeError::argument_mismatch(
                        function,
                        format!("argument {index} does not fit in i32"),
                    )
                })
            }
            (ValType::I64, CallArg::Ptr(pointer)) => {
                pointer.check_owner(instance)?;
                Ok(Val::I64(i64::from(pointer.offset())))
            }
            (ValType::I32, CallArg::Ptr(pointer)) => {
                pointer.check_owner(instance)?;
                Ok(Val::I32(i32::from_ne_bytes(pointer.offset().to_ne_bytes())))
            }
            (other, _) => Err(RuntimeError::argument_mismatch(
                function,
                format!("argument {index} has unsupported type {other:?}"),
            )),
        })
        .collect()
}

fn result_slots(function: &str, ty: &FuncType) -> Result<Vec<Val>, RuntimeError> {
    ty.results()
        .map(|result| match result {
            ValType::I32 => Ok(Val::I32(0)),
            ValType::I64 => Ok(Val::I64(0)),
            other => Err(RuntimeError::argument_mismatch(
                function,
                format!("unsupported result type {other:?}"),
            )),
        })
        .collect()
}

fn widen(value: &Val) -> i64 {
    match value {
        Val::I32(v) => i64::from(*v),
        Val::I64(v) => *v,
        _ => 0,
    }
}

/// Resolve the exports a runtime depends on.
fn bind_live(
    mut store: Store<RuntimeContext>,
    instantiated: wasmtime::Result<Instance>,
    imports: Vec<(String, Box<dyn Import>)>,
) -> Result<Live, RuntimeError> {
    let instance = instantiated.map_err(|e| {
        if e.is::<Trap>() || e.is::<RuntimeError>() {
            classify_error(e)
        } else {
            RuntimeError::instantiation(format!("{e:#}"))
        }
    })?;

    let memory = instance
        .get_memory(&mut store, "memory")
        .ok_or_else(|| RuntimeError::instantiation("program does not export `memory`"))?;

    let alloc = instance
        .get_typed_func::<i32, i32>(&mut store, "alloc")
        .map_err(|e| {
            RuntimeError::instantiation(format!(
                "program does not export `alloc(i32) -> i32`: {e}"
            ))
        })?;

    let exported: Vec<Global> = instance
        .exports(&mut store)
        .filter_map(Export::into_global)
        .collect();
    let globals = exported
        .into_iter()
        .filter(|global| global.ty(&store).mutability() == Mutability::Var)
        .collect();

    Ok(Live {
        store,
        instance,
        memory,
        alloc,
        globals,
        imports,
    })
}

fn capture_guest_state(live: &mut Live) -> Snapshot {
    let memory = live.memory.data(&live.store).to_vec();
    let globals = live
        .globals
        .iter()
        .map(|global| global.get(&mut live.store))
        .collect();
    Snapshot { memory, globals }
}

/// Put memory and exported mutable globals back to `snapshot`. Bytes past the
/// saved memory (from growth) are zeroed since a memory cannot shrink.
fn restore_guest_state(live: &mut Live, snapshot: &Snapshot) {
    let data = live.memory.data_mut(&mut live.store);
    let (prefix, tail) = data.split_at_mut(snapshot.memory.len());
    prefix.copy_from_slice(&snapshot.memory);
    tail.fill(0);

    for (global, value) in live.globals.iter().zip(&snapshot.globals) {
        if let Err(e) = global.set(&mut live.store, *value) {
            warn!(error = %e, "Failed to restore global");
        }
    }
}
