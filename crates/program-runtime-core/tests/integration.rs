//! Integration tests for program-runtime-core.
//!
//! These tests drive the complete execution pipeline from WAT source:
//! - Compilation and instantiation with a linked host import
//! - Metered calls and meter transfers
//! - Memory marshaling and pointer ownership
//! - Call atomicity (state journal and memory rollback)
//! - Initialization failures and start-function writes
//! - Cancellation and timeouts, at epoch deadlines and host-import entry

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use wasmtime::{Caller, Linker};

use program_runtime_common::{
    EngineConfig, ExecutionConfig, MemoryStorage, ProgramId, RuntimeError, StateBatch, StateKey,
    Storage,
};
use program_runtime_core::{
    CallArg, ExecutionContext, Import, Lifecycle, Meter, Runtime, RuntimeContext,
    SupportedImports, WasmEngine, enter_host_call,
};

const GUEST: &str = r#"
    (module
      (import "ledger" "record" (func $record (param i64 i64) (result i32)))
      (import "control" "cancel" (func $cancel))
      (import "control" "sleep_ms" (func $sleep_ms (param i64)))
      (memory (export "memory") 1)
      (global $heap (export "heap") (mut i32) (i32.const 1024))
      (global $bumps (export "bumps") (mut i64) (i64.const 0))

      (func (export "alloc") (param $len i32) (result i32)
        (local $ptr i32)
        (local $end i32)
        (local.set $ptr (global.get $heap))
        (local.set $end (i32.add (local.get $ptr) (local.get $len)))
        (if (i32.gt_u (local.get $end) (i32.mul (memory.size) (i32.const 65536)))
          (then
            (if (i32.eq
                  (memory.grow
                    (i32.div_u
                      (i32.add
                        (i32.sub (local.get $end) (i32.mul (memory.size) (i32.const 65536)))
                        (i32.const 65535))
                      (i32.const 65536)))
                  (i32.const -1))
              (then (return (i32.const 0))))))
        (global.set $heap (local.get $end))
        (local.get $ptr))

      (func (export "count") (param $n i64) (result i64)
        (local $i i64)
        (block $done
          (loop $next
            (br_if $done (i64.ge_u (local.get $i) (local.get $n)))
            (local.set $i (i64.add (local.get $i) (i64.const 1)))
            (br $next)))
        (local.get $i))

      (func (export "sum") (param $ptr i32) (param $len i32) (result i64)
        (local $acc i64)
        (block $done
          (loop $next
            (br_if $done (i32.eqz (local.get $len)))
            (local.set $acc (i64.add (local.get $acc) (i64.load8_u (local.get $ptr))))
            (local.set $ptr (i32.add (local.get $ptr) (i32.const 1)))
            (local.set $len (i32.sub (local.get $len) (i32.const 1)))
            (br $next)))
        (local.get $acc))

      (func (export "peek") (param $addr i32) (result i32)
        (i32.load8_u (local.get $addr)))

      (func (export "poke_then_trap") (param $addr i32)
        (i32.store8 (local.get $addr) (i32.const 255))
        unreachable)

      (func (export "grow_then_trap")
        (drop (memory.grow (i32.const 1)))
        (i32.store8 (i32.const 70000) (i32.const 9))
        unreachable)

      (func (export "spin")
        (loop $forever (br $forever)))

      (func (export "fail")
        unreachable)

      (func (export "record") (param $key i64) (param $value i64) (result i32)
        (call $record (local.get $key) (local.get $value)))

      (func (export "record_then_trap") (param $key i64) (param $value i64)
        (drop (call $record (local.get $key) (local.get $value)))
        unreachable)

      (func (export "bump_then_trap")
        (global.set $bumps (i64.add (global.get $bumps) (i64.const 1)))
        unreachable)

      (func (export "get_bumps") (result i64)
        (global.get $bumps))

      (func (export "cancel_then_record") (param $key i64) (param $value i64) (result i32)
        (call $cancel)
        (call $record (local.get $key) (local.get $value)))

      (func (export "sleep_then_record")
        (param $ms i64) (param $key i64) (param $value i64) (result i32)
        (call $sleep_ms (local.get $ms))
        (call $record (local.get $key) (local.get $value))))
"#;

const PROGRAM: ProgramId = ProgramId::new([1; 32]);

/// Host import that journals `(key, value)` pairs and commits them to storage.
struct Ledger {
    storage: Arc<MemoryStorage>,
}

impl Import for Ledger {
    fn module(&self) -> &'static str {
        "ledger"
    }

    fn link(&self, linker: &mut Linker<RuntimeContext>) -> Result<(), RuntimeError> {
        linker
            .func_wrap(
                "ledger",
                "record",
                |mut caller: Caller<'_, RuntimeContext>, key: i64, value: i64| -> wasmtime::Result<i32> {
                    enter_host_call(&mut caller, 16)?;
                    let program = caller.data().program_id();
                    caller
                        .data_mut()
                        .journal_mut()
                        .put(StateKey::new(program, key.to_le_bytes()), value.to_le_bytes().to_vec());
                    Ok(0)
                },
            )
            .map_err(|e| RuntimeError::instantiation(e.to_string()))?;
        Ok(())
    }

    fn commit(&self, writes: &StateBatch) -> Result<(), RuntimeError> {
        self.storage.apply(writes.clone())?;
        Ok(())
    }
}

/// Host import that lets a guest cancel its own call or stall for a while.
struct Control;

impl Import for Control {
    fn module(&self) -> &'static str {
        "control"
    }

    fn link(&self, linker: &mut Linker<RuntimeContext>) -> Result<(), RuntimeError> {
        linker
            .func_wrap("control", "cancel", |caller: Caller<'_, RuntimeContext>| {
                caller.data().execution().cancel();
            })
            .map_err(|e| RuntimeError::instantiation(e.to_string()))?;
        linker
            .func_wrap(
                "control",
                "sleep_ms",
                |_caller: Caller<'_, RuntimeContext>, ms: i64| {
                    thread::sleep(Duration::from_millis(ms.unsigned_abs()));
                },
            )
            .map_err(|e| RuntimeError::instantiation(e.to_string()))?;
        Ok(())
    }
}

struct Harness {
    engine: WasmEngine,
    storage: Arc<MemoryStorage>,
    supported: SupportedImports,
}

impl Harness {
    fn new(engine_config: &EngineConfig) -> Self {
        let engine = WasmEngine::new(engine_config).unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let mut supported = SupportedImports::new();
        let shared = Arc::clone(&storage);
        supported
            .register("ledger", move || Ledger {
                storage: Arc::clone(&shared),
            })
            .unwrap();
        supported.register("control", || Control).unwrap();

        Self {
            engine,
            storage,
            supported,
        }
    }

    fn fresh(&self) -> Runtime {
        Runtime::new(
            &self.engine,
            &ExecutionConfig::default(),
            self.supported.imports(),
            PROGRAM,
        )
    }

    fn runtime(&self, config: &ExecutionConfig, units: u64) -> Runtime {
        let mut rt = Runtime::new(&self.engine, config, self.supported.imports(), PROGRAM);
        rt.initialize(&ExecutionContext::new(), GUEST.as_bytes(), units)
            .unwrap();
        rt
    }

    fn recorded(&self, key: i64) -> Option<Vec<u8>> {
        self.storage
            .get_state(&StateKey::new(PROGRAM, key.to_le_bytes()))
            .unwrap()
    }
}

fn harness() -> Harness {
    Harness::new(&EngineConfig::default())
}

/// Increment the engine epoch until the returned flag is set.
fn tick_epochs(engine: &WasmEngine) -> (Arc<AtomicBool>, thread::JoinHandle<()>) {
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let engine = engine.clone();
    let handle = thread::spawn(move || {
        while !flag.load(Ordering::SeqCst) {
            engine.increment_epoch();
            thread::sleep(Duration::from_millis(5));
        }
    });
    (done, handle)
}

// ============================================================================
// Test: Metering
// ============================================================================

#[test]
fn test_fuel_is_deterministic() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let config = ExecutionConfig::default();

    let mut a = h.runtime(&config, 100_000);
    let mut b = h.runtime(&config, 100_000);

    assert_eq!(a.call(&ctx, "count", &[CallArg::Int(100)]).unwrap(), vec![100]);
    assert_eq!(b.call(&ctx, "count", &[CallArg::Int(100)]).unwrap(), vec![100]);
    assert_eq!(a.meter().balance(), b.meter().balance());

    let first = 100_000 - a.meter().balance();
    a.call(&ctx, "count", &[CallArg::Int(100)]).unwrap();
    let second = 100_000 - first - a.meter().balance();
    assert_eq!(first, second);
    assert!(first > config.cost_model.table().call_base);
}

#[test]
fn test_meter_exhaustion() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 10_000);

    let err = rt.call(&ctx, "spin", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::MeterExhausted));
    assert!(rt.meter().balance() < 10_000);
}

#[test]
fn test_call_base_cost_checked_before_execution() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 50);

    let err = rt.call(&ctx, "count", &[CallArg::Int(1)]).unwrap_err();
    assert!(matches!(err, RuntimeError::MeterExhausted));
    assert_eq!(rt.meter().balance(), 50);
}

#[test]
fn test_metered_start_function() {
    let wat = r#"
        (module
          (memory (export "memory") 1)
          (func $init (loop $forever (br $forever)))
          (start $init))
    "#;
    let h = harness();
    let mut rt = Runtime::new(
        &h.engine,
        &ExecutionConfig::default(),
        h.supported.imports(),
        PROGRAM,
    );

    let err = rt
        .initialize(&ExecutionContext::new(), wat.as_bytes(), 5_000)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::MeterExhausted));
}

#[test]
fn test_transfer_into_runtime_meter() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 0);
    let funder = Meter::new(20_000);

    assert!(matches!(
        rt.call(&ctx, "count", &[CallArg::Int(1)]),
        Err(RuntimeError::MeterExhausted)
    ));

    funder.transfer_units_to(rt.meter(), 10_000).unwrap();
    rt.call(&ctx, "count", &[CallArg::Int(1)]).unwrap();

    rt.stop();
    rt.release_units_to(&funder).log("release units");
    assert_eq!(rt.meter().balance(), 0);
    assert!(funder.balance() > 10_000 && funder.balance() < 20_000);
}

// ============================================================================
// Test: Errors
// ============================================================================

#[test]
fn test_trap() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 10_000);

    let err = rt.call(&ctx, "fail", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::Trap { .. }));

    // The runtime stays usable after a trap.
    assert_eq!(rt.call(&ctx, "count", &[CallArg::Int(3)]).unwrap(), vec![3]);
}

#[test]
fn test_missing_memory_export() {
    let h = harness();
    let mut rt = Runtime::new(
        &h.engine,
        &ExecutionConfig::default(),
        h.supported.imports(),
        PROGRAM,
    );

    let err = rt
        .initialize(&ExecutionContext::new(), b"(module)", 1_000)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InstantiationError { .. }));
}

#[test]
fn test_unresolved_import() {
    let wat = r#"
        (module
          (import "env" "missing" (func))
          (memory (export "memory") 1))
    "#;
    let h = harness();
    let mut rt = Runtime::new(
        &h.engine,
        &ExecutionConfig::default(),
        h.supported.imports(),
        PROGRAM,
    );

    let err = rt
        .initialize(&ExecutionContext::new(), wat.as_bytes(), 1_000)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InstantiationError { .. }));
}

#[test]
fn test_invalid_bytecode() {
    let h = harness();
    let mut rt = Runtime::new(
        &h.engine,
        &ExecutionConfig::default(),
        h.supported.imports(),
        PROGRAM,
    );

    let err = rt
        .initialize(&ExecutionContext::new(), &[0xde, 0xad, 0xbe, 0xef], 1_000)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::CompileError { .. }));
}

#[test]
fn test_failed_initialize_returns_units_and_stops() {
    let wat = r#"
        (module
          (memory (export "memory") 1))
    "#;
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.fresh();
    Meter::new(500).transfer_units_to(rt.meter(), 500).unwrap();

    let err = rt.initialize(&ctx, wat.as_bytes(), 1_000).unwrap_err();
    assert!(matches!(err, RuntimeError::InstantiationError { .. }));
    assert_eq!(rt.meter().balance(), 500);
    assert_eq!(rt.lifecycle(), Lifecycle::Stopped);

    let err = rt.initialize(&ctx, GUEST.as_bytes(), 1_000).unwrap_err();
    assert!(matches!(err, RuntimeError::RuntimeStopped));
    assert_eq!(rt.meter().balance(), 500);
}

#[test]
fn test_start_function_failure_keeps_consumed_units() {
    let wat = r#"
        (module
          (memory (export "memory") 1)
          (func $init (loop $forever (br $forever)))
          (start $init))
    "#;
    let h = harness();
    let mut rt = h.fresh();
    Meter::new(500).transfer_units_to(rt.meter(), 500).unwrap();

    rt.initialize(&ExecutionContext::new(), wat.as_bytes(), 5_000)
        .unwrap_err();
    assert_eq!(rt.meter().balance(), 0);
    assert!(rt.is_stopped());
}

#[test]
fn test_start_function_writes_committed() {
    let wat = r#"
        (module
          (import "ledger" "record" (func $record (param i64 i64) (result i32)))
          (memory (export "memory") 1)
          (func (export "alloc") (param i32) (result i32)
            i32.const 1024)
          (func $init
            (drop (call $record (i64.const 77) (i64.const 5))))
          (start $init))
    "#;
    let h = harness();
    let mut rt = h.fresh();

    rt.initialize(&ExecutionContext::new(), wat.as_bytes(), 10_000)
        .unwrap();
    assert_eq!(h.recorded(77), Some(5i64.to_le_bytes().to_vec()));
    assert!(rt.meter().balance() < 10_000);
}

#[test]
fn test_start_function_writes_dropped_when_initialize_fails() {
    let wat = r#"
        (module
          (import "ledger" "record" (func $record (param i64 i64) (result i32)))
          (memory (export "memory") 1)
          (func $init
            (drop (call $record (i64.const 77) (i64.const 5))))
          (start $init))
    "#;
    let h = harness();
    let mut rt = h.fresh();

    let err = rt
        .initialize(&ExecutionContext::new(), wat.as_bytes(), 10_000)
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InstantiationError { .. }));
    assert_eq!(h.recorded(77), None);
}

// ============================================================================
// Test: Memory
// ============================================================================

#[test]
fn test_memory_round_trip() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    let ptr = rt.memory().unwrap().write_bytes(&[1, 2, 3, 4]).unwrap();
    assert_eq!(ptr.instance(), rt.instance_id());
    assert_eq!(rt.memory().unwrap().read_bytes(ptr, 4).unwrap(), vec![1, 2, 3, 4]);

    let sum = rt
        .call(&ctx, "sum", &[CallArg::Ptr(ptr), CallArg::Int(4)])
        .unwrap();
    assert_eq!(sum, vec![10]);
}

#[test]
fn test_allocation_is_metered() {
    let h = harness();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    rt.memory().unwrap().write_bytes(b"metered").unwrap();
    assert!(rt.meter().balance() < 100_000);
}

#[test]
fn test_foreign_pointer_rejected() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut a = h.runtime(&ExecutionConfig::default(), 100_000);
    let mut b = h.runtime(&ExecutionConfig::default(), 100_000);

    let ptr = a.memory().unwrap().write_bytes(b"owned by a").unwrap();

    assert!(matches!(
        b.memory().unwrap().read_bytes(ptr, 10),
        Err(RuntimeError::InvalidPointer { .. })
    ));
    assert!(matches!(
        b.call(&ctx, "sum", &[CallArg::Ptr(ptr), CallArg::Int(10)]),
        Err(RuntimeError::InvalidPointer { .. })
    ));
}

#[test]
fn test_out_of_memory_at_ceiling() {
    let h = harness();
    let config = ExecutionConfig {
        max_memory_mb: 1,
        ..ExecutionConfig::default()
    };
    let mut rt = h.runtime(&config, 1_000_000);

    let big = vec![7u8; 2 * 1024 * 1024];
    let err = rt.memory().unwrap().write_bytes(&big).unwrap_err();
    assert!(matches!(err, RuntimeError::OutOfMemory { .. }));

    // Smaller allocations still succeed.
    assert!(rt.memory().unwrap().write_bytes(&[1; 64]).is_ok());
}

// ============================================================================
// Test: Call Atomicity
// ============================================================================

#[test]
fn test_memory_rolled_back_on_failure() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    let ptr = rt.memory().unwrap().write_bytes(&[42]).unwrap();
    let err = rt.call(&ctx, "poke_then_trap", &[CallArg::Ptr(ptr)]).unwrap_err();
    assert!(matches!(err, RuntimeError::Trap { .. }));
    assert_eq!(rt.memory().unwrap().read_bytes(ptr, 1).unwrap(), vec![42]);

    rt.call(&ctx, "grow_then_trap", &[]).unwrap_err();
    assert_eq!(rt.memory().unwrap().size(), 2 * 65536);
    assert_eq!(rt.call(&ctx, "peek", &[CallArg::Int(70_000)]).unwrap(), vec![0]);
}

#[test]
fn test_memory_kept_without_rollback() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let config = ExecutionConfig {
        rollback_memory: false,
        ..ExecutionConfig::default()
    };
    let mut rt = h.runtime(&config, 100_000);

    let ptr = rt.memory().unwrap().write_bytes(&[42]).unwrap();
    rt.call(&ctx, "poke_then_trap", &[CallArg::Ptr(ptr)]).unwrap_err();
    assert_eq!(rt.memory().unwrap().read_bytes(ptr, 1).unwrap(), vec![255]);
}

#[test]
fn test_globals_rolled_back_on_failure() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    let err = rt.call(&ctx, "bump_then_trap", &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::Trap { .. }));
    assert_eq!(rt.call(&ctx, "get_bumps", &[]).unwrap(), vec![0]);

    // Restoring puts back the pre-call value, not an older one.
    let first = rt.memory().unwrap().write_bytes(&[1; 8]).unwrap();
    rt.call(&ctx, "fail", &[]).unwrap_err();
    let second = rt.memory().unwrap().write_bytes(&[2; 8]).unwrap();
    assert_eq!(second.offset(), first.offset() + 8);
}

#[test]
fn test_globals_kept_without_rollback() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let config = ExecutionConfig {
        rollback_memory: false,
        ..ExecutionConfig::default()
    };
    let mut rt = h.runtime(&config, 100_000);

    rt.call(&ctx, "bump_then_trap", &[]).unwrap_err();
    assert_eq!(rt.call(&ctx, "get_bumps", &[]).unwrap(), vec![1]);
}

#[test]
fn test_state_committed_on_success() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    assert_eq!(
        rt.call(&ctx, "record", &[CallArg::Int(7), CallArg::Int(99)]).unwrap(),
        vec![0]
    );
    assert_eq!(h.recorded(7), Some(99i64.to_le_bytes().to_vec()));
}

#[test]
fn test_state_discarded_on_failure() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    let err = rt
        .call(&ctx, "record_then_trap", &[CallArg::Int(7), CallArg::Int(99)])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Trap { .. }));
    assert_eq!(h.recorded(7), None);
    assert_eq!(h.storage.state_len(), 0);
}

#[test]
fn test_nested_call_returns_journal() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    let mut inherited = StateBatch::new();
    inherited.put(StateKey::new(PROGRAM, b"parent".to_vec()), b"pending".to_vec());

    let (results, journal) = rt
        .call_nested(&ctx, "record", &[CallArg::Int(1), CallArg::Int(2)], inherited)
        .unwrap();
    assert_eq!(results, vec![0]);
    assert_eq!(journal.len(), 2);
    assert_eq!(h.storage.state_len(), 0);
}

// ============================================================================
// Test: Cancellation and Timeouts
// ============================================================================

#[test]
fn test_cancelled_before_call() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    ctx.cancel();
    let err = rt.call(&ctx, "count", &[CallArg::Int(1)]).unwrap_err();
    assert!(matches!(err, RuntimeError::Cancelled));
    assert_eq!(rt.meter().balance(), 100_000);
}

#[test]
fn test_cancel_running_call() {
    let h = Harness::new(&EngineConfig {
        epoch_interruption: true,
        ..EngineConfig::default()
    });
    let config = ExecutionConfig {
        timeout_ms: 60_000,
        ..ExecutionConfig::default()
    };
    let mut rt = h.runtime(&config, 1 << 50);
    let (done, ticker) = tick_epochs(&h.engine);

    let ctx = ExecutionContext::new();
    let handle = ctx.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.cancel();
    });

    let err = rt.call(&ctx, "spin", &[]).unwrap_err();
    done.store(true, Ordering::SeqCst);
    canceller.join().unwrap();
    ticker.join().unwrap();

    assert!(matches!(err, RuntimeError::Cancelled));
}

#[test]
fn test_execution_timeout() {
    let h = Harness::new(&EngineConfig {
        epoch_interruption: true,
        ..EngineConfig::default()
    });
    let config = ExecutionConfig {
        timeout_ms: 50,
        ..ExecutionConfig::default()
    };
    let mut rt = h.runtime(&config, 1 << 50);
    let (done, ticker) = tick_epochs(&h.engine);

    let err = rt.call(&ExecutionContext::new(), "spin", &[]).unwrap_err();
    done.store(true, Ordering::SeqCst);
    ticker.join().unwrap();

    assert!(matches!(err, RuntimeError::ExecutionTimeout { duration_ms: 50 }));
}

#[test]
fn test_cancellation_observed_at_host_import() {
    let h = harness();
    let ctx = ExecutionContext::new();
    let mut rt = h.runtime(&ExecutionConfig::default(), 100_000);

    let err = rt
        .call(&ctx, "cancel_then_record", &[CallArg::Int(3), CallArg::Int(4)])
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Cancelled));
    assert!(ctx.is_cancelled());
    assert_eq!(h.recorded(3), None);
    assert!(rt.meter().balance() < 100_000);
}

#[test]
fn test_timeout_observed_at_host_import_without_epochs() {
    let h = harness();
    let config = ExecutionConfig {
        timeout_ms: 20,
        ..ExecutionConfig::default()
    };
    let mut rt = h.runtime(&config, 100_000);

    let err = rt
        .call(
            &ExecutionContext::new(),
            "sleep_then_record",
            &[CallArg::Int(60), CallArg::Int(3), CallArg::Int(4)],
        )
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ExecutionTimeout { duration_ms: 20 }));
    assert_eq!(h.recorded(3), None);
}

// ============================================================================
// Test: Module Cache
// ============================================================================

#[test]
fn test_compiled_module_reused() {
    let h = harness();
    let _a = h.runtime(&ExecutionConfig::default(), 1_000);
    let _b = h.runtime(&ExecutionConfig::default(), 1_000);

    assert_eq!(h.engine.modules().len(), 1);
}
