//! Core Wasmtime runtime for program-runtime.
//!
//! This crate provides metered, sandboxed program execution:
//! - [`WasmEngine`]: Configured Wasmtime engine and compiled-module cache
//! - [`Runtime`]: One program instance with its own [`Meter`]
//! - [`Memory`]: Host-side marshaling into a runtime's linear memory
//! - [`SupportedImports`]: Registry of host import bundles
//! - [`RuntimeContext`]: Store data that host imports act through
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared by all runtimes, thread-safe)                  │
//! │  - Fuel metering, NaN canonicalization                  │
//! │  - Compiled-module cache                                │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Runtime                           │
//! │  (One per program instance)                             │
//! │  - Meter (transferable unit balance)                    │
//! │  - Store<RuntimeContext> + Instance                     │
//! │  - Realized imports, state journal                      │
//! └─────────────────────────────────────────────────────────┘
//!                            │ call_program
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Nested Runtime                        │
//! │  (Same engine and imports, depth + 1)                   │
//! │  - Funded by the caller, drained back on return         │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod context;
pub mod engine;
pub mod imports;
pub mod memory;
pub mod meter;
pub mod module;
pub mod runtime;
pub mod store;

pub use context::ExecutionContext;
pub use engine::WasmEngine;
pub use imports::{Import, ImportFactory, Imports, SupportedImports};
pub use memory::{InstanceId, Memory, Pointer, read_guest_bytes, write_guest_bytes};
pub use meter::{
    Advisory, Meter, NO_UNITS, consume_caller_units, reclaim_into_caller, transfer_from_caller,
};
pub use module::{CompiledModule, ModuleCache};
pub use runtime::{CallArg, Lifecycle, Runtime};
pub use store::{RuntimeContext, enter_host_call};
