//! Host imports for program-runtime.
//!
//! This crate provides the capabilities guest programs import:
//!
//! - [`state`]: Per-program key/value state, journaled per call
//! - [`program`]: Cross-program calls into nested, separately metered runtimes
//!
//! # Security Model
//!
//! 1. **Identity**: Every function takes a pointer to the caller's program id
//!    and refuses ids other than the executing runtime's own.
//! 2. **Metering**: Every function charges the executing runtime before doing
//!    any work; nested calls are funded from the caller's balance.
//! 3. **Atomicity**: State writes land in the call's journal and reach storage
//!    only when the top-level call succeeds.

pub mod capability;
mod guest;
pub mod program;
pub mod state;

pub use capability::{Capability, PROGRAM, STATE, register_defaults};
pub use program::{GuestArg, ProgramImport, decode_args};
pub use state::StateImport;
