//! Common types, errors, configuration and storage for program-runtime.
//!
//! This crate provides shared functionality used across the workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures, a validating builder and TOML config files
//! - Program identities
//! - The storage collaborator interface and an in-memory implementation

pub mod config;
pub mod config_file;
pub mod error;
pub mod ids;
pub mod storage;

pub use config::{CostModel, CostTable, EngineConfig, ExecutionConfig, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, ProgramEntry};
pub use error::{RuntimeError, StorageError};
pub use ids::{PROGRAM_ID_LEN, ProgramId};
pub use storage::{MemoryStorage, StateBatch, StateKey, Storage};
