//! Configuration structures for the program runtime.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, epochs)
//! - [`ExecutionConfig`]: Per-runtime execution limits (memory, timeout, depth, costs)
//! - [`CostModel`]: The unit cost selector
//!
//! Configuration is immutable once built. Use [`RuntimeConfig::builder`] for
//! programmatic construction or deserialize it from TOML/JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Execution configuration shared by every runtime built from it.
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior. The engine is
/// shared by every runtime, including the ones created for cross-program calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for fast instance creation.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Keep compiled modules in the in-process module cache.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,

    /// Maximum number of compiled modules kept in the cache.
    ///
    /// The oldest compilation is evicted once the cache is full.
    #[serde(default = "defaults::module_cache_capacity")]
    pub module_cache_capacity: usize,

    /// Enable epoch-based interruption.
    ///
    /// Epochs back the wall-clock timeout and cancellation checks while
    /// guest code runs. Someone has to tick the engine for them to fire.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
            module_cache_capacity: defaults::module_cache_capacity(),
            epoch_interruption: defaults::epoch_interruption(),
        }
    }
}

/// Execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum linear memory per instance in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Wall-clock timeout of a single call in milliseconds.
    ///
    /// Enforced at epoch deadlines, independently of the unit budget.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum nesting of cross-program calls.
    #[serde(default = "defaults::max_call_depth")]
    pub max_call_depth: u32,

    /// Restore guest linear memory and exported mutable globals when a call
    /// fails.
    #[serde(default = "defaults::rollback_memory")]
    pub rollback_memory: bool,

    /// Unit cost model.
    #[serde(default)]
    pub cost_model: CostModel,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: defaults::max_memory_mb(),
            timeout_ms: defaults::timeout_ms(),
            max_call_depth: defaults::max_call_depth(),
            rollback_memory: defaults::rollback_memory(),
            cost_model: CostModel::default(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Memory ceiling in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Unit cost selector.
///
/// Guest instructions always cost one unit each (Wasmtime fuel). The model
/// decides the fixed and host-side costs layered on top.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostModel {
    /// Standard schedule.
    #[default]
    Standard,
    /// Only guest instructions are charged.
    InstructionOnly,
    /// Explicit schedule.
    Custom(CostTable),
}

/// Concrete unit costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CostTable {
    /// Charged before every `call`, including nested ones.
    pub call_base: u64,
    /// Charged on entry to every host import function.
    pub host_call_base: u64,
    /// Charged per byte a host import moves across the boundary.
    pub host_byte_cost: u64,
}

impl CostModel {
    /// Resolve the model to its cost table.
    pub const fn table(&self) -> CostTable {
        match self {
            Self::Standard => CostTable {
                call_base: 100,
                host_call_base: 50,
                host_byte_cost: 1,
            },
            Self::InstructionOnly => CostTable {
                call_base: 0,
                host_call_base: 0,
                host_byte_cost: 0,
            },
            Self::Custom(table) => *table,
        }
    }
}

impl RuntimeConfig {
    /// Create a builder starting from the defaults.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Check the configuration for contradictory or unusable values.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.execution.max_memory_mb == 0 {
            return Err(RuntimeError::invalid_config(
                "execution.max_memory_mb must be greater than zero",
            ));
        }
        if self.execution.max_call_depth == 0 {
            return Err(RuntimeError::invalid_config(
                "execution.max_call_depth must be greater than zero",
            ));
        }
        if self.engine.cache_compiled_modules && self.engine.module_cache_capacity == 0 {
            return Err(RuntimeError::invalid_config(
                "engine.module_cache_capacity must be greater than zero",
            ));
        }
        if self.engine.pooling_allocator {
            if self.engine.max_instances == 0 {
                return Err(RuntimeError::invalid_config(
                    "engine.max_instances must be greater than zero",
                ));
            }
            if self.execution.max_memory_mb > self.engine.instance_memory_mb {
                return Err(RuntimeError::invalid_config(format!(
                    "execution.max_memory_mb ({}) exceeds the pooled slot size engine.instance_memory_mb ({})",
                    self.execution.max_memory_mb, self.engine.instance_memory_mb
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Enable or disable the pooling allocator.
    pub fn pooling_allocator(mut self, enabled: bool) -> Self {
        self.config.engine.pooling_allocator = enabled;
        self
    }

    /// Enable or disable epoch interruption.
    pub fn epoch_interruption(mut self, enabled: bool) -> Self {
        self.config.engine.epoch_interruption = enabled;
        self
    }

    /// Enable or disable the compiled-module cache.
    pub fn cache_compiled_modules(mut self, enabled: bool) -> Self {
        self.config.engine.cache_compiled_modules = enabled;
        self
    }

    /// Set the number of compiled modules the cache keeps.
    pub fn module_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.engine.module_cache_capacity = capacity;
        self
    }

    /// Set the per-instance memory ceiling.
    pub fn max_memory_mb(mut self, mb: u32) -> Self {
        self.config.execution.max_memory_mb = mb;
        self
    }

    /// Set the wall-clock timeout per call.
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.execution.timeout_ms = ms;
        self
    }

    /// Set the maximum cross-program nesting.
    pub fn max_call_depth(mut self, depth: u32) -> Self {
        self.config.execution.max_call_depth = depth;
        self
    }

    /// Enable or disable guest state rollback on failed calls.
    pub fn rollback_memory(mut self, enabled: bool) -> Self {
        self.config.execution.rollback_memory = enabled;
        self
    }

    /// Select the cost model.
    pub fn cost_model(mut self, model: CostModel) -> Self {
        self.config.execution.cost_model = model;
        self
    }

    /// Validate and produce the immutable configuration.
    pub fn build(self) -> Result<RuntimeConfig, RuntimeError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn cache_compiled_modules() -> bool {
        true
    }

    pub const fn module_cache_capacity() -> usize {
        256
    }

    pub const fn epoch_interruption() -> bool {
        false
    }

    pub const fn max_memory_mb() -> u32 {
        16
    }

    pub const fn timeout_ms() -> u64 {
        1000
    }

    pub const fn max_call_depth() -> u32 {
        8
    }

    pub const fn rollback_memory() -> bool {
        true
    }
}
