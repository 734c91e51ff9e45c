//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared by every runtime, including nested ones
//! - Configured for deterministic execution with fuel metering
//! - Optionally set up with epoch interruption for wall-clock limits
//! - The owner of the compiled-module cache

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use program_runtime_common::{EngineConfig, RuntimeError};

use crate::module::{CompiledModule, ModuleCache};

/// Thread-safe WebAssembly engine wrapper.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Fuel Metering**: one unit per executed instruction, the basis of the meter
/// - **NaN canonicalization**: float results are bit-identical across hosts
/// - **Epoch Interruption**: optional time-based interruption as a liveness guard
/// - **Pooling Allocator**: optional pre-allocated instance slots
///
/// # Example
///
/// ```ignore
/// use program_runtime_common::EngineConfig;
/// use program_runtime_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
    modules: Arc<ModuleCache>,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid or the
    /// pooling allocator cannot be initialized.
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.consume_fuel(true);
        wasmtime_config.cranelift_nan_canonicalization(true);

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            epoch_interruption = config.epoch_interruption,
            cache_compiled_modules = config.cache_compiled_modules,
            module_cache_capacity = config.module_cache_capacity,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
            modules: Arc::new(ModuleCache::with_capacity(config.module_cache_capacity)),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Compile program bytecode, going through the module cache when enabled.
    pub fn compile(&self, bytecode: &[u8]) -> Result<CompiledModule, RuntimeError> {
        if self.config.cache_compiled_modules {
            self.modules.get_or_compile(&self.engine, bytecode)
        } else {
            CompiledModule::from_bytes(&self.engine, bytecode)
        }
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the compiled-module cache.
    pub fn modules(&self) -> &ModuleCache {
        &self.modules
    }

    /// Increment the epoch counter.
    ///
    /// This should be called periodically (e.g., every 1ms) for the
    /// execution timeout and cancellation to be observed inside guest loops.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Check if epoch interruption is enabled.
    pub fn is_epoch_enabled(&self) -> bool {
        self.config.epoch_interruption
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .field("cached_modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}
