//! WebAssembly module compilation and caching.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's
//! [`Module`], and [`ModuleCache`], which lets repeated instantiations of the
//! same program (cross-program calls in particular) skip compilation.
//!
//! Program bytecode is either a binary module (`\0asm` header) or, for tests
//! and hand-written programs, WebAssembly text.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use program_runtime_common::RuntimeError;

/// A compiled WebAssembly module.
///
/// Cloning is cheap; the underlying Wasmtime module is reference counted and
/// thread-safe.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Hash of the original bytecode.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile program bytecode.
    ///
    /// # Errors
    ///
    /// Returns `CompileError` if the bytes are neither a valid binary module
    /// nor valid WebAssembly text.
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = if bytes.starts_with(b"\0asm") {
            Self::validate_wasm_header(bytes)?;
            Module::from_binary(engine, bytes)
        } else if std::str::from_utf8(bytes).is_ok() {
            Module::new(engine, bytes)
        } else {
            return Err(RuntimeError::compile("Invalid Wasm: bad magic number"));
        }
        .map_err(|e| RuntimeError::compile(format!("Module compilation failed: {e}")))?;

        let content_hash = compute_hash(bytes);
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            duration_ms = duration.as_millis(),
            "Module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Get the content hash of the original bytecode.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.inner
    }

    /// Names of the module's exports.
    pub fn export_names(&self) -> Vec<String> {
        self.inner.exports().map(|e| e.name().to_string()).collect()
    }

    /// Validate WebAssembly header (magic number + version).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compile("Invalid Wasm: file too small"));
        }

        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::compile("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Default number of modules a [`ModuleCache`] keeps.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Bounded cache of compiled modules keyed by bytecode.
///
/// Entries are looked up by content hash and confirmed by comparing the full
/// bytecode, so a hash collision can never run the wrong program. Once
/// `capacity` modules are cached, inserting evicts the oldest compilation.
pub struct ModuleCache {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
}

struct CacheEntry {
    bytecode: Arc<[u8]>,
    module: CompiledModule,
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl ModuleCache {
    /// Create an empty cache with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cache holding at most `capacity` modules.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of cached modules.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the cached compilation of `bytecode` or compile and insert it.
    pub fn get_or_compile(
        &self,
        engine: &Engine,
        bytecode: &[u8],
    ) -> Result<CompiledModule, RuntimeError> {
        let hash = compute_hash(bytecode);

        if let Some(entry) = self.entries.get(&hash) {
            if *entry.bytecode == *bytecode {
                debug!(content_hash = %hash, "Module cache hit");
                return Ok(entry.module.clone());
            }
        }

        let module = CompiledModule::from_bytes(engine, bytecode)?;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&hash) {
            self.evict_oldest();
        }
        self.entries.insert(
            hash,
            CacheEntry {
                bytecode: bytecode.into(),
                module: module.clone(),
            },
        );
        Ok(module)
    }

    /// Number of cached modules.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.module.compiled_at())
            .map(|entry| entry.key().clone());

        if let Some(hash) = oldest {
            self.entries.remove(&hash);
            debug!(content_hash = %hash, "Module evicted from cache");
        }
    }

    /// Drop every cached module.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> Engine {
        let mut config = wasmtime::Config::new();
        config.consume_fuel(true);
        Engine::new(&config).unwrap()
    }

    #[test]
    fn test_validate_wasm_header() {
        assert!(CompiledModule::validate_wasm_header(MINIMAL_WASM).is_ok());
        assert!(CompiledModule::validate_wasm_header(&[0x00, 0x61]).is_err());
        assert!(
            CompiledModule::validate_wasm_header(&[0, 0, 0, 0, 1, 0, 0, 0]).is_err()
        );
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_binary_and_text_compilation() {
        let engine = engine();

        assert!(CompiledModule::from_bytes(&engine, MINIMAL_WASM).is_ok());

        let module = CompiledModule::from_bytes(
            &engine,
            br#"(module (func (export "noop")))"#,
        )
        .unwrap();
        assert_eq!(module.export_names(), vec!["noop".to_string()]);
    }

    #[test]
    fn test_malformed_bytecode() {
        let engine = engine();

        let truncated = CompiledModule::from_bytes(&engine, b"\0asm\x01");
        assert!(matches!(truncated, Err(RuntimeError::CompileError { .. })));

        let garbage = CompiledModule::from_bytes(&engine, &[0xff, 0xfe, 0x00, 0x01]);
        assert!(matches!(garbage, Err(RuntimeError::CompileError { .. })));

        let bad_text = CompiledModule::from_bytes(&engine, b"(module (func (export)))");
        assert!(matches!(bad_text, Err(RuntimeError::CompileError { .. })));
    }

    #[test]
    fn test_cache_reuses_compilation() {
        let engine = engine();
        let cache = ModuleCache::new();

        let first = cache.get_or_compile(&engine, MINIMAL_WASM).unwrap();
        let second = cache.get_or_compile(&engine, MINIMAL_WASM).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(first.compiled_at(), second.compiled_at());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_evicts_oldest_when_full() {
        let engine = engine();
        let cache = ModuleCache::with_capacity(2);

        let first = br#"(module (func (export "a")))"#;
        let second = br#"(module (func (export "b")))"#;
        let third = br#"(module (func (export "c")))"#;

        let compiled_first = cache.get_or_compile(&engine, first).unwrap();
        cache.get_or_compile(&engine, second).unwrap();
        cache.get_or_compile(&engine, third).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.capacity(), 2);

        let recompiled = cache.get_or_compile(&engine, first).unwrap();
        assert_ne!(compiled_first.compiled_at(), recompiled.compiled_at());
        assert_eq!(cache.len(), 2);
    }
}
