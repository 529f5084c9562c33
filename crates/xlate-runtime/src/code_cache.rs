//! `CodeCache`: physical storage for compiled blocks (`spec.md` §4.2
//! "Code caches"). A block's `JitCache.cache_id` names one `CodeCache`
//! (an `AddressSpace` may run several, e.g. one per module so a `Flush`
//! never disturbs unrelated code) and its `offset` names an entry inside
//! it.
//!
//! The teacher's own `CodeCache` maintains an RW buffer the JIT writes
//! machine code into and a read/execute mirror the dispatcher actually
//! jumps into, kept coherent with an icache flush on every publish. This
//! backend has no machine code to mirror: `xlate-codegen::lower_function`
//! produces a self-contained Wasm module, and the "RW buffer" / "exec
//! mirror" split becomes "freshly lowered bytes" / "the `wasmtime::Module`
//! compiled from them" -- `publish` is where that compilation happens,
//! standing in for the icache flush.

use wasmtime::{Engine, Module as WasmModule};

use crate::error::{Result, XlateError};

struct Entry {
    bytes: Vec<u8>,
    compiled: Option<WasmModule>,
    free: bool,
}

/// One block's compiled form plus the wasm bytes it was built from, handed
/// back by `CodeCache::get`.
pub struct CompiledBlock<'a> {
    pub bytes: &'a [u8],
    pub module: &'a WasmModule,
}

/// Append-only (until `free`d) store of compiled blocks, backed by a
/// `wasmtime::Engine` shared across every cache in the `AddressSpace`
/// (`spec.md` §4.2: "one JIT engine instance per address space").
pub struct CodeCache {
    engine: Engine,
    entries: Vec<Entry>,
    max_bytes: usize,
    used_bytes: usize,
}

impl CodeCache {
    #[must_use]
    pub fn new(engine: Engine, max_bytes: usize) -> Self {
        CodeCache {
            engine,
            entries: Vec::new(),
            max_bytes,
            used_bytes: 0,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// `AllocCode` (`spec.md` §4.2): compiles `wasm_bytes` and stores both
    /// the bytes and the compiled module, returning the offset a `JitCache`
    /// entry should record.
    pub fn alloc_code(&mut self, wasm_bytes: Vec<u8>) -> Result<usize> {
        if self.used_bytes + wasm_bytes.len() > self.max_bytes {
            return Err(XlateError::CodeCacheExhausted {
                requested: wasm_bytes.len(),
                available: self.max_bytes.saturating_sub(self.used_bytes),
            });
        }
        let compiled = WasmModule::new(&self.engine, &wasm_bytes).map_err(|e| {
            XlateError::TranslationFailed(xlate_types::Location::INVALID, e.to_string())
        })?;
        self.used_bytes += wasm_bytes.len();
        let offset = self.entries.len();
        self.entries.push(Entry {
            bytes: wasm_bytes,
            compiled: Some(compiled),
            free: false,
        });
        Ok(offset)
    }

    /// `FreeCode`: marks the slot reclaimable. The byte accounting is
    /// released immediately; the slot itself stays (with a tombstone) so
    /// existing `offset`s never alias a different block.
    pub fn free_code(&mut self, offset: usize) {
        if let Some(entry) = self.entries.get_mut(offset) {
            if !entry.free {
                self.used_bytes = self.used_bytes.saturating_sub(entry.bytes.len());
            }
            entry.free = true;
            entry.bytes.clear();
            entry.compiled = None;
        }
    }

    /// `Flush`: drops every compiled block, matching a whole-module
    /// unmap/recompile (`spec.md` §4.2).
    pub fn flush(&mut self) {
        self.entries.clear();
        self.used_bytes = 0;
    }

    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        self.entries.get(offset).is_some_and(|e| !e.free)
    }

    /// The compiled, callable form -- the "exec mirror".
    #[must_use]
    pub fn exec_ptr_at(&self, offset: usize) -> Option<&WasmModule> {
        self.entries.get(offset).filter(|e| !e.free).and_then(|e| e.compiled.as_ref())
    }

    /// The source bytes a block was compiled from -- the "RW mirror",
    /// useful for diagnostics and for `tests/` round-tripping codegen
    /// output without re-lowering.
    #[must_use]
    pub fn rw_ptr_for(&self, offset: usize) -> Option<&[u8]> {
        self.entries.get(offset).filter(|e| !e.free).map(|e| e.bytes.as_slice())
    }

    #[must_use]
    pub fn get(&self, offset: usize) -> Option<CompiledBlock<'_>> {
        let entry = self.entries.get(offset).filter(|e| !e.free)?;
        Some(CompiledBlock {
            bytes: &entry.bytes,
            module: entry.compiled.as_ref()?,
        })
    }

    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trivial_module_bytes() -> Vec<u8> {
        xlate_codegen::lower_function(&{
            let mut b = xlate_ir::HirBuilder::new(xlate_types::Location::new(0x1000));
            b.advance_pc(xlate_types::Imm::U64(4));
            b.ret()
        })
        .expect("trivial function always lowers")
    }

    #[test]
    fn alloc_then_get_round_trips() {
        let mut cache = CodeCache::new(Engine::default(), 1 << 20);
        let bytes = trivial_module_bytes();
        let offset = cache.alloc_code(bytes.clone()).unwrap();
        assert!(cache.contains(offset));
        let got = cache.get(offset).unwrap();
        assert_eq!(got.bytes, bytes.as_slice());
    }

    #[test]
    fn free_releases_accounting_and_hides_the_entry() {
        let mut cache = CodeCache::new(Engine::default(), 1 << 20);
        let bytes = trivial_module_bytes();
        let offset = cache.alloc_code(bytes).unwrap();
        assert!(cache.used_bytes() > 0);
        cache.free_code(offset);
        assert_eq!(cache.used_bytes(), 0);
        assert!(!cache.contains(offset));
        assert!(cache.get(offset).is_none());
    }

    #[test]
    fn exhausted_budget_is_an_error_not_a_panic() {
        let mut cache = CodeCache::new(Engine::default(), 1);
        let bytes = trivial_module_bytes();
        assert!(matches!(
            cache.alloc_code(bytes),
            Err(XlateError::CodeCacheExhausted { .. })
        ));
    }

    #[test]
    fn flush_empties_every_entry() {
        let mut cache = CodeCache::new(Engine::default(), 1 << 20);
        let offset = cache.alloc_code(trivial_module_bytes()).unwrap();
        cache.flush();
        assert!(!cache.contains(offset));
        assert_eq!(cache.used_bytes(), 0);
    }
}
