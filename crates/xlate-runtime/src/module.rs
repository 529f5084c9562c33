//! `Module`: one contiguous, independently-flushable region of guest code
//! (`spec.md` §4.2 "`MapModule`/`GetModule`"), its compiled functions, and
//! its own code cache.
//!
//! `ModuleConfig.optimizations` and `Module::lock_address` are not in
//! `spec.md` itself; both are recovered from
//! `source/runtime/backend/module.h` (see `SPEC_FULL.md` §D.1, §D.3). A
//! module's optimization bitset lets an embedder pin down, say, a
//! self-modifying region to `Optimizations::empty()` (always retranslate,
//! never trust a cached block) while the rest of the address space runs the
//! full pipeline; `lock_address` is what makes that retranslation safe
//! against a concurrent compile of the same range on another thread.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};

use xlate_ir::Function as IrFunction;
use xlate_types::{Location, Optimizations};

use crate::translate_table::SharedTranslateTable;

/// The decode boundary (`SPEC_FULL.md` §A: "`xlate-ir`'s HIR builder is the
/// boundary a decoder would call into"). An embedder registers one of these
/// per `Module` to turn a cache-missed entry `Location` into a finalized,
/// optimized `Function`; `Runtime`'s translate step calls it and installs
/// the result. Returning `None` means the address isn't valid guest code,
/// which the caller turns into `HaltReason::ILLEGAL_CODE`.
pub type Translator = Arc<dyn Fn(Location) -> Option<IrFunction> + Send + Sync>;

#[derive(Clone, Copy, Debug)]
pub struct ModuleConfig {
    pub optimizations: Optimizations,
    /// `spec.md` §4.1 "Hot threshold": executions through the reference
    /// interpreter before a block is queued for JIT compilation.
    pub hot_threshold: u32,
}

impl ModuleConfig {
    #[must_use]
    pub fn has_opt(&self, flag: Optimizations) -> bool {
        self.optimizations.has(flag)
    }
}

impl Default for ModuleConfig {
    fn default() -> Self {
        ModuleConfig {
            optimizations: Optimizations::all(),
            hot_threshold: 10,
        }
    }
}

/// Held ranges, guarded by a condvar so `lock_address` blocks rather than
/// spins when a range is contended (translating a large function can take
/// a while).
struct LockState {
    held: Vec<(Location, Location)>,
}

fn overlaps(a: (Location, Location), b: (Location, Location)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

pub struct RangeLockRegistry {
    state: Mutex<LockState>,
    released: Condvar,
}

impl RangeLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        RangeLockRegistry {
            state: Mutex::new(LockState { held: Vec::new() }),
            released: Condvar::new(),
        }
    }

    /// Blocks until `[start, end)` doesn't overlap any currently-held range,
    /// then holds it until the returned guard drops.
    pub fn lock(&self, start: Location, end: Location) -> RangeLock<'_> {
        let mut guard = self.state.lock().expect("range lock registry poisoned");
        while guard.held.iter().any(|&held| overlaps(held, (start, end))) {
            guard = self.released.wait(guard).expect("range lock registry poisoned");
        }
        guard.held.push((start, end));
        drop(guard);
        RangeLock { registry: self, start, end }
    }
}

impl Default for RangeLockRegistry {
    fn default() -> Self {
        RangeLockRegistry::new()
    }
}

#[must_use = "the range is locked only while this guard is held"]
pub struct RangeLock<'a> {
    registry: &'a RangeLockRegistry,
    start: Location,
    end: Location,
}

impl Drop for RangeLock<'_> {
    fn drop(&mut self) {
        let mut guard = self.registry.state.lock().expect("range lock registry poisoned");
        if let Some(idx) = guard.held.iter().position(|&r| r == (self.start, self.end)) {
            guard.held.swap_remove(idx);
        }
        self.registry.released.notify_all();
    }
}

pub struct Module {
    pub start: Location,
    pub end: Location,
    pub config: ModuleConfig,
    /// Index into the owning `AddressSpace`'s code cache list
    /// (`spec.md` §4.2: a module's blocks share one code cache).
    pub code_cache_id: usize,
    functions: Mutex<BTreeMap<Location, IrFunction>>,
    /// L2: shared across every `Runtime` translating against this module.
    pub l2: SharedTranslateTable<(usize, usize)>,
    locks: RangeLockRegistry,
    translator: Mutex<Option<Translator>>,
}

impl Module {
    #[must_use]
    pub fn new(start: Location, end: Location, config: ModuleConfig, code_cache_id: usize) -> Self {
        Module {
            start,
            end,
            config,
            code_cache_id,
            functions: Mutex::new(BTreeMap::new()),
            l2: SharedTranslateTable::with_capacity(256),
            locks: RangeLockRegistry::new(),
            translator: Mutex::new(None),
        }
    }

    /// Registers (or replaces) this module's decoder callback.
    pub fn set_translator(&self, f: Translator) {
        *self.translator.lock().expect("translator poisoned") = Some(f);
    }

    #[must_use]
    pub fn covers(&self, loc: Location) -> bool {
        self.start <= loc && loc < self.end
    }

    pub fn lock_address(&self, start: Location, end: Location) -> RangeLock<'_> {
        self.locks.lock(start, end)
    }

    pub fn insert_function(&self, func: IrFunction) {
        self.functions
            .lock()
            .expect("module function map poisoned")
            .insert(func.start, func);
    }

    pub fn with_function<R>(&self, start: Location, f: impl FnOnce(Option<&IrFunction>) -> R) -> R {
        let map = self.functions.lock().expect("module function map poisoned");
        f(map.get(&start))
    }

    /// `Translating -> Cached` publish (`spec.md` §4.2, §5). The caller
    /// holds no separate lock of its own — the module's `functions` mutex
    /// *is* the entity write-lock `spec.md` requires for this transition.
    pub fn publish_function_cache(&self, start: Location, cache_id: u16, offset: u32) {
        let mut map = self.functions.lock().expect("module function map poisoned");
        if let Some(func) = map.get_mut(&start) {
            func.jit_cache.publish(cache_id, offset);
        }
    }

    #[must_use]
    pub fn function_jit_cache(&self, start: Location) -> Option<xlate_ir::JitCacheState> {
        self.functions
            .lock()
            .expect("module function map poisoned")
            .get(&start)
            .map(|f| f.jit_cache.state)
    }

    /// Installs the function starting at `start` via the registered
    /// `Translator` if one isn't already present. Returns whether a
    /// function now exists at `start` (already did, or was just decoded).
    pub fn ensure_function(&self, start: Location) -> bool {
        if self.with_function(start, |f| f.is_some()) {
            return true;
        }
        let translator = self.translator.lock().expect("translator poisoned").clone();
        let Some(translator) = translator else {
            return false;
        };
        match translator(start) {
            Some(func) => {
                self.insert_function(func);
                true
            }
            None => false,
        }
    }

    /// Drops every cached translation and function, e.g. after a
    /// self-modifying write invalidates the whole region
    /// (`spec.md` §4.2 "Flush").
    pub fn invalidate(&self) {
        self.functions.lock().expect("module function map poisoned").clear();
        self.l2.retain(|_, _| false);
    }

    pub fn invalidate_function(&self, start: Location) {
        self.functions.lock().expect("module function map poisoned").remove(&start);
        self.l2.retain(|k, _| k != start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_checks_half_open_range() {
        let m = Module::new(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default(), 0);
        assert!(m.covers(Location::new(0x1000)));
        assert!(m.covers(Location::new(0x1fff)));
        assert!(!m.covers(Location::new(0x2000)));
    }

    #[test]
    fn non_overlapping_ranges_lock_concurrently() {
        let reg = RangeLockRegistry::new();
        let a = reg.lock(Location::new(0), Location::new(0x10));
        let b = reg.lock(Location::new(0x10), Location::new(0x20));
        drop(a);
        drop(b);
    }

    #[test]
    fn dropping_a_lock_releases_the_range() {
        let reg = RangeLockRegistry::new();
        let a = reg.lock(Location::new(0), Location::new(0x10));
        drop(a);
        // Re-locking the identical range must not block forever.
        let b = reg.lock(Location::new(0), Location::new(0x10));
        drop(b);
    }

    #[test]
    fn has_opt_checks_bits() {
        let cfg = ModuleConfig {
            optimizations: Optimizations::DEAD_CODE_REMOVE,
            hot_threshold: 1,
        };
        assert!(cfg.has_opt(Optimizations::DEAD_CODE_REMOVE));
        assert!(!cfg.has_opt(Optimizations::BLOCK_LINK));
    }

    #[test]
    fn ensure_function_decodes_once_then_reuses_the_installed_function() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let m = Module::new(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default(), 0);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        m.set_translator(Arc::new(move |loc| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Some(IrFunction::new(loc))
        }));
        assert!(m.ensure_function(Location::new(0x1000)));
        assert!(m.ensure_function(Location::new(0x1000)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ensure_function_without_a_translator_reports_missing() {
        let m = Module::new(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default(), 0);
        assert!(!m.ensure_function(Location::new(0x1000)));
    }
}
