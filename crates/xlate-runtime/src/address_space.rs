//! `AddressSpace`: the guest-memory-wide registry of `Module`s and code
//! caches shared by every `Runtime`/thread translating the same guest
//! (`spec.md` §4.2, §6 "`AddressSpace` API").

use std::sync::{Arc, RwLock};

use wasmtime::Engine;
use xlate_types::Location;

use crate::code_cache::CodeCache;
use crate::error::{Result, XlateError};
use crate::module::{Module, ModuleConfig};
use crate::trampolines::Trampolines;

pub struct AddressSpace {
    engine: Engine,
    modules: RwLock<Vec<Arc<Module>>>,
    code_caches: RwLock<Vec<Arc<RwLock<CodeCache>>>>,
    default_module: RwLock<Option<Arc<Module>>>,
    trampolines: Trampolines,
}

impl AddressSpace {
    #[must_use]
    pub fn new() -> Self {
        AddressSpace {
            engine: Engine::default(),
            modules: RwLock::new(Vec::new()),
            code_caches: RwLock::new(Vec::new()),
            default_module: RwLock::new(None),
            trampolines: Trampolines::new(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn trampolines(&self) -> &Trampolines {
        &self.trampolines
    }

    /// `PushCodeCache`: registers a new code cache and returns its id, the
    /// `code_cache_id` a `Module` records against its own blocks.
    pub fn push_code_cache(&self, max_bytes: usize) -> usize {
        let mut caches = self.code_caches.write().expect("code cache list poisoned");
        caches.push(Arc::new(RwLock::new(CodeCache::new(self.engine.clone(), max_bytes))));
        caches.len() - 1
    }

    #[must_use]
    pub fn get_code_cache(&self, id: usize) -> Option<Arc<RwLock<CodeCache>>> {
        self.code_caches.read().expect("code cache list poisoned").get(id).cloned()
    }

    /// `MapModule` (`spec.md` §4.2). Rejects a range overlapping an
    /// already-mapped module rather than silently merging or shadowing it --
    /// an embedder that wants to replace a region must `unmap_module` first.
    pub fn map_module(&self, start: Location, end: Location, config: ModuleConfig) -> Result<Arc<Module>> {
        let mut modules = self.modules.write().expect("module list poisoned");
        if modules.iter().any(|m| m.start < end && start < m.end) {
            return Err(XlateError::OverlappingModule(start, end));
        }
        let code_cache_id = {
            drop(modules);
            let id = self.push_code_cache(64 << 20);
            modules = self.modules.write().expect("module list poisoned");
            id
        };
        let module = Arc::new(Module::new(start, end, config, code_cache_id));
        modules.push(module.clone());
        drop(modules);
        if self.default_module.read().expect("default module poisoned").is_none() {
            *self.default_module.write().expect("default module poisoned") = Some(module.clone());
        }
        Ok(module)
    }

    /// `UnmapModule`: drops the module and its code cache entirely. Any
    /// `Location` it used to cover is a `ModuleMiss` again.
    pub fn unmap_module(&self, start: Location) -> Result<()> {
        let mut modules = self.modules.write().expect("module list poisoned");
        let idx = modules
            .iter()
            .position(|m| m.start == start)
            .ok_or(XlateError::ModuleMiss(start))?;
        let module = modules.remove(idx);
        drop(modules);
        if let Some(cache) = self.get_code_cache(module.code_cache_id) {
            cache.write().expect("code cache poisoned").flush();
        }
        let mut default = self.default_module.write().expect("default module poisoned");
        if default.as_ref().is_some_and(|d| Arc::ptr_eq(d, &module)) {
            *default = self.modules.read().expect("module list poisoned").first().cloned();
        }
        Ok(())
    }

    /// `GetModule`: the module covering `loc`, if any.
    #[must_use]
    pub fn get_module(&self, loc: Location) -> Option<Arc<Module>> {
        self.modules
            .read()
            .expect("module list poisoned")
            .iter()
            .find(|m| m.covers(loc))
            .cloned()
    }

    /// `GetDefaultModule`: the first module mapped, used when an embedder
    /// doesn't care about module partitioning (`spec.md` §6).
    #[must_use]
    pub fn get_default_module(&self) -> Option<Arc<Module>> {
        self.default_module.read().expect("default module poisoned").clone()
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        AddressSpace::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_get_resolves_covered_locations() {
        let space = AddressSpace::new();
        space
            .map_module(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default())
            .unwrap();
        assert!(space.get_module(Location::new(0x1500)).is_some());
        assert!(space.get_module(Location::new(0x2000)).is_none());
    }

    #[test]
    fn overlapping_map_is_rejected() {
        let space = AddressSpace::new();
        space
            .map_module(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default())
            .unwrap();
        let err = space.map_module(Location::new(0x1800), Location::new(0x2800), ModuleConfig::default());
        assert!(matches!(err, Err(XlateError::OverlappingModule(_, _))));
    }

    #[test]
    fn unmap_clears_resolution_and_default() {
        let space = AddressSpace::new();
        space
            .map_module(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default())
            .unwrap();
        space.unmap_module(Location::new(0x1000)).unwrap();
        assert!(space.get_module(Location::new(0x1500)).is_none());
        assert!(space.get_default_module().is_none());
    }

    #[test]
    fn first_mapped_module_becomes_default() {
        let space = AddressSpace::new();
        let m = space
            .map_module(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default())
            .unwrap();
        assert!(Arc::ptr_eq(&space.get_default_module().unwrap(), &m));
    }
}
