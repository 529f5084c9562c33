//! `Runtime`: the host dispatch loop (`spec.md` §4.1 "Dispatcher", §4.9
//! "HOST <-> TRANSLATE <-> EXEC", §6 "Runtime/Interface API"). One `Runtime`
//! per guest thread, holding an exclusive L1 `TranslateTable`, an exclusive
//! `wasmtime::Store`/`Memory`, and the RSB; an `AddressSpace` (its `Module`s,
//! their shared L2 tables, and their code caches) is shared across every
//! `Runtime` translating the same guest.
//!
//! Block linkage in this backend is resolved at two different grains.
//! Within one already-decoded `Function`, a `LinkBlock` to a sibling block is
//! a direct Wasm `call` baked into the lowered module (`xlate-codegen`'s
//! `lower.rs`) -- it never round-trips through here. A `LinkBlock` that
//! crosses into a *different* `Function` (a different top-level guest entry
//! point) is the only case that exits with `exit_code::HALT` /
//! `HaltReason::BLOCK_LINKAGE`, which is why `dispatch_one` only ever probes
//! the translate tables by `Function::start`.
//!
//! `OpCode::CallLambda` halts the same way, with `HaltReason::CALL_HOST` set
//! instead: `dispatch_one` intercepts it right after the invoking call
//! returns, runs the registered `HostFunction` (`handle_call_host`), and
//! resumes at the call site rather than bouncing back out to `run`'s caller
//! (`spec.md` §4.9 "CallHost cannot recurse into guest code").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use wasmtime::{Instance, Linker, Memory, Store};

use xlate_codegen::exit_code;
use xlate_ir::{opt, JitCacheState};
use xlate_types::{state_abi::state_offset, HaltReason, Location};

use crate::address_space::AddressSpace;
use crate::config::Config;
use crate::error::{Result, XlateError};
use crate::layout;
use crate::rsb::Rsb;
use crate::state::{State, UNIFORM_BUFFER_BYTES};
use crate::trampolines;
use crate::translate_table::TranslateTable;

/// A cheap, `Send + Sync` handle that can reach across threads to interrupt
/// a `Runtime`'s `run`/`step` loop (`spec.md` §5 "Cancellation/timeout").
/// `Runtime` itself is not `Sync` -- it owns a `wasmtime::Store`, which isn't
/// meant to be touched from more than one thread -- so cancellation is
/// modeled as a separate handle over the one piece of state that genuinely
/// needs cross-thread access, rather than forcing the whole `Runtime` behind
/// a lock.
#[derive(Clone)]
pub struct InterruptHandle {
    state: Arc<State>,
}

impl InterruptHandle {
    pub fn signal_interrupt(&self) {
        self.state.signal_interrupt();
    }

    pub fn clear_interrupt(&self) {
        self.state.clear_interrupt();
    }
}

/// The dispatch core (`spec.md` §6 "Runtime/Interface"): owns the L1 cache,
/// the RSB, and the Wasm execution context for one guest thread, and drives
/// `run`/`step` against a shared `AddressSpace`.
pub struct Runtime {
    address_space: Arc<AddressSpace>,
    config: Config,
    state: Arc<State>,
    l1: TranslateTable<(usize, usize)>,
    rsb: Arc<Mutex<Rsb>>,
    store: Store<()>,
    memory: Memory,
    linker: Linker<()>,
    instances: HashMap<(usize, usize), Instance>,
}

impl Runtime {
    pub fn new(config: Config, address_space: Arc<AddressSpace>) -> Result<Self> {
        let engine = address_space.engine().clone();
        let mut store = Store::new(&engine, ());
        let memory = trampolines::new_shared_memory(&mut store, &engine)?;
        let rsb = Arc::new(Mutex::new(Rsb::new()));
        let linker = address_space.trampolines().linker(memory, rsb.clone())?;

        let mut state = State::new();
        state.page_table = config.page_table;
        state.local_buffer = u64::from(layout::LOCAL_BUFFER_BASE);
        state.set_current_loc(Location::new(config.loc_start));

        Ok(Runtime {
            address_space,
            config,
            state: Arc::new(state),
            l1: TranslateTable::with_capacity(256),
            rsb,
            store,
            memory,
            linker,
            instances: HashMap::new(),
        })
    }

    /// A cloneable handle another thread can use to interrupt this
    /// `Runtime`'s current or next `run`/`step` call.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { state: self.state.clone() }
    }

    pub fn signal_interrupt(&self) {
        self.state.signal_interrupt();
    }

    pub fn clear_interrupt(&self) {
        self.state.clear_interrupt();
    }

    #[must_use]
    pub fn get_location(&self) -> Location {
        self.state.current_loc()
    }

    pub fn set_location(&self, loc: Location) {
        self.state.set_current_loc(loc);
    }

    /// The prefix of the uniform buffer an embedder is allowed to touch
    /// (`Config::uniform_buffer_size`), backed directly by the Wasm linear
    /// memory a lowered block's `LoadUniform`/`StoreUniform` addresses --
    /// not by `State`'s own `uniform_buffer` field, which only ever travels
    /// through `call_host`'s narrow state window.
    pub fn uniform_buffer(&mut self) -> &mut [u8] {
        let memory = self.memory;
        let base = layout::STATE_BASE as usize + state_offset::UNIFORM_BUFFER_BEGIN;
        let len = self.config.uniform_buffer_size.min(UNIFORM_BUFFER_BYTES);
        &mut memory.data_mut(&mut self.store)[base..base + len]
    }

    /// Runs until a terminal `HaltReason` (`spec.md` §4.9): a fault
    /// (`PAGE_FATAL`/`ILLEGAL_CODE`), an async `SIGNAL`, or the guest simply
    /// returning control with nothing pending (`HaltReason::NONE`, the
    /// common case after `Terminal::ReturnToHost`).
    pub fn run(&mut self) -> HaltReason {
        loop {
            self.dispatch_one();
            let halt = self.state.halt_reason();
            if halt.is_terminal() {
                return halt;
            }
        }
    }

    /// Executes exactly one dispatch step -- one cache hit and invoke, or
    /// one translate -- then returns, reporting `HaltReason::STEP` if
    /// nothing more specific is already pending (`spec.md` §7 "Step").
    pub fn step(&mut self) -> HaltReason {
        self.dispatch_one();
        let halt = self.state.halt_reason();
        if halt.is_empty() {
            self.state.set_halt_reason(HaltReason::STEP);
            HaltReason::STEP
        } else {
            halt
        }
    }

    fn dispatch_one(&mut self) {
        let current = self.state.current_loc();
        if let Some((cache_id, offset)) = self.lookup(current) {
            self.state.set_halt_reason(HaltReason::NONE);
            if let Err(err) = self.invoke(cache_id, offset, current) {
                tracing::error!(?err, ?current, "block invocation failed");
                self.state.set_halt_reason(HaltReason::ILLEGAL_CODE);
                return;
            }
            if self.state.halt_reason().contains(HaltReason::CALL_HOST) {
                self.handle_call_host();
            }
            return;
        }

        match self.translate(current) {
            Ok(()) => {
                // The next call to `dispatch_one` (the same loop iteration,
                // from `run`'s perspective) will find this in L1.
                self.state.set_halt_reason(HaltReason::CODE_MISS);
            }
            Err(XlateError::ModuleMiss(loc)) => {
                tracing::warn!(?loc, "no module covers this location");
                self.state.set_halt_reason(HaltReason::MODULE_MISS);
            }
            Err(XlateError::NoTranslator(loc)) => {
                tracing::warn!(?loc, "module has no translator registered");
                self.state.set_halt_reason(HaltReason::ILLEGAL_CODE);
            }
            Err(err) => {
                tracing::error!(?err, ?current, "translation failed");
                self.state.set_halt_reason(HaltReason::ILLEGAL_CODE);
            }
        }
    }

    /// L1 probe, falling back to the owning module's L2 and writing back
    /// into L1 on a hit (`spec.md` §4.1 step 1).
    fn lookup(&mut self, loc: Location) -> Option<(usize, usize)> {
        if let Some(hit) = self.l1.get(loc) {
            return Some(hit);
        }
        let module = self.address_space.get_module(loc)?;
        let hit = module.l2.get(loc)?;
        self.l1.put(loc, hit);
        Some(hit)
    }

    /// Decodes, optimizes, lowers, and publishes the function starting at
    /// `loc` (`spec.md` §4.1 step 3, §4.6, §4.8).
    fn translate(&mut self, loc: Location) -> Result<()> {
        let module = self.address_space.get_module(loc).ok_or(XlateError::ModuleMiss(loc))?;
        let _range = module.lock_address(loc, loc.offset(1));

        if module.function_jit_cache(loc) == Some(JitCacheState::Cached) {
            if let Some(hit) = module.l2.get(loc) {
                self.l1.put(loc, hit);
            }
            return Ok(());
        }

        if !module.ensure_function(loc) {
            return Err(XlateError::NoTranslator(loc));
        }
        let func = module
            .with_function(loc, |f| f.cloned())
            .expect("ensure_function just installed this entry");

        let mut func = func;
        opt::run_pipeline(&mut func, &self.config.static_uniform_plan);
        let bytes = xlate_codegen::lower_function(&func).map_err(|e| XlateError::Codegen(loc, e))?;

        let cache = self
            .address_space
            .get_code_cache(module.code_cache_id)
            .expect("map_module always allocates a code cache for its module");
        let offset = cache.write().expect("code cache poisoned").alloc_code(bytes)?;

        module.publish_function_cache(loc, module.code_cache_id as u16, offset as u32);
        module.l2.put(loc, (module.code_cache_id, offset));
        self.l1.put(loc, (module.code_cache_id, offset));
        Ok(())
    }

    fn invoke(&mut self, cache_id: usize, offset: usize, entry: Location) -> Result<()> {
        let instance = self.instance_for(cache_id, offset)?;
        trampolines::write_control_fields(&self.memory, &mut self.store, &self.state);
        let export = xlate_codegen::block_export_name(entry);
        let code = trampolines::call_block(
            &mut self.store,
            &instance,
            &export,
            layout::STATE_BASE as i32,
            layout::PAGE_TABLE_BASE as i32,
            layout::HOST_REG_BASE as i32,
            layout::LOCAL_BUFFER_BASE as i32,
        )?;
        trampolines::read_control_fields(&self.memory, &self.store, &self.state);
        self.handle_exit_code(code);
        Ok(())
    }

    /// Resolves a `HaltReason::CALL_HOST` halt (`spec.md` §4.9 "CallHost()"):
    /// `CallLambda`'s lowering left the host-function address in
    /// `current_loc` and the calling block's start in `prev_loc` before
    /// halting (`xlate-codegen`'s `inst_lower.rs`). Looks the address up in
    /// the address-space-wide host-function registry, runs it, posts its
    /// result into the host-register scratch area slot 0 (the ABI
    /// `host_function.rs` documents for a callback's return value), then
    /// resumes at `prev_loc` -- `CallHost` cannot recurse into guest code
    /// (`spec.md` §7), so there is nothing further to dispatch until the
    /// next probe.
    fn handle_call_host(&mut self) {
        let target = self.state.current_loc();
        let resume = self.state.prev_loc();
        let Some(host_fn) = self.address_space.trampolines().get_host_function(target) else {
            tracing::error!(?target, "call_host halt: no host function registered at this address");
            self.state.set_halt_reason(HaltReason::ILLEGAL_CODE);
            return;
        };
        let result = (host_fn.implementation)(&self.state);
        let memory = self.memory;
        memory
            .write(&mut self.store, layout::HOST_REG_BASE as usize, &result.to_le_bytes())
            .expect("host register scratch area fits inside the reserved memory region");
        self.state.set_current_loc(resume);
        let mut halt = self.state.halt_reason();
        halt.remove(HaltReason::CALL_HOST);
        // Leave the loop able to retry rather than reporting `NONE` --
        // `resume` is typically already cached, so the next probe is a
        // direct L1 hit.
        halt.insert(HaltReason::CODE_MISS);
        self.state.set_halt_reason(halt);
    }

    fn instance_for(&mut self, cache_id: usize, offset: usize) -> Result<Instance> {
        if let Some(instance) = self.instances.get(&(cache_id, offset)) {
            return Ok(*instance);
        }
        let cache = self
            .address_space
            .get_code_cache(cache_id)
            .ok_or_else(|| XlateError::TranslationFailed(Location::INVALID, "code cache no longer exists".into()))?;
        let wasm_module = {
            let guard = cache.read().expect("code cache poisoned");
            guard
                .exec_ptr_at(offset)
                .cloned()
                .ok_or_else(|| XlateError::TranslationFailed(Location::INVALID, "cache entry missing or freed".into()))?
        };
        let instance = trampolines::instantiate(&self.linker, &mut self.store, &wasm_module)?;
        self.instances.insert((cache_id, offset), instance);
        Ok(instance)
    }

    /// Interprets a block export's return value (`spec.md` §4.9). A direct
    /// chain elsewhere in the same function never reaches here (it is a
    /// nested Wasm `call`); only the four `exit_code` sentinels do.
    fn handle_exit_code(&mut self, code: i64) {
        match code {
            exit_code::RETURN_TO_DISPATCH | exit_code::RETURN_TO_HOST => {}
            exit_code::POP_RSB_HINT => {
                if let Some(target) = self.rsb.lock().expect("rsb poisoned").pop() {
                    self.state.set_current_loc(target);
                }
                // An empty RSB just falls through to a normal dispatch probe
                // against whatever `current_loc` the guest already left
                // behind -- a misprediction here costs a probe, not
                // correctness (`spec.md` §4.1).
            }
            exit_code::HALT => {
                // `State.halt_reason` was already updated inside the guest
                // code (`CallLambda`, a faulting memory op, a tripped
                // `CheckHalt`, or a cross-function `LinkBlock`) and synced
                // back by `read_control_fields` just before this call.
                // `dispatch_one` checks for `CALL_HOST` right after this
                // returns and runs `handle_call_host` if it's set.
            }
            other => {
                tracing::error!(code = other, "compiled block returned an unrecognized exit code");
                self.state.set_halt_reason(HaltReason::ILLEGAL_CODE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_cache::CodeCache;
    use crate::module::ModuleConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use xlate_ir::{Function as IrFunction, HirBuilder, Terminal};
    use xlate_types::Imm;

    /// Loads an immediate, advances the guest PC, and returns control to
    /// the host -- the shape of `spec.md` §8 scenario 1.
    fn straight_line_function(start: Location) -> IrFunction {
        let mut b = HirBuilder::new(start);
        let _ = b.load_imm(Imm::U32(0x42));
        b.advance_pc(Imm::U64(4));
        b.close_with(Terminal::ReturnToHost)
    }

    #[test]
    fn run_resolves_a_cache_miss_then_reuses_it_on_the_second_call() {
        let space = Arc::new(AddressSpace::new());
        let module = space
            .map_module(Location::new(0x1000), Location::new(0x3000), ModuleConfig::default())
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        module.set_translator(Arc::new(move |loc| {
            calls2.fetch_add(1, Ordering::SeqCst);
            Some(straight_line_function(loc))
        }));

        let config = Config::new(0x1000, 0x3000);
        let mut rt = Runtime::new(config, space).unwrap();

        let halt = rt.run();
        assert_eq!(halt, HaltReason::NONE, "a straight-line ReturnToHost leaves nothing pending");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "first run() must translate exactly once");

        rt.set_location(Location::new(0x1000));
        let halt = rt.run();
        assert_eq!(halt, HaltReason::NONE);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second run() must hit L1 directly, no retranslation");
    }

    #[test]
    fn module_miss_outside_any_mapped_range_is_terminal() {
        let space = Arc::new(AddressSpace::new());
        space
            .map_module(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default())
            .unwrap();
        let config = Config::new(0x5000, 0x6000);
        let mut rt = Runtime::new(config, space).unwrap();
        let halt = rt.run();
        assert_eq!(halt, HaltReason::MODULE_MISS);
    }

    #[test]
    fn interrupt_handle_reaches_across_to_a_fresh_runtime() {
        let space = Arc::new(AddressSpace::new());
        let module = space
            .map_module(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default())
            .unwrap();
        module.set_translator(Arc::new(|loc| Some(straight_line_function(loc))));
        let config = Config::new(0x1000, 0x2000);
        let rt = Runtime::new(config, space).unwrap();
        let handle = rt.interrupt_handle();
        handle.signal_interrupt();
        assert!(rt.state.halt_reason().contains(HaltReason::SIGNAL));
        handle.clear_interrupt();
        assert!(!rt.state.halt_reason().contains(HaltReason::SIGNAL));
    }

    #[test]
    fn code_cache_exhaustion_surfaces_as_illegal_code_not_a_panic() {
        let space = Arc::new(AddressSpace::new());
        let module = space
            .map_module(Location::new(0x1000), Location::new(0x2000), ModuleConfig::default())
            .unwrap();
        module.set_translator(Arc::new(|loc| Some(straight_line_function(loc))));
        // Starve the module's own code cache so `alloc_code` fails.
        let cache = space.get_code_cache(module.code_cache_id).unwrap();
        *cache.write().unwrap() = CodeCache::new(space.engine().clone(), 0);
        let config = Config::new(0x1000, 0x2000);
        let mut rt = Runtime::new(config, space).unwrap();
        let halt = rt.run();
        assert_eq!(halt, HaltReason::ILLEGAL_CODE);
    }
}
