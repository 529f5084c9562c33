//! The trampoline layer (`spec.md` §4.9): `RuntimeEntry` marshals `State`
//! into the shared Wasm memory and calls a block export; the block's
//! return value is either a direct-chained next `Location` or one of
//! `xlate_codegen::exit_code`'s sentinels, which `ReturnHost` turns back
//! into an update to the host-side `State`. `CallHost` has two routes in
//! this backend: `OpCode::CallDynamic` calls the `"env"."call_host"` import
//! this module wires up, inline, without ever halting; `OpCode::CallLambda`
//! instead halts with `HaltReason::CALL_HOST` and is resolved by
//! `Runtime::handle_call_host` in `runtime.rs`, which looks the target up
//! in this same `host_functions` registry.
//!
//! HOST ⇄ TRANSLATE ⇄ EXEC (`spec.md` §4.9 diagram): the dispatcher
//! (`Runtime::run`, in `runtime.rs`) is HOST; `Trampolines::call_block` is
//! the entry/exit edge to EXEC; a `CODE_MISS`/`MODULE_MISS` halt is the edge
//! back to TRANSLATE; a `CALL_HOST` halt is resolved without ever leaving
//! HOST.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use wasmtime::{Caller, Engine, Instance, Linker, Memory, MemoryType, Module as WasmModule, Store};

use xlate_codegen::{self as codegen, IMPORT_CALL_HOST, IMPORT_MEMORY, IMPORT_MODULE, IMPORT_PUSH_RSB};
use xlate_types::state_abi::state_offset;
use xlate_types::Location;

use crate::error::{Result, XlateError};
use crate::host_function::HostFunction;
use crate::layout;
use crate::rsb::Rsb;
use crate::state::State;

/// Per-`Runtime` Wasm execution context: one `Store`, one shared `Memory`,
/// one `Instance` cache keyed by the `wasmtime::Module`'s identity (a
/// translated guest function is compiled once; re-instantiating it against
/// the same memory on every call would be wasted work).
pub struct Trampolines {
    engine: Engine,
    host_functions: RwLock<HashMap<u64, HostFunction>>,
}

impl Trampolines {
    #[must_use]
    pub fn new() -> Self {
        Trampolines {
            engine: Engine::default(),
            host_functions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_engine(engine: Engine) -> Self {
        Trampolines {
            engine,
            host_functions: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_host_function(&self, f: HostFunction) {
        self.host_functions
            .write()
            .expect("host function table poisoned")
            .insert(f.addr.value(), f);
    }

    #[must_use]
    pub fn get_host_function(&self, addr: Location) -> Option<HostFunction> {
        self.host_functions
            .read()
            .expect("host function table poisoned")
            .get(&addr.value())
            .cloned()
    }

    fn call_host_import(&self) -> impl Fn(Caller<'_, ()>, i32, i64) -> i64 + '_ {
        move |mut caller: Caller<'_, ()>, state_ptr: i32, target: i64| -> i64 {
            let addr = Location::new(target as u64);
            let Some(host_fn) = self.get_host_function(addr) else {
                tracing::warn!(?addr, "call_host: no host function registered");
                return 0;
            };
            let Some(memory) = caller.get_export(IMPORT_MEMORY).and_then(|e| e.into_memory()) else {
                tracing::error!("call_host: instance has no exported memory");
                return 0;
            };
            let mut state = State::new();
            read_state(&memory, &caller, state_ptr as u32, &mut state);
            let result = (host_fn.implementation)(&state);
            write_state_back(&memory, &mut caller, state_ptr as u32, &state);
            result as i64
        }
    }

    /// Builds a `Linker` wiring `"env"."memory"` to `memory`,
    /// `"env"."call_host"` to this registry, and `"env"."push_rsb"` to
    /// `rsb` -- the shape every lowered module imports
    /// (`xlate_codegen::abi`). `rsb` is per-`Runtime` (`spec.md` §5: "one
    /// `Runtime` per guest thread...exclusive L1 table"), unlike the
    /// engine and host-function registry this `Trampolines` otherwise
    /// shares address-space-wide.
    pub fn linker(&self, memory: Memory, rsb: Arc<Mutex<Rsb>>) -> Result<Linker<()>> {
        let mut linker = Linker::new(&self.engine);
        linker
            .define(&mut Store::new(&self.engine, ()), IMPORT_MODULE, IMPORT_MEMORY, memory)
            .map_err(|e| XlateError::TranslationFailed(Location::INVALID, e.to_string()))?;
        let call_host = self.call_host_import();
        linker
            .func_wrap(IMPORT_MODULE, IMPORT_CALL_HOST, move |caller: Caller<'_, ()>, a: i32, b: i64| call_host(caller, a, b))
            .map_err(|e| XlateError::TranslationFailed(Location::INVALID, e.to_string()))?;
        linker
            .func_wrap(IMPORT_MODULE, IMPORT_PUSH_RSB, move |_: Caller<'_, ()>, return_loc: i64| {
                rsb.lock()
                    .expect("rsb poisoned")
                    .push(Location::new(return_loc as u64));
            })
            .map_err(|e| XlateError::TranslationFailed(Location::INVALID, e.to_string()))?;
        Ok(linker)
    }
}

impl Default for Trampolines {
    fn default() -> Self {
        Trampolines::new()
    }
}

/// `RuntimeEntry`: copies the control fields of `state` into the Wasm
/// instance's linear memory right before a block call
/// (`spec.md` §4.9 "entry trampoline").
pub fn write_control_fields(memory: &Memory, store: &mut impl wasmtime::AsContextMut, state: &State) {
    let mut buf = [0u8; layout::STATE_SIZE as usize];
    buf[state_offset::HALT_REASON..state_offset::HALT_REASON + 4]
        .copy_from_slice(&state.halt_reason().bits().to_le_bytes());
    buf[state_offset::PREV_LOC..state_offset::PREV_LOC + 8]
        .copy_from_slice(&state.prev_loc.load(std::sync::atomic::Ordering::Acquire).to_le_bytes());
    buf[state_offset::CURRENT_LOC..state_offset::CURRENT_LOC + 8]
        .copy_from_slice(&state.current_loc().value().to_le_bytes());
    buf[state_offset::BLOCKING_LINKAGE_ADDR..state_offset::BLOCKING_LINKAGE_ADDR + 8]
        .copy_from_slice(&state.blocking_linkage_addr.load(std::sync::atomic::Ordering::Acquire).to_le_bytes());
    buf[state_offset::HOST_FLAGS..state_offset::HOST_FLAGS + 8]
        .copy_from_slice(&state.host_flags.load(std::sync::atomic::Ordering::Acquire).to_le_bytes());
    memory
        .write(store, layout::STATE_BASE as usize, &buf)
        .expect("state window fits inside the reserved memory region");
}

/// `ReturnHost`: copies the control fields back out after a block call
/// returns, whatever exit code it used.
pub fn read_control_fields(memory: &Memory, store: &impl wasmtime::AsContext, state: &State) {
    let mut buf = [0u8; layout::STATE_SIZE as usize];
    memory
        .read(store, layout::STATE_BASE as usize, &mut buf)
        .expect("state window fits inside the reserved memory region");
    let halt = u32::from_le_bytes(buf[state_offset::HALT_REASON..state_offset::HALT_REASON + 4].try_into().unwrap());
    state
        .halt_reason
        .store(halt, std::sync::atomic::Ordering::Release);
    let prev = u64::from_le_bytes(buf[state_offset::PREV_LOC..state_offset::PREV_LOC + 8].try_into().unwrap());
    state.prev_loc.store(prev, std::sync::atomic::Ordering::Release);
    let cur = u64::from_le_bytes(buf[state_offset::CURRENT_LOC..state_offset::CURRENT_LOC + 8].try_into().unwrap());
    state.current_loc.store(cur, std::sync::atomic::Ordering::Release);
    let blocking = u64::from_le_bytes(
        buf[state_offset::BLOCKING_LINKAGE_ADDR..state_offset::BLOCKING_LINKAGE_ADDR + 8]
            .try_into()
            .unwrap(),
    );
    state
        .blocking_linkage_addr
        .store(blocking, std::sync::atomic::Ordering::Release);
    let flags = u64::from_le_bytes(buf[state_offset::HOST_FLAGS..state_offset::HOST_FLAGS + 8].try_into().unwrap());
    state.host_flags.store(flags, std::sync::atomic::Ordering::Release);
}

fn read_state(memory: &Memory, store: &impl wasmtime::AsContext, base: u32, out: &mut State) {
    let mut buf = [0u8; layout::STATE_SIZE as usize];
    memory
        .read(store, base as usize, &mut buf)
        .expect("call_host state window in range");
    let halt = u32::from_le_bytes(buf[state_offset::HALT_REASON..state_offset::HALT_REASON + 4].try_into().unwrap());
    out.halt_reason.store(halt, std::sync::atomic::Ordering::Relaxed);
    let flags = u64::from_le_bytes(buf[state_offset::HOST_FLAGS..state_offset::HOST_FLAGS + 8].try_into().unwrap());
    out.host_flags.store(flags, std::sync::atomic::Ordering::Relaxed);
    let cur = u64::from_le_bytes(buf[state_offset::CURRENT_LOC..state_offset::CURRENT_LOC + 8].try_into().unwrap());
    out.current_loc.store(cur, std::sync::atomic::Ordering::Relaxed);
}

fn write_state_back(memory: &Memory, store: &mut impl wasmtime::AsContextMut, base: u32, state: &State) {
    let mut buf = [0u8; layout::STATE_SIZE as usize];
    memory.read(&mut *store, base as usize, &mut buf).expect("call_host state window in range");
    buf[state_offset::HOST_FLAGS..state_offset::HOST_FLAGS + 8]
        .copy_from_slice(&state.host_flags.load(std::sync::atomic::Ordering::Relaxed).to_le_bytes());
    memory.write(store, base as usize, &buf).expect("call_host state window in range");
}

/// Allocates the shared `Memory` a `Runtime` imports into every module it
/// instantiates, sized exactly to `xlate_codegen::abi::MEMORY_PAGES`.
pub fn new_shared_memory(store: &mut Store<()>, engine: &Engine) -> Result<Memory> {
    let ty = MemoryType::new(codegen::MEMORY_PAGES as u32, Some(codegen::MEMORY_PAGES as u32));
    Memory::new(&mut *store, ty).map_err(|e| XlateError::TranslationFailed(Location::INVALID, e.to_string()))
        .inspect(|_| {
            let _ = engine;
        })
}

/// Instantiates `module` against `memory` through `linker`, returning the
/// `Instance` a block export is then looked up on.
pub fn instantiate(
    linker: &Linker<()>,
    store: &mut Store<()>,
    module: &WasmModule,
) -> Result<Instance> {
    linker
        .instantiate(&mut *store, module)
        .map_err(|e| XlateError::TranslationFailed(Location::INVALID, e.to_string()))
}

/// Calls one block export, returning the raw `i64` the Wasm function
/// produced -- either a direct-chained `Location` or a negative
/// `exit_code` sentinel. Callers are expected to have already run
/// `write_control_fields`.
pub fn call_block(
    store: &mut Store<()>,
    instance: &Instance,
    export_name: &str,
    state_ptr: i32,
    page_table_ptr: i32,
    host_reg_ptr: i32,
    local_buffer_ptr: i32,
) -> Result<i64> {
    let func = instance
        .get_typed_func::<(i32, i32, i32, i32), i64>(&mut *store, export_name)
        .map_err(|e| XlateError::TranslationFailed(Location::INVALID, e.to_string()))?;
    func.call(&mut *store, (state_ptr, page_table_ptr, host_reg_ptr, local_buffer_ptr))
        .map_err(|e| XlateError::TranslationFailed(Location::INVALID, e.to_string()))
}
