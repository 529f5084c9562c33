//! The Wasm module shape every lowered `xlate_ir::Function` is emitted
//! into: a fixed 2-page imported memory backing `State`/guest memory/the
//! host-register scratch area, one exported function per IR block, and a
//! small family of negative `i64` exit codes the block functions return
//! instead of the guest `Location` they'd return on a normal direct chain.
//!
//! Modeled directly on `WasmtimeBackend`'s `(cpu_ptr, jit_ctx_ptr) -> i64`
//! convention and its `JIT_EXIT_SENTINEL_I64` return value.

use wasm_encoder::MemArg;

/// Import module name for the shared linear memory, matching the
/// teacher's `aero_jit_x86::wasm::IMPORT_MODULE`.
pub const IMPORT_MODULE: &str = "env";
pub const IMPORT_MEMORY: &str = "memory";

/// Fixed-size memory, sized generously for `State` plus the host-register
/// scratch area; guest memory itself is reached indirectly through
/// `page_table`, not through this module's own linear memory.
pub const MEMORY_PAGES: u64 = 2;

/// Every exported block function takes `(state_ptr, page_table_ptr,
/// host_reg_ptr, local_buffer_ptr)` as `i32` offsets into the imported
/// memory and returns an `i64`: either the next guest `Location` directly
/// (the common case, a direct intra-module chain already resolved the call
/// so there is nothing further for the host to do) or one of
/// `exit_code`'s negative sentinels asking the host to consult `State` and
/// act.
pub const PARAM_STATE_PTR: u32 = 0;
pub const PARAM_PAGE_TABLE_PTR: u32 = 1;
pub const PARAM_HOST_REG_PTR: u32 = 2;
/// `State.local_buffer` (`spec.md` §6): in this backend it doubles as the
/// cross-block value-transfer area, since every block is lowered to its
/// own Wasm function with a private local namespace (`lower.rs`). A value
/// live across a block boundary (including every `AddPhi` result) gets an
/// 8-byte slot here instead of a Wasm local.
pub const PARAM_LOCAL_BUFFER_PTR: u32 = 3;
pub const PARAM_COUNT: u32 = 4;

/// Import name for the host-function call trampoline
/// (`OpCode::CallDynamic`); signature `(state_ptr: i32, target: i64) -> i64`.
pub const IMPORT_CALL_HOST: &str = "call_host";

/// Import name for the RSB push trampoline (`OpCode::PushRsb`); signature
/// `(return_loc: i64) -> ()`. Pushing is the only RSB operation a block
/// needs to reach mid-execution — popping always happens at a terminal
/// (`Terminal::PopRsbHint`, `exit_code::POP_RSB_HINT`), which the host
/// already regains control for.
pub const IMPORT_PUSH_RSB: &str = "push_rsb";

/// Exit codes a block function hands back to the host loop instead of a
/// `Location`. Negative so they never collide with a real guest address
/// reinterpreted as `i64` (the same convention the teacher's
/// `JIT_EXIT_SENTINEL_I64` relies on for guest RIPs).
pub mod exit_code {
    /// `Terminal::ReturnToDispatch`: a prior `SetLocation` already updated
    /// `State.current_loc`; ask the host to run the normal L1/L2 dispatch
    /// against it.
    pub const RETURN_TO_DISPATCH: i64 = -1;
    /// `Terminal::ReturnToHost`: leave the runtime entirely.
    pub const RETURN_TO_HOST: i64 = -2;
    /// `Terminal::PopRsbHint`: pop the return-stack-buffer prediction
    /// natively, then dispatch from the popped location.
    pub const POP_RSB_HINT: i64 = -3;
    /// Consult `State.halt_reason`: set by `CallLambda`/`CallDynamic`,
    /// a faulting `MemLoad`/`MemStore`, an unreachable opcode, a tripped
    /// `CheckHalt`, or a cross-module `LinkBlock`/`LinkBlockFast`.
    pub const HALT: i64 = -4;
}

#[must_use]
pub fn block_export_name(loc: xlate_types::Location) -> String {
    format!("b_{:x}", loc.value())
}

#[must_use]
pub fn memarg(offset: u32, align: u32) -> MemArg {
    MemArg {
        offset: offset as u64,
        align,
        memory_index: 0,
    }
}
