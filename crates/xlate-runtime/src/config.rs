//! `Config`: the embedder-supplied, per-`Runtime` settings (`spec.md` §6),
//! matching the teacher's `JitConfig` (plain pub fields, a `Default`, and a
//! handful of `with_*` builder methods rather than a file-based config
//! layer -- this is a library, not a CLI).

use xlate_ir::opt::StaticUniformPlan;
use xlate_types::Optimizations;

/// Which execution backend `xlate-codegen::lower_function` targets.
/// `spec.md` §6 names this `backend_isa`; Wasm-via-`wasmtime` is currently
/// the only one implemented (`SPEC_FULL.md` §B).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendIsa {
    Wasm,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub loc_start: u64,
    pub loc_end: u64,
    pub enable_jit: bool,
    pub enable_asm_interp: bool,
    pub uniform_buffer_size: usize,
    pub backend_isa: BackendIsa,
    /// The static-uniform allocation plan (`spec.md` §4.3, §6
    /// `Config.buffers_static_alloc`): which uniform-buffer byte ranges are
    /// pinned to a host register for the life of the `Runtime`, rather than
    /// round-tripped through `LoadUniform`/`StoreUniform` on every access.
    /// `StaticUniformPlan::NONE` disables the optimization entirely.
    pub static_uniform_plan: StaticUniformPlan,
    pub global_opts: Optimizations,
    /// Host address the guest page table is mapped at; passed to every
    /// lowered block as `page_table_ptr`.
    pub page_table: u64,
    pub memory_base: u64,
    /// Whether `DefineLocal`/`LoadLocal`/`StoreLocal` are legal in IR built
    /// against this config, or whether the embedder's decoder only ever
    /// emits SSA values directly.
    pub has_local_operation: bool,
    pub stack_alignment: u32,
    /// Executions through the reference interpreter before a block is
    /// queued for JIT compilation (`spec.md` §4.1 "Hot threshold").
    pub hot_threshold: u32,
    pub cache_max_bytes: usize,
}

impl Config {
    #[must_use]
    pub fn new(loc_start: u64, loc_end: u64) -> Self {
        Config {
            loc_start,
            loc_end,
            ..Config::default()
        }
    }

    #[must_use]
    pub fn with_jit(mut self, enable: bool) -> Self {
        self.enable_jit = enable;
        self
    }

    #[must_use]
    pub fn with_asm_interp(mut self, enable: bool) -> Self {
        self.enable_asm_interp = enable;
        self
    }

    #[must_use]
    pub fn with_global_opts(mut self, opts: Optimizations) -> Self {
        self.global_opts = opts;
        self
    }

    #[must_use]
    pub fn with_hot_threshold(mut self, threshold: u32) -> Self {
        self.hot_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_uniform_buffer_size(mut self, size: usize) -> Self {
        self.uniform_buffer_size = size;
        self
    }

    #[must_use]
    pub fn with_static_uniform_plan(mut self, plan: StaticUniformPlan) -> Self {
        self.static_uniform_plan = plan;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            loc_start: 0,
            loc_end: u64::MAX,
            enable_jit: true,
            enable_asm_interp: true,
            uniform_buffer_size: crate::state::UNIFORM_BUFFER_BYTES,
            backend_isa: BackendIsa::Wasm,
            static_uniform_plan: StaticUniformPlan::NONE,
            global_opts: Optimizations::all(),
            page_table: 0,
            memory_base: 0,
            has_local_operation: true,
            stack_alignment: 16,
            hot_threshold: 10,
            cache_max_bytes: 64 << 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_override_only_the_named_field() {
        let cfg = Config::new(0x1000, 0x2000).with_jit(false).with_hot_threshold(5);
        assert_eq!(cfg.loc_start, 0x1000);
        assert_eq!(cfg.loc_end, 0x2000);
        assert!(!cfg.enable_jit);
        assert_eq!(cfg.hot_threshold, 5);
        assert!(cfg.enable_asm_interp, "unrelated defaults stay put");
    }
}
