//! Address-space/module/code-cache management, the L1/L2 translate tables,
//! the `State` ABI, the RSB, the trampoline layer, and the host dispatch
//! loop (`spec.md` §1 "Execution dispatch core" and "Address-space/module/
//! code-cache management", §4.1-§4.3, §4.9, §5, §6).
//!
//! Depends on `xlate-types`, `xlate-ir`, and `xlate-codegen`; sits at the
//! top of the workspace's dependency graph (`SPEC_FULL.md` §A) — the root
//! `xlate` facade crate re-exports this crate's public surface unchanged.

mod address_space;
mod code_cache;
mod config;
mod error;
mod host_function;
mod layout;
mod module;
mod rsb;
mod runtime;
mod state;
mod trampolines;
mod translate_table;

pub use address_space::AddressSpace;
pub use code_cache::{CodeCache, CompiledBlock};
pub use config::{BackendIsa, Config};
pub use error::{Result, XlateError};
pub use host_function::{HostFn, HostFunction};
pub use module::{Module, ModuleConfig, RangeLock, RangeLockRegistry, Translator};
pub use rsb::Rsb;
pub use runtime::{InterruptHandle, Runtime};
pub use state::{State, UNIFORM_BUFFER_BYTES};
pub use trampolines::Trampolines;
pub use translate_table::{SharedTranslateTable, TranslateTable};

pub use xlate_types::{HaltReason, Location};
