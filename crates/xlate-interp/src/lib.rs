//! The tier-0 reference interpreter (`spec.md` §4.1 "Hot threshold",
//! `SPEC_FULL.md` §D.5): walks a `xlate_ir::Function` instruction by
//! instruction with no codegen step, so a cold block executes correctly
//! the first time it's ever reached, before `Config.hot_threshold`
//! executions promote it to `xlate-codegen`'s Wasm lowering.
//!
//! Depends only on `xlate-types` and `xlate-ir`. `spec.md` §1 allows an
//! implementation to omit this fallback entirely; this workspace keeps it
//! as a standalone, independently tested reference semantics for the IR
//! (`spec.md` §8's round-trip and for-all properties are exercised against
//! it directly) rather than wiring `Config.hot_threshold`-driven tiering
//! into `xlate-runtime::Runtime::dispatch_one` (`DESIGN.md` Open Question).

mod error;
mod interpreter;

pub use error::InterpError;
pub use interpreter::{GuestMemory, HostCallback, Interpreter, StepOutcome};
