//! Thin facade re-exporting `xlate-runtime`'s public surface
//! (`SPEC_FULL.md` §A), mirroring the teacher's `aero-jit` → `aero-jit-x86`
//! split: embedders depend on this crate alone and never name the
//! individual workspace members.

pub use xlate_runtime::*;
