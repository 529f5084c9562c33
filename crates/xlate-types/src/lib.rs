//! Leaf value types shared across the translator workspace: the guest
//! `Location`, the typed-IR `ValueType`/`Imm`/`Flags`, the host-function
//! `ParamType`, and the `Operand` combinator tag.
//!
//! Nothing in this crate depends on the IR, the memory subsystem, or the
//! runtime — it is the bottom of the dependency graph (`SPEC_FULL.md` §A).

mod flags;
mod imm;
mod location;
mod operand;
mod param_type;
pub mod state_abi;
mod value_type;

pub use flags::{Flags, HaltReason, Optimizations};
pub use imm::Imm;
pub use location::Location;
pub use operand::OperandOp;
pub use param_type::{signature_hash, ParamType};
pub use value_type::ValueType;
