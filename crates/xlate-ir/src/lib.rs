//! The typed IR, the HIR container/builder, CFG analysis, the fixed
//! optimization pipeline, and the linear-scan register allocator
//! (`spec.md` §3, §4.4-§4.7).
//!
//! Depends only on `xlate-types`; produces the data the codegen crate
//! (`xlate-codegen`) walks to lower to host/Wasm instructions.

mod arg;
mod block;
mod builder;
mod cfg;
mod error;
mod function;
mod inst;
mod local;
mod opcode;
pub mod opt;
mod operand;
mod regalloc;
mod uniform;
mod value;

pub use arg::Arg;
pub use block::{Block, BlockId, JitCache, JitCacheState, Terminal};
pub use builder::HirBuilder;
pub use cfg::CfgAnalysis;
pub use error::IrError;
pub use function::{Function, HirFunction};
pub use inst::{Inst, InstId, PseudoOp};
pub use local::Local;
pub use opcode::{IrMeta, OpCode};
pub use operand::Operand;
pub use regalloc::{Allocation, RegisterAllocator, RegisterFile};
pub use uniform::Uniform;
pub use value::{Lambda, Value, ValueId};

pub use xlate_types::{Flags, Imm, Location, OperandOp, ParamType, ValueType};
