//! Errors an interpreted block can raise that are guest-data-dependent
//! rather than builder-time programmer errors (`spec.md` §7): these map to
//! a `HaltReason` at the `xlate-runtime` boundary instead of panicking.

use xlate_ir::OpCode;

#[derive(Debug, thiserror::Error)]
pub enum InterpError {
    #[error("integer division by zero in {0:?}")]
    DivideByZero(OpCode),

    #[error("{0:?} is not supported by the reference interpreter")]
    UnsupportedOpcode(OpCode),

    #[error("value read before being defined")]
    UndefinedValue,

    #[error("a phi was reached with no recorded predecessor block")]
    PhiWithoutPredecessor,
}
