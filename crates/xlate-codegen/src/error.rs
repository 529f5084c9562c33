use thiserror::Error;
use xlate_ir::OpCode;

/// Recoverable lowering failures (`spec.md` §4.8 "Unsupported opcodes
/// PANIC; the host loop treats an emission failure as `IllegalCode`").
/// `xlate-runtime`'s host loop maps any `Err` here straight to
/// `HaltReason::ILLEGAL_CODE` rather than panicking, since a decoder bug or
/// an opcode this backend hasn't grown support for yet is a guest-triggered,
/// recoverable condition rather than a programmer error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodegenError {
    #[error("opcode {0:?} has no Wasm lowering")]
    UnsupportedOpcode(OpCode),
    #[error("value type is wider than this backend's 128-bit vector lane ({0:?})")]
    UnsupportedValueType(xlate_types::ValueType),
    #[error("function has no block starting at its declared entry location")]
    MissingEntryBlock,
    #[error("block references a value with no recorded local allocation")]
    UnallocatedValue,
    #[error("block has no terminal (Terminal::Invalid reached codegen)")]
    UnclosedBlock,
}
