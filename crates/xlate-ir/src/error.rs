use thiserror::Error;

use crate::OpCode;

/// Recoverable IR-construction failures.
///
/// `spec.md` §7 draws a hard line: argument-arity/kind mismatches detected
/// by validation are **programmer errors** and panic (`debug_assert!` in
/// `Inst::validate`), never surfaced here. `IrError` is reserved for
/// conditions a caller can legitimately hit at runtime — an unsupported
/// opcode reaching codegen, or a CFG malformed by a decoder bug the builder
/// itself cannot rule out structurally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrError {
    #[error("block at {0:?} already has a terminal; cannot append further instructions")]
    BlockAlreadyClosed(xlate_types::Location),
    #[error("opcode {0:?} has no lowering and cannot be compiled")]
    UnsupportedOpcode(OpCode),
    #[error("function has no block starting at the declared entry location")]
    MissingEntryBlock,
}
