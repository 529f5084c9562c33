//! `EmitOperand`: push the wasm instructions that compute one `Arg` onto
//! the value stack (`spec.md` §4.8). Every scalar `ValueType` lives in an
//! `i64` wasm local regardless of its declared width — narrower types are
//! masked/extended at the instructions that actually care about width
//! (loads, stores, flags) rather than at materialization time, mirroring
//! how the teacher's Wasm backend keeps CPU registers as full `i64`
//! locals and narrows only where ISA semantics require it.

use std::collections::HashMap;

use wasm_encoder::{Function, Instruction, ValType};
use xlate_ir::{Arg, OpCode, ValueId};
use xlate_types::{Imm, OperandOp, ValueType};

use crate::error::CodegenError;

/// Per-function value-to-local mapping `EmitOperand`/`EmitInst` read from.
pub struct ValueLocals<'a> {
    pub locals: &'a HashMap<ValueId, u32>,
}

impl ValueLocals<'_> {
    pub fn local_of(&self, v: ValueId) -> Result<u32, CodegenError> {
        self.locals.get(&v).copied().ok_or(CodegenError::UnallocatedValue)
    }
}

#[must_use]
pub fn wasm_local_type(ty: ValueType) -> Result<ValType, CodegenError> {
    if ty.is_vector() {
        if ty.size_bytes() > 16 {
            return Err(CodegenError::UnsupportedValueType(ty));
        }
        Ok(ValType::V128)
    } else {
        Ok(ValType::I64)
    }
}

pub fn emit_imm(f: &mut Function, imm: Imm) {
    f.instruction(&Instruction::I64Const(imm.as_u64() as i64));
}

/// Push `arg`'s value onto the stack as an `i64` (the FPR/vector class is
/// only ever moved through loads and stores in this backend, never
/// through an `Operand` combinator — `Operand` is scalar-only per
/// `spec.md` §3).
pub fn emit_arg(f: &mut Function, vl: &ValueLocals, arg: &Arg) -> Result<(), CodegenError> {
    match arg {
        Arg::Value(v) | Arg::Cond(v) => {
            f.instruction(&Instruction::LocalGet(vl.local_of(*v)?));
            Ok(())
        }
        Arg::Imm(imm) => {
            emit_imm(f, *imm);
            Ok(())
        }
        Arg::Operand(op) => emit_operand(f, vl, op),
        Arg::Void => Ok(()),
        _ => Err(CodegenError::UnallocatedValue),
    }
}

/// Lower a compound `{left, op, right}` operand (`spec.md` §3). `Ext` is
/// treated as `Lsl` (there is no narrower-than-`i64` wasm integer type to
/// zero/sign-extend out of, since every scalar already lives in a full
/// `i64` local) — a deliberate simplification recorded in `DESIGN.md`.
fn emit_operand(f: &mut Function, vl: &ValueLocals, op: &xlate_ir::Operand) -> Result<(), CodegenError> {
    emit_arg(f, vl, op.left())?;
    if let Some(right) = op.right() {
        emit_arg(f, vl, right)?;
        let instr = match op.op {
            OperandOp::None => unreachable!("OperandOp::None never carries a right operand"),
            OperandOp::Plus => Instruction::I64Add,
            OperandOp::Minus => Instruction::I64Sub,
            OperandOp::Lsl | OperandOp::Ext => Instruction::I64Shl,
            OperandOp::Lsr => Instruction::I64ShrU,
        };
        f.instruction(&instr);
    }
    Ok(())
}

/// `i32` boolean at the top of the stack -> this backend's canonical
/// zero-extended `i64` boolean representation.
pub fn bool_to_i64(f: &mut Function) {
    f.instruction(&Instruction::I64ExtendI32U);
}

/// Map an `OpCode::meta().arity == 2` arithmetic/logic opcode to its wasm
/// binary instruction. Division opcodes trap on divide-by-zero exactly as
/// wasm's `div` instructions already do, matching `spec.md` §4.8's note
/// that divide faults surface as a host-visible halt rather than as a
/// silently-wrong result.
#[must_use]
pub fn binop_instruction(op: OpCode) -> Option<Instruction<'static>> {
    use OpCode::*;
    Some(match op {
        Add => Instruction::I64Add,
        Sub => Instruction::I64Sub,
        And => Instruction::I64And,
        Or => Instruction::I64Or,
        Xor => Instruction::I64Xor,
        Shl => Instruction::I64Shl,
        Shr => Instruction::I64ShrU,
        Sar => Instruction::I64ShrS,
        Mul => Instruction::I64Mul,
        UDiv => Instruction::I64DivU,
        SDiv => Instruction::I64DivS,
        _ => return None,
    })
}
