//! `EmitInst`: lower one straight-line `Inst` plus its pseudo-op chain
//! (`spec.md` §4.8). Terminal lowering lives in `lower.rs` — this module
//! only ever appends to the current wasm function body, never branches.

use std::collections::HashMap;

use wasm_encoder::{Function, Instruction};
use xlate_ir::{Arg, Inst, InstId, Lambda, OpCode, PseudoOp, ValueId};
use xlate_types::state_abi::state_offset;
use xlate_types::{Flags, HaltReason, Location, ValueType};

use crate::abi::{exit_code, memarg, PARAM_HOST_REG_PTR, PARAM_PAGE_TABLE_PTR, PARAM_STATE_PTR};
use crate::error::CodegenError;
use crate::operand::{binop_instruction, bool_to_i64, emit_arg, ValueLocals};

/// `host_reg_ptr` scratch-area layout: 32 8-byte GPR slots followed by 32
/// 16-byte FPR slots. This area is not part of the `spec.md` §6 `State`
/// layout — it is a Wasm-backend-only realization of "static-uniform"
/// host-register pinning (`SPEC_FULL.md` §D, `DESIGN.md`), copied in/out
/// of the uniform buffer by `xlate-runtime`'s trampoline at `Run`
/// entry/exit.
pub const HOST_GPR_SLOT_BYTES: u32 = 8;
pub const HOST_FPR_AREA_OFFSET: u32 = 32 * HOST_GPR_SLOT_BYTES;
pub const HOST_FPR_SLOT_BYTES: u32 = 16;

/// Decode the `(reg, reg_off)` pair `UniformElimination` packs into a
/// `GetHostGpr`/`SetHostGpr`/`...Fpr` `Imm::U32` argument (`reg |
/// (reg_off << 8)`, see `xlate_ir::opt::uniform_elim::apply`).
fn decode_host_reg(imm: xlate_types::Imm) -> (u32, u32) {
    let packed = imm.as_u64() as u32;
    (packed & 0xFF, packed >> 8)
}

fn width_load(ty: ValueType) -> Instruction<'static> {
    use ValueType::*;
    match ty {
        U8 | Bool => Instruction::I64Load8U(memarg(0, 0)),
        S8 => Instruction::I64Load8S(memarg(0, 0)),
        U16 => Instruction::I64Load16U(memarg(0, 1)),
        S16 => Instruction::I64Load16S(memarg(0, 1)),
        U32 => Instruction::I64Load32U(memarg(0, 2)),
        S32 => Instruction::I64Load32S(memarg(0, 2)),
        _ => Instruction::I64Load(memarg(0, 3)),
    }
}

fn width_store(ty: ValueType) -> Instruction<'static> {
    use ValueType::*;
    match ty {
        U8 | S8 | Bool => Instruction::I64Store8(memarg(0, 0)),
        U16 | S16 => Instruction::I64Store16(memarg(0, 1)),
        U32 | S32 => Instruction::I64Store32(memarg(0, 2)),
        _ => Instruction::I64Store(memarg(0, 3)),
    }
}

fn mask_to_width(f: &mut Function, ty: ValueType) {
    let bits = ty.size_bytes() * 8;
    if bits == 0 || bits >= 64 {
        return;
    }
    let mask = (1u64 << bits) - 1;
    f.instruction(&Instruction::I64Const(mask as i64));
    f.instruction(&Instruction::I64And);
}

fn arg_value_type(arg: &Arg) -> ValueType {
    match arg {
        Arg::Imm(i) => i.value_type(),
        _ => ValueType::U64,
    }
}

fn flags_mask(arg: &Arg) -> Result<Flags, CodegenError> {
    match arg {
        Arg::Flags(f) => Ok(*f),
        _ => Err(CodegenError::UnallocatedValue),
    }
}

/// Store the persisted software-flags word back to `State.host_flags`.
/// Every path that leaves the dispatch loop — a terminal exit or
/// `CallLambda`'s early `return` — must do this so the next call into any
/// compiled unit observes the current flags.
pub fn store_flags_back(f: &mut Function, flags_local: u32) {
    f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
    f.instruction(&Instruction::LocalGet(flags_local));
    f.instruction(&Instruction::I64Store(memarg(state_offset::HOST_FLAGS as u32, 3)));
}

fn emit_lambda(f: &mut Function, vl: &ValueLocals, lambda: Lambda) -> Result<(), CodegenError> {
    match lambda {
        Lambda::Imm(loc) => f.instruction(&Instruction::I64Const(loc.value() as i64)),
        Lambda::Value(v) => f.instruction(&Instruction::LocalGet(vl.local_of(v)?)),
    };
    Ok(())
}

/// Emit one instruction's body and, if it defines a value, store the
/// result into that value's local, then fold any `SaveFlags`/`ClearFlags`
/// pseudo-ops into `flags_local`. `CallLambda` is the one straight-line
/// opcode that diverges: a host-function call that round-trips through the
/// dispatcher (`HaltReason::CALL_HOST`, resolved by
/// `xlate-runtime::Runtime::handle_call_host`) rather than being inlined, so
/// it needs `block_start` and `flags_local` to build a valid exit;
/// `CallDynamic` instead calls the imported host-function trampoline inline
/// and falls through normally.
pub fn emit_inst(
    f: &mut Function,
    inst: &Inst,
    def_index: &HashMap<InstId, ValueId>,
    vl: &ValueLocals,
    flags_local: u32,
    block_start: Location,
    call_host_import: u32,
    push_rsb_import: u32,
) -> Result<(), CodegenError> {
    let dest = def_index.get(&inst.id).copied();
    let args = inst.args();

    match inst.opcode {
        OpCode::LoadImm => {
            let imm = args[0].as_imm().ok_or(CodegenError::UnallocatedValue)?;
            crate::operand::emit_imm(f, imm);
        }
        OpCode::LoadUniform => {
            let u = args[0].as_uniform().ok_or(CodegenError::UnallocatedValue)?;
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            f.instruction(&width_load_at(u.ty, state_offset::UNIFORM_BUFFER_BEGIN as u32 + u.offset));
        }
        OpCode::StoreUniform => {
            let u = args[0].as_uniform().ok_or(CodegenError::UnallocatedValue)?;
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            emit_arg(f, vl, &args[1])?;
            f.instruction(&width_store_at(u.ty, state_offset::UNIFORM_BUFFER_BEGIN as u32 + u.offset));
        }
        OpCode::GetHostGpr => {
            let (reg, reg_off) = decode_host_reg(args[0].as_imm().ok_or(CodegenError::UnallocatedValue)?);
            f.instruction(&Instruction::LocalGet(PARAM_HOST_REG_PTR));
            f.instruction(&Instruction::I64Load(memarg(reg * HOST_GPR_SLOT_BYTES + reg_off, 3)));
        }
        OpCode::SetHostGpr => {
            let (reg, reg_off) = decode_host_reg(args[0].as_imm().ok_or(CodegenError::UnallocatedValue)?);
            f.instruction(&Instruction::LocalGet(PARAM_HOST_REG_PTR));
            emit_arg(f, vl, &args[1])?;
            f.instruction(&Instruction::I64Store(memarg(reg * HOST_GPR_SLOT_BYTES + reg_off, 3)));
        }
        OpCode::GetHostFpr => {
            let (reg, reg_off) = decode_host_reg(args[0].as_imm().ok_or(CodegenError::UnallocatedValue)?);
            f.instruction(&Instruction::LocalGet(PARAM_HOST_REG_PTR));
            f.instruction(&Instruction::I64Load(memarg(
                HOST_FPR_AREA_OFFSET + reg * HOST_FPR_SLOT_BYTES + reg_off,
                3,
            )));
        }
        OpCode::SetHostFpr => {
            let (reg, reg_off) = decode_host_reg(args[0].as_imm().ok_or(CodegenError::UnallocatedValue)?);
            f.instruction(&Instruction::LocalGet(PARAM_HOST_REG_PTR));
            emit_arg(f, vl, &args[1])?;
            f.instruction(&Instruction::I64Store(memarg(
                HOST_FPR_AREA_OFFSET + reg * HOST_FPR_SLOT_BYTES + reg_off,
                3,
            )));
        }
        OpCode::BitCast => {
            emit_arg(f, vl, &args[0])?;
        }
        OpCode::BitExtract => {
            emit_arg(f, vl, &args[0])?;
            let shift = args[1].as_imm().ok_or(CodegenError::UnallocatedValue)?.as_u64();
            if shift != 0 {
                f.instruction(&Instruction::I64Const(shift as i64));
                f.instruction(&Instruction::I64ShrU);
            }
            mask_to_width(f, inst.ret_ty());
        }
        OpCode::Add
        | OpCode::Sub
        | OpCode::And
        | OpCode::Or
        | OpCode::Xor
        | OpCode::Shl
        | OpCode::Shr
        | OpCode::Sar
        | OpCode::Mul
        | OpCode::UDiv
        | OpCode::SDiv => {
            emit_arg(f, vl, &args[0])?;
            emit_arg(f, vl, &args[1])?;
            let instr = binop_instruction(inst.opcode).ok_or(CodegenError::UnsupportedOpcode(inst.opcode))?;
            f.instruction(&instr);
        }
        OpCode::Not => {
            emit_arg(f, vl, &args[0])?;
            f.instruction(&Instruction::I64Const(-1));
            f.instruction(&Instruction::I64Xor);
        }
        OpCode::Neg => {
            f.instruction(&Instruction::I64Const(0));
            emit_arg(f, vl, &args[0])?;
            f.instruction(&Instruction::I64Sub);
        }
        OpCode::Cmp => {
            // Equality comparison: richer predicates are expressed via
            // `Flags`/`TestFlags` on the surrounding arithmetic op, not
            // through `Cmp` itself (`DESIGN.md` Open Question).
            emit_arg(f, vl, &args[0])?;
            emit_arg(f, vl, &args[1])?;
            f.instruction(&Instruction::I64Eq);
            bool_to_i64(f);
        }
        OpCode::Select => {
            emit_arg(f, vl, &args[1])?;
            emit_arg(f, vl, &args[2])?;
            emit_arg(f, vl, &args[0])?;
            f.instruction(&Instruction::I32WrapI64);
            f.instruction(&Instruction::Select);
        }
        OpCode::MemLoad => {
            f.instruction(&Instruction::LocalGet(PARAM_PAGE_TABLE_PTR));
            emit_arg(f, vl, &args[0])?;
            f.instruction(&Instruction::I32WrapI64);
            f.instruction(&Instruction::I32Add);
            f.instruction(&width_load(inst.ret_ty()));
        }
        OpCode::MemStore => {
            f.instruction(&Instruction::LocalGet(PARAM_PAGE_TABLE_PTR));
            emit_arg(f, vl, &args[0])?;
            f.instruction(&Instruction::I32WrapI64);
            f.instruction(&Instruction::I32Add);
            emit_arg(f, vl, &args[1])?;
            f.instruction(&width_store(arg_value_type(&args[1])));
        }
        OpCode::TestFlags => {
            let mask = flags_mask(&args[0])?;
            f.instruction(&Instruction::LocalGet(flags_local));
            f.instruction(&Instruction::I64Const(mask.bits() as i64));
            f.instruction(&Instruction::I64And);
            f.instruction(&Instruction::I64Const(0));
            f.instruction(&Instruction::I64Ne);
            bool_to_i64(f);
        }
        OpCode::TestNotFlags => {
            let mask = flags_mask(&args[0])?;
            f.instruction(&Instruction::LocalGet(flags_local));
            f.instruction(&Instruction::I64Const(mask.bits() as i64));
            f.instruction(&Instruction::I64And);
            f.instruction(&Instruction::I64Eqz);
            bool_to_i64(f);
        }
        OpCode::GetFlags => {
            let mask = flags_mask(&args[0])?;
            f.instruction(&Instruction::LocalGet(flags_local));
            f.instruction(&Instruction::I64Const(mask.bits() as i64));
            f.instruction(&Instruction::I64And);
        }
        OpCode::SaveFlags | OpCode::ClearFlags => {
            // Never appears as a standalone stream entry — always riding
            // the pseudo-op chain, applied below via `apply_pseudo_ops`.
        }
        OpCode::DefineLocal | OpCode::LoadLocal | OpCode::StoreLocal | OpCode::AddPhi => {
            // `LocalElimination` (`spec.md` §4.6 step 1) removes
            // `Define/Load/StoreLocal` entirely and rewrites `AddPhi`'s
            // consumers to its allocated value local, which predecessor
            // blocks populate before branching (`lower.rs`
            // `copy_phi_inputs`) — nothing to emit for the phi def itself.
        }
        OpCode::PushRsb => {
            let loc = args[0].as_imm().ok_or(CodegenError::UnallocatedValue)?.as_u64();
            f.instruction(&Instruction::I64Const(loc as i64));
            f.instruction(&Instruction::Call(push_rsb_import));
        }
        OpCode::CallDynamic => {
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            emit_arg(f, vl, &args[0])?;
            f.instruction(&Instruction::Call(call_host_import));
            f.instruction(&Instruction::Drop);
        }
        OpCode::SetLocation => {
            let lambda = match &args[0] {
                Arg::Lambda(l) => *l,
                _ => return Err(CodegenError::UnallocatedValue),
            };
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            emit_lambda(f, vl, lambda)?;
            f.instruction(&Instruction::I64Store(memarg(state_offset::CURRENT_LOC as u32, 3)));
        }
        OpCode::AdvancePc => {
            let delta = args[0].as_imm().ok_or(CodegenError::UnallocatedValue)?.as_i64();
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            f.instruction(&Instruction::I64Load(memarg(state_offset::CURRENT_LOC as u32, 3)));
            f.instruction(&Instruction::I64Const(delta));
            f.instruction(&Instruction::I64Add);
            f.instruction(&Instruction::I64Store(memarg(state_offset::CURRENT_LOC as u32, 3)));
        }
        OpCode::CallLambda => {
            let lambda = match &args[0] {
                Arg::Lambda(l) => *l,
                _ => return Err(CodegenError::UnallocatedValue),
            };
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            emit_lambda(f, vl, lambda)?;
            f.instruction(&Instruction::I64Store(memarg(state_offset::CURRENT_LOC as u32, 3)));
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            f.instruction(&Instruction::I64Const(block_start.value() as i64));
            f.instruction(&Instruction::I64Store(memarg(state_offset::PREV_LOC as u32, 3)));
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            f.instruction(&Instruction::I32Load(memarg(state_offset::HALT_REASON as u32, 2)));
            f.instruction(&Instruction::I32Const(HaltReason::CALL_HOST.bits() as i32));
            f.instruction(&Instruction::I32Or);
            f.instruction(&Instruction::I32Store(memarg(state_offset::HALT_REASON as u32, 2)));
            store_flags_back(f, flags_local);
            f.instruction(&Instruction::I64Const(exit_code::HALT));
            f.instruction(&Instruction::Return);
        }
    }

    if let Some(dest) = dest {
        let local = vl.local_of(dest)?;
        f.instruction(&Instruction::LocalSet(local));
        apply_pseudo_ops(f, inst, flags_local, local);
    }
    Ok(())
}

fn width_load_at(ty: ValueType, offset: u32) -> Instruction<'static> {
    use ValueType::*;
    match ty {
        U8 | Bool => Instruction::I64Load8U(memarg(offset, 0)),
        S8 => Instruction::I64Load8S(memarg(offset, 0)),
        U16 => Instruction::I64Load16U(memarg(offset, 1)),
        S16 => Instruction::I64Load16S(memarg(offset, 1)),
        U32 => Instruction::I64Load32U(memarg(offset, 2)),
        S32 => Instruction::I64Load32S(memarg(offset, 2)),
        _ => Instruction::I64Load(memarg(offset, 3)),
    }
}

fn width_store_at(ty: ValueType, offset: u32) -> Instruction<'static> {
    use ValueType::*;
    match ty {
        U8 | S8 | Bool => Instruction::I64Store8(memarg(offset, 0)),
        U16 | S16 => Instruction::I64Store16(memarg(offset, 1)),
        U32 | S32 => Instruction::I64Store32(memarg(offset, 2)),
        _ => Instruction::I64Store(memarg(offset, 3)),
    }
}

/// Fold a def's `SaveFlags`/`ClearFlags` pseudo-ops into the function-wide
/// `flags_local`. Only `ZERO`/`NEGATE` are derived exactly from the
/// just-computed result (`spec.md` §3 "Flags"); `CARRY`/`OVERFLOW` are
/// op-specific and this backend leaves them untouched when masked in,
/// which is sound for the guard-condition uses `FlagsElimination` leaves
/// behind (equality/sign checks) but not a full NZCV model
/// (`DESIGN.md` Open Question).
fn apply_pseudo_ops(f: &mut Function, inst: &Inst, flags_local: u32, result_local: u32) {
    for pseudo in inst.pseudo_ops() {
        match pseudo {
            PseudoOp::ClearFlags(mask) => {
                f.instruction(&Instruction::LocalGet(flags_local));
                f.instruction(&Instruction::I64Const(!(mask.bits() as i64)));
                f.instruction(&Instruction::I64And);
                f.instruction(&Instruction::LocalSet(flags_local));
            }
            PseudoOp::SaveFlags(mask) => {
                let zero_bit = mask.intersects(Flags::ZERO);
                let negate_bit = mask.intersects(Flags::NEGATE);
                if !zero_bit && !negate_bit {
                    continue;
                }
                f.instruction(&Instruction::LocalGet(flags_local));
                f.instruction(&Instruction::I64Const(!(mask.bits() as i64)));
                f.instruction(&Instruction::I64And);

                if zero_bit {
                    f.instruction(&Instruction::LocalGet(result_local));
                    f.instruction(&Instruction::I64Eqz);
                    bool_to_i64(f);
                    f.instruction(&Instruction::I64Const(Flags::ZERO.bits() as i64));
                    f.instruction(&Instruction::I64Mul);
                    f.instruction(&Instruction::I64Or);
                }
                if negate_bit {
                    let bits = inst.ret_ty().size_bytes().max(1) * 8;
                    let sign_bit = if bits >= 64 { 1u64 << 63 } else { 1u64 << (bits - 1) };
                    f.instruction(&Instruction::LocalGet(result_local));
                    f.instruction(&Instruction::I64Const(sign_bit as i64));
                    f.instruction(&Instruction::I64And);
                    f.instruction(&Instruction::I64Const(0));
                    f.instruction(&Instruction::I64Ne);
                    bool_to_i64(f);
                    f.instruction(&Instruction::I64Const(Flags::NEGATE.bits() as i64));
                    f.instruction(&Instruction::I64Mul);
                    f.instruction(&Instruction::I64Or);
                }
                f.instruction(&Instruction::LocalSet(flags_local));
            }
        }
    }
}
