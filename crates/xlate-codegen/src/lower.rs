//! `LowerFunction`: turn a whole `xlate_ir::Function` into one Wasm module
//! (`spec.md` §4.8, `SPEC_FULL.md` §B). Every `Block` becomes its own
//! exported function under `abi::block_export_name`, the natural codegen
//! unit on this backend: values are kept in ordinary Wasm locals (the
//! `regalloc` module's linear-scan `RegisterAllocator` targets a physical
//! host-register bank and is not invoked here — `DESIGN.md`), and
//! block-linkage is expressed as ordinary Wasm `call`s (`Terminal::LinkBlock`
//! to a block in the same module) or a host round-trip (cross-module / not
//! yet translated).
//!
//! Because each block is its own function, wasm locals don't survive a
//! block boundary — a `Value` defined in one block and used in another
//! (every `AddPhi` result, and any ordinary value `UniformElimination`'s
//! dominance reasoning didn't confine to one block) has no home in a plain
//! local. Those values are instead assigned a fixed 8-byte slot in
//! `State.local_buffer` (`abi::PARAM_LOCAL_BUFFER_PTR`) and round-tripped
//! through it: a defining block stores to the slot right after computing
//! the value, a consuming block loads from the slot in its prologue, and a
//! block with successors that have `AddPhi`s copies the selected incoming
//! slot into the phi's slot just before branching (`copy_phi_inputs`).

use std::collections::{BTreeSet, HashMap, HashSet};

use wasm_encoder::{
    BlockType, CodeSection, EntityType, ExportKind, ExportSection, Function, FunctionSection,
    ImportSection, Instruction, MemoryType, Module, TypeSection, ValType,
};
use xlate_ir::{Arg, Block, BlockId, Function as IrFunction, InstId, OpCode, Terminal, ValueId};
use xlate_types::state_abi::state_offset;
use xlate_types::{HaltReason, Location};

use crate::abi::{self, exit_code, memarg, PARAM_COUNT, PARAM_LOCAL_BUFFER_PTR, PARAM_STATE_PTR};
use crate::error::CodegenError;
use crate::inst_lower::{emit_inst, store_flags_back};
use crate::operand::{wasm_local_type, ValueLocals};

/// Byte width of one cross-block slot. Vector-typed values are rejected
/// from crossing a block boundary (`find_cross_block_values`) so every
/// slot only ever needs to hold a plain `i64`.
const SLOT_BYTES: u32 = 8;

/// Lower a whole function to a self-contained Wasm module: one imported
/// memory, one imported host-call trampoline, and one exported function
/// per `Function` block, all sharing the `(state_ptr, page_table_ptr,
/// host_reg_ptr, local_buffer_ptr) -> i64` signature (`abi.rs`).
pub fn lower_function(func: &IrFunction) -> Result<Vec<u8>, CodegenError> {
    let def_index = build_def_index(func);
    let blocks: Vec<(Location, BlockId)> = func.blocks_in_order().collect();
    if func.find_block_at(func.start).is_none() {
        return Err(CodegenError::MissingEntryBlock);
    }
    let cross_block = find_cross_block_values(func, &def_index)?;
    let slots = assign_slots(&cross_block);

    let mut block_index: HashMap<BlockId, u32> = HashMap::new();
    for (i, (_, id)) in blocks.iter().enumerate() {
        block_index.insert(*id, 1 + i as u32);
    }

    let mut module = Module::new();

    let mut types = TypeSection::new();
    let block_ty = types.len();
    types.ty().function([ValType::I32; 4], [ValType::I64]);
    let call_host_ty = types.len();
    types.ty().function([ValType::I32, ValType::I64], [ValType::I64]);
    let push_rsb_ty = types.len();
    types.ty().function([ValType::I64], []);
    module.section(&types);

    let mut imports = ImportSection::new();
    imports.import(
        abi::IMPORT_MODULE,
        abi::IMPORT_MEMORY,
        MemoryType {
            minimum: abi::MEMORY_PAGES,
            maximum: Some(abi::MEMORY_PAGES),
            memory64: false,
            shared: false,
            page_size_log2: None,
        },
    );
    imports.import(abi::IMPORT_MODULE, abi::IMPORT_CALL_HOST, EntityType::Function(call_host_ty));
    imports.import(abi::IMPORT_MODULE, abi::IMPORT_PUSH_RSB, EntityType::Function(push_rsb_ty));
    module.section(&imports);
    let call_host_import: u32 = 0;
    let push_rsb_import: u32 = 1;

    let mut functions = FunctionSection::new();
    for _ in &blocks {
        functions.function(block_ty);
    }
    module.section(&functions);

    let mut exports = ExportSection::new();
    for (i, (loc, _)) in blocks.iter().enumerate() {
        exports.export(&abi::block_export_name(*loc), ExportKind::Func, 1 + i as u32);
    }
    module.section(&exports);

    let mut code = CodeSection::new();
    for (loc, id) in &blocks {
        let f = lower_block(
            func,
            *id,
            *loc,
            &def_index,
            &cross_block,
            &slots,
            call_host_import,
            push_rsb_import,
            &block_index,
        )?;
        code.function(&f);
    }
    module.section(&code);

    Ok(module.finish())
}

fn build_def_index(func: &IrFunction) -> HashMap<InstId, ValueId> {
    func.values_iter().map(|(id, v)| (v.def, id)).collect()
}

fn def_block_map(func: &IrFunction, def_index: &HashMap<InstId, ValueId>) -> HashMap<ValueId, BlockId> {
    let mut out = HashMap::new();
    for (_, id) in func.blocks_in_order() {
        for inst in func.block(id).insts() {
            if let Some(&v) = def_index.get(&inst.id) {
                out.insert(v, id);
            }
        }
    }
    out
}

fn collect_arg_values(arg: &Arg, out: &mut Vec<ValueId>) {
    match arg {
        Arg::Value(v) | Arg::Cond(v) => out.push(*v),
        Arg::Params(vs) => out.extend(vs.iter().copied()),
        Arg::Operand(op) => {
            collect_arg_values(op.left(), out);
            if let Some(right) = op.right() {
                collect_arg_values(right, out);
            }
        }
        _ => {}
    }
}

fn terminal_value_refs(t: &Terminal, out: &mut Vec<ValueId>) {
    match t {
        Terminal::If { cond, then_, else_ } => {
            out.push(*cond);
            terminal_value_refs(then_, out);
            terminal_value_refs(else_, out);
        }
        Terminal::Switch { value, cases, default } => {
            out.push(*value);
            for (_, case) in cases {
                terminal_value_refs(case, out);
            }
            terminal_value_refs(default, out);
        }
        Terminal::CheckHalt { else_ } => terminal_value_refs(else_, out),
        _ => {}
    }
}

/// A value crosses a block boundary if any use of it (in a straight-line
/// instruction's args, or in a terminal's condition/switch value) is
/// observed in a block other than its defining block, or if it is itself
/// an `AddPhi` result — the phi's own producers are other blocks by
/// construction, even on the first pass where the phi's value hasn't yet
/// been used anywhere.
fn find_cross_block_values(
    func: &IrFunction,
    def_index: &HashMap<InstId, ValueId>,
) -> Result<HashSet<ValueId>, CodegenError> {
    let def_block = def_block_map(func, def_index);
    let mut cross = HashSet::new();

    for (_, id) in func.blocks_in_order() {
        let block = func.block(id);
        for inst in block.insts() {
            if inst.opcode == OpCode::AddPhi {
                if let Some(&v) = def_index.get(&inst.id) {
                    cross.insert(v);
                }
                continue;
            }
            for arg in inst.args() {
                let mut used = Vec::new();
                collect_arg_values(arg, &mut used);
                for v in used {
                    if def_block.get(&v).copied() != Some(id) {
                        cross.insert(v);
                    }
                }
            }
        }
        let mut t_refs = Vec::new();
        terminal_value_refs(block.terminal(), &mut t_refs);
        for v in t_refs {
            if def_block.get(&v).copied() != Some(id) {
                cross.insert(v);
            }
        }
    }

    for &v in &cross {
        if func.value(v).ty.is_vector() {
            return Err(CodegenError::UnsupportedValueType(func.value(v).ty));
        }
    }
    Ok(cross)
}

fn assign_slots(cross: &HashSet<ValueId>) -> HashMap<ValueId, u32> {
    let mut ids: Vec<_> = cross.iter().copied().collect();
    ids.sort_by_key(|v| v.0);
    ids.into_iter().enumerate().map(|(i, v)| (v, i as u32)).collect()
}

fn load_cross(f: &mut Function, slot: u32, dest_local: u32) {
    f.instruction(&Instruction::LocalGet(PARAM_LOCAL_BUFFER_PTR));
    f.instruction(&Instruction::I64Load(memarg(slot * SLOT_BYTES, 3)));
    f.instruction(&Instruction::LocalSet(dest_local));
}

fn store_cross(f: &mut Function, slot: u32, src_local: u32) {
    f.instruction(&Instruction::LocalGet(PARAM_LOCAL_BUFFER_PTR));
    f.instruction(&Instruction::LocalGet(src_local));
    f.instruction(&Instruction::I64Store(memarg(slot * SLOT_BYTES, 3)));
}

/// Copy the selected incoming value straight between buffer slots (bypassing
/// locals entirely) for every `AddPhi` at the head of `succ`, for the edge
/// `pred -> succ`. Every `AddPhi` incoming value is itself cross-block (it
/// feeds a phi outside its own defining block) so it already owns a slot,
/// whichever block defined it.
fn copy_phi_inputs(
    f: &mut Function,
    func: &IrFunction,
    pred: BlockId,
    succ: BlockId,
    def_index: &HashMap<InstId, ValueId>,
    slots: &HashMap<ValueId, u32>,
) -> Result<(), CodegenError> {
    let succ_block = func.block(succ);
    let Some(pred_index) = succ_block.preds.iter().position(|&p| p == pred) else {
        return Ok(());
    };
    for inst in succ_block.insts() {
        if inst.opcode != OpCode::AddPhi {
            continue;
        }
        let Arg::Params(incoming) = &inst.args()[0] else {
            return Err(CodegenError::UnallocatedValue);
        };
        let src = *incoming.get(pred_index).ok_or(CodegenError::UnallocatedValue)?;
        let dest = *def_index.get(&inst.id).ok_or(CodegenError::UnallocatedValue)?;
        let src_slot = *slots.get(&src).ok_or(CodegenError::UnallocatedValue)?;
        let dest_slot = *slots.get(&dest).ok_or(CodegenError::UnallocatedValue)?;

        f.instruction(&Instruction::LocalGet(PARAM_LOCAL_BUFFER_PTR));
        f.instruction(&Instruction::LocalGet(PARAM_LOCAL_BUFFER_PTR));
        f.instruction(&Instruction::I64Load(memarg(src_slot * SLOT_BYTES, 3)));
        f.instruction(&Instruction::I64Store(memarg(dest_slot * SLOT_BYTES, 3)));
    }
    Ok(())
}

fn lower_block(
    func: &IrFunction,
    id: BlockId,
    start: Location,
    def_index: &HashMap<InstId, ValueId>,
    cross_block: &HashSet<ValueId>,
    slots: &HashMap<ValueId, u32>,
    call_host_import: u32,
    push_rsb_import: u32,
    block_index: &HashMap<BlockId, u32>,
) -> Result<Function, CodegenError> {
    let block = func.block(id);

    let mut referenced: BTreeSet<ValueId> = BTreeSet::new();
    for inst in block.insts() {
        if let Some(&v) = def_index.get(&inst.id) {
            referenced.insert(v);
        }
        if inst.opcode == OpCode::AddPhi {
            continue;
        }
        for arg in inst.args() {
            let mut used = Vec::new();
            collect_arg_values(arg, &mut used);
            referenced.extend(used);
        }
    }
    let mut t_refs = Vec::new();
    terminal_value_refs(block.terminal(), &mut t_refs);
    referenced.extend(t_refs);

    let mut value_locals: HashMap<ValueId, u32> = HashMap::new();
    let mut wasm_locals: Vec<(u32, ValType)> = Vec::new();
    let mut next_local = PARAM_COUNT;
    for &v in &referenced {
        let ty = func.value(v).ty;
        wasm_locals.push((1, wasm_local_type(ty)?));
        value_locals.insert(v, next_local);
        next_local += 1;
    }
    let flags_local = next_local;
    wasm_locals.push((1, ValType::I64));

    let mut f = Function::new(wasm_locals);
    let vl = ValueLocals { locals: &value_locals };

    f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
    f.instruction(&Instruction::I64Load(memarg(state_offset::HOST_FLAGS as u32, 3)));
    f.instruction(&Instruction::LocalSet(flags_local));

    for &v in &referenced {
        if !cross_block.contains(&v) {
            continue;
        }
        let def_inst = func.value(v).def;
        let defined_here_non_phi = block.insts().iter().any(|i| i.id == def_inst && i.opcode != OpCode::AddPhi);
        if defined_here_non_phi {
            continue;
        }
        let slot = slots[&v];
        load_cross(&mut f, slot, value_locals[&v]);
    }

    for inst in block.insts() {
        if inst.opcode == OpCode::AddPhi {
            continue;
        }
        emit_inst(&mut f, inst, def_index, &vl, flags_local, start, call_host_import, push_rsb_import)?;
        if let Some(&dest) = def_index.get(&inst.id) {
            if cross_block.contains(&dest) {
                store_cross(&mut f, slots[&dest], value_locals[&dest]);
            }
        }
    }

    lower_terminal(
        &mut f,
        func,
        id,
        block.terminal(),
        &vl,
        def_index,
        slots,
        flags_local,
        block_index,
        start,
    )?;
    f.instruction(&Instruction::Return);
    f.instruction(&Instruction::End);
    Ok(f)
}

fn emit_block_linkage_halt(f: &mut Function, from: Location, to: Location, flags_local: u32) {
    f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
    f.instruction(&Instruction::I64Const(to.value() as i64));
    f.instruction(&Instruction::I64Store(memarg(state_offset::CURRENT_LOC as u32, 3)));

    f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
    f.instruction(&Instruction::I64Const(from.value() as i64));
    f.instruction(&Instruction::I64Store(memarg(state_offset::PREV_LOC as u32, 3)));

    f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
    f.instruction(&Instruction::I64Const(from.value() as i64));
    f.instruction(&Instruction::I64Store(memarg(state_offset::BLOCKING_LINKAGE_ADDR as u32, 3)));

    f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
    f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
    f.instruction(&Instruction::I32Load(memarg(state_offset::HALT_REASON as u32, 2)));
    f.instruction(&Instruction::I32Const(HaltReason::BLOCK_LINKAGE.bits() as i32));
    f.instruction(&Instruction::I32Or);
    f.instruction(&Instruction::I32Store(memarg(state_offset::HALT_REASON as u32, 2)));

    store_flags_back(f, flags_local);
    f.instruction(&Instruction::I64Const(exit_code::HALT));
}

/// Lower one terminal, recursing through `If`/`Switch`/`CheckHalt`'s nested
/// arms. Never emits the function-level `Return` itself — every arm leaves
/// exactly one `i64` on the stack; `lower_block` emits the single trailing
/// `return` once the whole terminal tree has been walked.
#[allow(clippy::too_many_arguments)]
fn lower_terminal(
    f: &mut Function,
    func: &IrFunction,
    this_block: BlockId,
    terminal: &Terminal,
    vl: &ValueLocals,
    def_index: &HashMap<InstId, ValueId>,
    slots: &HashMap<ValueId, u32>,
    flags_local: u32,
    block_index: &HashMap<BlockId, u32>,
    start: Location,
) -> Result<(), CodegenError> {
    match terminal {
        Terminal::Invalid => Err(CodegenError::UnclosedBlock),
        Terminal::ReturnToDispatch => {
            f.instruction(&Instruction::I64Const(exit_code::RETURN_TO_DISPATCH));
            Ok(())
        }
        Terminal::ReturnToHost => {
            f.instruction(&Instruction::I64Const(exit_code::RETURN_TO_HOST));
            Ok(())
        }
        Terminal::PopRsbHint => {
            f.instruction(&Instruction::I64Const(exit_code::POP_RSB_HINT));
            Ok(())
        }
        Terminal::LinkBlock { next } | Terminal::LinkBlockFast { next } => {
            match func.find_block_at(*next) {
                Some(target) => {
                    copy_phi_inputs(f, func, this_block, target, def_index, slots)?;
                    store_flags_back(f, flags_local);
                    let target_index = *block_index.get(&target).ok_or(CodegenError::MissingEntryBlock)?;
                    f.instruction(&Instruction::Call(target_index));
                    Ok(())
                }
                None => {
                    emit_block_linkage_halt(f, start, *next, flags_local);
                    Ok(())
                }
            }
        }
        Terminal::If { cond, then_, else_ } => {
            f.instruction(&Instruction::LocalGet(vl.local_of(*cond)?));
            f.instruction(&Instruction::I32WrapI64);
            f.instruction(&Instruction::If(BlockType::Result(ValType::I64)));
            lower_terminal(f, func, this_block, then_, vl, def_index, slots, flags_local, block_index, start)?;
            f.instruction(&Instruction::Else);
            lower_terminal(f, func, this_block, else_, vl, def_index, slots, flags_local, block_index, start)?;
            f.instruction(&Instruction::End);
            Ok(())
        }
        Terminal::Switch { value, cases, default } => {
            lower_switch_chain(f, func, this_block, *value, cases, default, vl, def_index, slots, flags_local, block_index, start)
        }
        Terminal::CheckHalt { else_ } => {
            f.instruction(&Instruction::LocalGet(PARAM_STATE_PTR));
            f.instruction(&Instruction::I32Load(memarg(state_offset::HALT_REASON as u32, 2)));
            f.instruction(&Instruction::I32Const(0));
            f.instruction(&Instruction::I32Ne);
            f.instruction(&Instruction::If(BlockType::Result(ValType::I64)));
            f.instruction(&Instruction::I64Const(exit_code::HALT));
            f.instruction(&Instruction::Else);
            lower_terminal(f, func, this_block, else_, vl, def_index, slots, flags_local, block_index, start)?;
            f.instruction(&Instruction::End);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn lower_switch_chain(
    f: &mut Function,
    func: &IrFunction,
    this_block: BlockId,
    value: ValueId,
    cases: &[(xlate_types::Imm, Terminal)],
    default: &Terminal,
    vl: &ValueLocals,
    def_index: &HashMap<InstId, ValueId>,
    slots: &HashMap<ValueId, u32>,
    flags_local: u32,
    block_index: &HashMap<BlockId, u32>,
    start: Location,
) -> Result<(), CodegenError> {
    match cases.split_first() {
        None => lower_terminal(f, func, this_block, default, vl, def_index, slots, flags_local, block_index, start),
        Some(((imm, term), rest)) => {
            f.instruction(&Instruction::LocalGet(vl.local_of(value)?));
            f.instruction(&Instruction::I64Const(imm.as_i64()));
            f.instruction(&Instruction::I64Eq);
            f.instruction(&Instruction::If(BlockType::Result(ValType::I64)));
            lower_terminal(f, func, this_block, term, vl, def_index, slots, flags_local, block_index, start)?;
            f.instruction(&Instruction::Else);
            lower_switch_chain(f, func, this_block, value, rest, default, vl, def_index, slots, flags_local, block_index, start)?;
            f.instruction(&Instruction::End);
            Ok(())
        }
    }
}
