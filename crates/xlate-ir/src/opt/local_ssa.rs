use std::collections::{HashMap, HashSet};

use crate::block::BlockId;
use crate::cfg::CfgAnalysis;
use crate::function::Function;
use crate::inst::Inst;
use crate::value::ValueId;
use crate::{Arg, OpCode};
use xlate_types::{Imm, ValueType};

use super::recompute_use_counts;

/// Local→SSA construction (`spec.md` §4.6 step 1): same-block forwarding
/// plus φ insertion at the iterated dominance frontier of each local's
/// store set. After this pass, `DefineLocal`/`LoadLocal`/`StoreLocal` are
/// absent from the function (`spec.md` §8 invariant).
pub fn local_elimination(func: &mut Function) {
    let entry = func.entry();
    let cfg = CfgAnalysis::compute(func, entry);
    let reachable: Vec<BlockId> = cfg.rpo.clone();
    if reachable.is_empty() {
        return;
    }

    let df = dominance_frontier(func, &reachable, &cfg);

    // Collect each local's defining blocks and its declared type.
    let mut def_blocks: HashMap<u32, HashSet<BlockId>> = HashMap::new();
    let mut local_ty: HashMap<u32, ValueType> = HashMap::new();
    for &b in &reachable {
        for inst in func.block(b).insts() {
            if inst.opcode == OpCode::StoreLocal {
                if let Some(local) = inst.args()[0].as_local() {
                    def_blocks.entry(local.id).or_default().insert(b);
                    local_ty.insert(local.id, local.ty);
                }
            }
        }
    }

    // Iterated dominance frontier: which (block, local) pairs need a phi.
    let mut phi_needed: HashMap<BlockId, HashSet<u32>> = HashMap::new();
    for (&local_id, defs) in &def_blocks {
        let mut worklist: Vec<BlockId> = defs.iter().copied().collect();
        let mut has_phi: HashSet<BlockId> = HashSet::new();
        while let Some(n) = worklist.pop() {
            if let Some(frontier) = df.get(&n) {
                for &b in frontier {
                    if has_phi.insert(b) {
                        phi_needed.entry(b).or_default().insert(local_id);
                        worklist.push(b);
                    }
                }
            }
        }
    }

    // Pre-insert phi instructions at block heads, recording their ValueId.
    let mut phi_value: HashMap<(BlockId, u32), ValueId> = HashMap::new();
    for (&b, locals) in &phi_needed {
        for &local_id in locals {
            let ty = local_ty.get(&local_id).copied().unwrap_or(ValueType::U64);
            let inst_id = func.alloc_inst_id();
            let inst = Inst::new(inst_id, OpCode::AddPhi, vec![Arg::Params(Vec::new())]);
            let value = func.alloc_value(inst_id, ty);
            func.block_mut(b).insts_mut().insert(0, inst);
            phi_value.insert((b, local_id), value);
        }
    }

    // Dominator-tree rename pass.
    let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for &b in &reachable {
        if let Some(p) = cfg.idom(b) {
            children.entry(p).or_default().push(b);
        }
    }

    let mut stacks: HashMap<u32, Vec<ValueId>> = HashMap::new();
    let mut exit_def: HashMap<BlockId, HashMap<u32, ValueId>> = HashMap::new();
    let mut replace: HashMap<ValueId, ValueId> = HashMap::new();

    rename(
        entry,
        func,
        &children,
        &mut stacks,
        &mut exit_def,
        &phi_value,
        &local_ty,
        &mut replace,
    );

    // Second pass: fill in phi incoming operands from each CFG predecessor's
    // reaching definition at exit.
    for (&(block, local_id), &phi_val) in &phi_value {
        let preds = func.block(block).preds.clone();
        let mut incoming = Vec::with_capacity(preds.len());
        for p in preds {
            let v = exit_def
                .get(&p)
                .and_then(|m| m.get(&local_id))
                .copied()
                .unwrap_or_else(|| {
                    let ty = local_ty.get(&local_id).copied().unwrap_or(ValueType::U64);
                    zero_value(func, ty)
                });
            incoming.push(v);
        }
        let def_inst = func.value(phi_val).def;
        for inst in func.block_mut(block).insts_mut() {
            if inst.id == def_inst {
                inst.args_mut()[0] = Arg::Params(incoming.clone());
                break;
            }
        }
    }

    // Rewrite every remaining reference to a replaced (ex-LoadLocal) value.
    for &b in &reachable {
        for inst in func.block_mut(b).insts_mut() {
            for arg in inst.args_mut() {
                rewrite_arg(arg, &replace);
            }
        }
    }

    // Strip DefineLocal/LoadLocal/StoreLocal; they're gone after renaming.
    for &b in &reachable {
        func.block_mut(b)
            .insts_mut()
            .retain(|i| !matches!(i.opcode, OpCode::DefineLocal | OpCode::LoadLocal | OpCode::StoreLocal));
    }

    recompute_use_counts(func);
}

fn rewrite_arg(arg: &mut Arg, replace: &HashMap<ValueId, ValueId>) {
    match arg {
        Arg::Value(v) => {
            while let Some(&r) = replace.get(v) {
                *v = r;
            }
        }
        Arg::Cond(v) => {
            while let Some(&r) = replace.get(v) {
                *v = r;
            }
        }
        Arg::Params(vs) => {
            for v in vs {
                while let Some(&r) = replace.get(v) {
                    *v = r;
                }
            }
        }
        Arg::Operand(op) => {
            rewrite_arg(&mut op.left, replace);
            if let Some(r) = op.right.as_mut() {
                rewrite_arg(r, replace);
            }
        }
        _ => {}
    }
}

fn zero_value(func: &mut Function, ty: ValueType) -> ValueId {
    // Read-before-write on a Local (no dominating store reaches this use):
    // default to the type's zero value, matching typical guest ABI
    // zero-initialized register state.
    let inst_id = func.alloc_inst_id();
    let imm = match ty.size_bytes() {
        1 => Imm::U8(0),
        2 => Imm::U16(0),
        4 => Imm::U32(0),
        _ => Imm::U64(0),
    };
    let entry_block = func.entry();
    let inst = Inst::new(inst_id, OpCode::LoadImm, vec![Arg::Imm(imm)]);
    func.block_mut(entry_block).insts_mut().insert(0, inst);
    func.alloc_value(inst_id, ty)
}

#[allow(clippy::too_many_arguments)]
fn rename(
    block: BlockId,
    func: &mut Function,
    children: &HashMap<BlockId, Vec<BlockId>>,
    stacks: &mut HashMap<u32, Vec<ValueId>>,
    exit_def: &mut HashMap<BlockId, HashMap<u32, ValueId>>,
    phi_value: &HashMap<(BlockId, u32), ValueId>,
    local_ty: &HashMap<u32, ValueType>,
    replace: &mut HashMap<ValueId, ValueId>,
) {
    let mut pushed: HashMap<u32, usize> = HashMap::new();

    // Seed phi definitions for this block.
    let mut locals_with_phi: Vec<u32> = phi_value
        .keys()
        .filter(|(b, _)| *b == block)
        .map(|(_, l)| *l)
        .collect();
    locals_with_phi.sort_unstable();
    for local_id in locals_with_phi {
        let v = phi_value[&(block, local_id)];
        stacks.entry(local_id).or_default().push(v);
        *pushed.entry(local_id).or_insert(0) += 1;
    }

    // Walk instructions in program order, resolving LoadLocal/StoreLocal.
    let insts_snapshot: Vec<Inst> = func.block(block).insts().to_vec();
    for inst in &insts_snapshot {
        match inst.opcode {
            OpCode::StoreLocal => {
                let local = inst.args()[0].as_local().unwrap();
                let v = inst.args()[1].as_value().unwrap();
                stacks.entry(local.id).or_default().push(v);
                *pushed.entry(local.id).or_insert(0) += 1;
            }
            OpCode::LoadLocal => {
                let local = inst.args()[0].as_local().unwrap();
                let current = stacks
                    .get(&local.id)
                    .and_then(|s| s.last())
                    .copied()
                    .unwrap_or_else(|| {
                        let ty = local_ty.get(&local.id).copied().unwrap_or(local.ty);
                        zero_value(func, ty)
                    });
                replace.insert(result_value_of(func, inst.id), current);
            }
            _ => {}
        }
    }

    // Record the reaching definition at block exit for phi-filling.
    let mut at_exit = HashMap::new();
    for (&local_id, stack) in stacks.iter() {
        if let Some(&top) = stack.last() {
            at_exit.insert(local_id, top);
        }
    }
    exit_def.insert(block, at_exit);

    if let Some(kids) = children.get(&block) {
        for &child in kids.clone().iter() {
            rename(child, func, children, stacks, exit_def, phi_value, local_ty, replace);
        }
    }

    for (local_id, count) in pushed {
        let stack = stacks.get_mut(&local_id).unwrap();
        for _ in 0..count {
            stack.pop();
        }
    }
}

/// Find the `ValueId` whose `def` field is `inst_id` within `block`'s
/// function-wide value table. `LoadLocal`'s result value was allocated by
/// the builder at emission time; this scans the value table once per
/// lookup, which is acceptable here since local elimination runs once,
/// early, before the function is hot.
fn result_value_of(func: &Function, inst_id: crate::inst::InstId) -> ValueId {
    func.values_iter()
        .find(|(_, v)| v.def == inst_id)
        .map(|(id, _)| id)
        .expect("LoadLocal must have an allocated result value")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::HirBuilder;
    use crate::block::Terminal;
    use crate::Local;
    use xlate_types::Location;

    #[test]
    fn same_block_forwarding() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let local = Local::new(0, ValueType::U64);
        let imm = b.load_imm(Imm::U64(7));
        b.store_local(local, imm);
        let loaded = b.load_local(local);
        b.store_uniform(crate::Uniform::new(0, ValueType::U64), loaded);
        let mut func = b.close_with(Terminal::ReturnToHost);

        local_elimination(&mut func);

        for (_, id) in func.blocks_in_order() {
            for inst in func.block(id).insts() {
                assert_ne!(inst.opcode, OpCode::LoadLocal);
                assert_ne!(inst.opcode, OpCode::StoreLocal);
            }
        }
    }

    #[test]
    fn diverging_stores_produce_phi_at_merge() {
        // Block A stores 1 to L, block B stores 2 to L (both predecessors
        // of C); C loads L and stores it to a uniform -- scenario 6.
        let mut b = HirBuilder::new(Location::new(0x1000));
        let cond = b.load_imm(Imm::Bool(true));
        let (then_b, else_b) = b.if_(cond, Location::new(0x10), Location::new(0x20));
        let local = Local::new(0, ValueType::U64);

        b.set_current(then_b);
        let one = b.load_imm(Imm::U64(1));
        b.store_local(local, one);
        b.link_block(Location::new(0x30));

        b.set_current(else_b);
        let two = b.load_imm(Imm::U64(2));
        b.store_local(local, two);
        b.link_block(Location::new(0x30));

        let loaded = b.load_local(local);
        b.store_uniform(crate::Uniform::new(0, ValueType::U64), loaded);
        let mut func = b.close_with(Terminal::ReturnToHost);

        local_elimination(&mut func);

        let merge = func.find_block_at(Location::new(0x30)).unwrap();
        let has_phi = func.block(merge).insts().iter().any(|i| i.opcode == OpCode::AddPhi);
        assert!(has_phi, "merge block should contain a phi for the diverging local");

        for (_, id) in func.blocks_in_order() {
            for inst in func.block(id).insts() {
                assert_ne!(inst.opcode, OpCode::LoadLocal);
            }
        }
    }
}

/// Dominance frontier of every reachable block, computed via the standard
/// "for each join point, walk predecessors up to idom" algorithm
/// (`spec.md` §4.6 step 1 references the iterated dominance frontier
/// directly; this is the non-iterated `DF` it's built from).
fn dominance_frontier(
    func: &Function,
    reachable: &[BlockId],
    cfg: &CfgAnalysis,
) -> HashMap<BlockId, HashSet<BlockId>> {
    let mut df: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for &b in reachable {
        let preds = &func.block(b).preds;
        if preds.len() < 2 {
            continue;
        }
        for &p in preds {
            let mut runner = p;
            while Some(runner) != cfg.idom(b) {
                df.entry(runner).or_default().insert(b);
                match cfg.idom(runner) {
                    Some(next) => runner = next,
                    None => break,
                }
            }
        }
    }
    df
}
