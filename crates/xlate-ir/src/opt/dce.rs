use std::collections::{HashMap, HashSet};

use crate::block::BlockId;
use crate::function::Function;
use crate::inst::InstId;
use crate::value::ValueId;

use super::recompute_use_counts;

/// Walk every block backward, dropping instructions with `num_use == 0` and
/// no side effects (`spec.md` §4.6 step 5). Side-effect opcodes are exactly
/// `OpCode::has_side_effect`'s set: memory stores, `StoreUniform`,
/// `StoreLocal` (pre-SSA), `CallLambda`/`CallDynamic`, `SetLocation`,
/// `AdvancePC`, and any instruction still carrying a live pseudo-op chain
/// (`Inst::is_side_effecting`).
///
/// Runs to a fixed point: removing a dead instruction can drop the last use
/// of its operands, which may make an earlier def dead in turn (`spec.md`
/// §8 invariant: "every remaining `Inst` either has `num_use ≥ 1` or is in
/// the side-effect set").
pub fn dead_code_elimination(func: &mut Function) {
    loop {
        recompute_use_counts(func);
        let mut removed_any = false;
        for (_, block) in func.blocks_in_order().collect::<Vec<_>>() {
            removed_any |= run_block(func, block);
        }
        if !removed_any {
            break;
        }
    }
}

/// `InstId -> ValueId` for every def in the function, rebuilt per call since
/// DCE removes instructions each round and the mapping is cheap relative to
/// the fixed-point loop around it.
fn def_index(func: &Function) -> HashMap<InstId, ValueId> {
    func.values_iter().map(|(id, v)| (v.def, id)).collect()
}

fn run_block(func: &mut Function, block: BlockId) -> bool {
    let defs = def_index(func);
    let dead: HashSet<InstId> = func
        .block(block)
        .insts()
        .iter()
        .filter(|inst| !inst.is_side_effecting())
        .filter_map(|inst| {
            let v = defs.get(&inst.id)?;
            (func.value(*v).num_use() == 0).then_some(inst.id)
        })
        .collect();
    if dead.is_empty() {
        return false;
    }
    let before = func.block(block).insts().len();
    func.block_mut(block).insts_mut().retain(|inst| !dead.contains(&inst.id));
    func.block(block).insts().len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::HirBuilder;
    use crate::block::Terminal;
    use crate::OpCode;
    use xlate_types::{Imm, Location};

    #[test]
    fn dead_def_is_removed() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let live = b.load_imm(Imm::U64(1));
        let _dead = b.load_imm(Imm::U64(2));
        b.store_uniform(crate::Uniform::new(0, xlate_types::ValueType::U64), live);
        let mut func = b.close_with(Terminal::ReturnToHost);

        dead_code_elimination(&mut func);

        let block = func.find_block_at(Location::new(0x1000)).unwrap();
        let load_imm_count = func.block(block).insts().iter().filter(|i| i.opcode == OpCode::LoadImm).count();
        assert_eq!(load_imm_count, 1);
    }

    #[test]
    fn side_effecting_inst_survives_with_zero_uses() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let v = b.load_imm(Imm::U64(1));
        b.store_uniform(crate::Uniform::new(0, xlate_types::ValueType::U64), v);
        let mut func = b.close_with(Terminal::ReturnToHost);

        dead_code_elimination(&mut func);

        let block = func.find_block_at(Location::new(0x1000)).unwrap();
        assert!(func.block(block).insts().iter().any(|i| i.opcode == OpCode::StoreUniform));
    }

    #[test]
    fn chained_dead_defs_are_removed_to_fixed_point() {
        // a = load_imm; b = add(a, a); (b unused) -- both a and b should die.
        let mut b = HirBuilder::new(Location::new(0x1000));
        let a = b.load_imm(Imm::U64(1));
        let _sum = b.add(crate::Arg::Value(a), crate::Arg::Value(a));
        let keep = b.load_imm(Imm::U64(99));
        b.store_uniform(crate::Uniform::new(0, xlate_types::ValueType::U64), keep);
        let mut func = b.close_with(Terminal::ReturnToHost);

        dead_code_elimination(&mut func);

        let block = func.find_block_at(Location::new(0x1000)).unwrap();
        assert!(!func.block(block).insts().iter().any(|i| i.opcode == OpCode::Add));
        assert_eq!(func.block(block).insts().iter().filter(|i| i.opcode == OpCode::LoadImm).count(), 1);
    }
}
