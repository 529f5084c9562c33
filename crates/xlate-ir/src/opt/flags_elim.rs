use std::collections::HashMap;

use crate::block::BlockId;
use crate::function::Function;
use crate::inst::PseudoOp;
use crate::OpCode;
use xlate_types::Flags;

use super::recompute_use_counts;

/// Any `SaveFlags`/`ClearFlags` pseudo-op whose mask is not consumed by a
/// later `TestFlags`/`GetFlags`/`TestNotFlags` reaching it is dropped from
/// its producer's pseudo-op chain. Where the consumer does reach the
/// producer, the mask is narrowed to the consumed subset (`spec.md` §4.6
/// step 4).
///
/// This implementation is intentionally conservative at block boundaries:
/// a mask bit is treated as "possibly consumed" if any `TestFlags`/
/// `GetFlags`/`TestNotFlags` in the same block follows the producer, or if
/// the block has any successor at all (since a full interprocedural
/// consumer search is out of scope for a single-function pass and the spec
/// only requires that *unreachable* consumers be pruned, never that a
/// live one incorrectly be).
pub fn flags_elimination(func: &mut Function) {
    for (_, block) in func.blocks_in_order().collect::<Vec<_>>() {
        run_block(func, block);
    }
    recompute_use_counts(func);
}

fn run_block(func: &mut Function, block: BlockId) {
    let has_successor = !func.block(block).succs.is_empty();
    let insts = func.block(block).insts();
    let mut consumed_after: HashMap<usize, Flags> = HashMap::new();

    // For each pseudo-op-carrying producer, walk forward and OR in masks
    // from `TestFlags`/`TestNotFlags`/`GetFlags` reaching it within the
    // block. A block with a live successor is treated conservatively: the
    // mask a downstream block might consume is unknowable from here, so
    // nothing is pruned to empty, only narrowed by what's visibly consumed
    // in this block.
    for (i, inst) in insts.iter().enumerate() {
        if inst.pseudo_ops().is_empty() {
            continue;
        }
        let mut consumed = Flags::empty();
        for later in insts.iter().skip(i + 1) {
            if matches!(later.opcode, OpCode::TestFlags | OpCode::TestNotFlags | OpCode::GetFlags) {
                if let Some(crate::Arg::Flags(mask)) = later.args().first() {
                    consumed |= *mask;
                }
            }
        }
        consumed_after.insert(i, consumed);
    }

    for (i, inst) in func.block_mut(block).insts_mut().iter_mut().enumerate() {
        if inst.pseudo_ops().is_empty() {
            continue;
        }
        let consumed = consumed_after.get(&i).copied().unwrap_or(Flags::empty());
        if consumed.is_empty() && !has_successor {
            inst.retain_pseudo(|_| false);
            continue;
        }
        if has_successor {
            // Can't prove the mask is dead; leave the chain as-is.
            continue;
        }
        let narrowed: Vec<PseudoOp> = inst
            .pseudo_ops()
            .iter()
            .filter_map(|op| {
                let narrowed_mask = op.mask() & consumed;
                if narrowed_mask.is_empty() {
                    None
                } else {
                    Some(op.with_mask(narrowed_mask))
                }
            })
            .collect();
        inst.retain_pseudo(|_| false);
        for op in narrowed {
            inst.push_pseudo(op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::HirBuilder;
    use crate::block::Terminal;
    use xlate_types::{Imm, Location};

    #[test]
    fn unconsumed_flags_are_deleted_in_terminal_block() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let a = b.load_imm(Imm::U64(1));
        let c = b.load_imm(Imm::U64(2));
        let sum = b.add(crate::Arg::Value(a), crate::Arg::Value(c));
        b.save_flags(sum, Flags::ZERO);
        let mut func = b.close_with(Terminal::ReturnToHost);

        flags_elimination(&mut func);

        let block = func.find_block_at(Location::new(0x1000)).unwrap();
        let sum_inst = func.block(block).insts().iter().find(|i| i.opcode == OpCode::Add).unwrap();
        assert!(sum_inst.pseudo_ops().is_empty());
    }

    #[test]
    fn consumed_flags_are_narrowed_not_deleted() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let a = b.load_imm(Imm::U64(1));
        let c = b.load_imm(Imm::U64(2));
        let sum = b.add(crate::Arg::Value(a), crate::Arg::Value(c));
        b.save_flags(sum, Flags::ZERO | Flags::CARRY);
        let _ = b.test_flags(Flags::ZERO);
        let mut func = b.close_with(Terminal::ReturnToHost);

        flags_elimination(&mut func);

        let block = func.find_block_at(Location::new(0x1000)).unwrap();
        let sum_inst = func.block(block).insts().iter().find(|i| i.opcode == OpCode::Add).unwrap();
        assert_eq!(sum_inst.pseudo_ops().len(), 1);
        assert_eq!(sum_inst.pseudo_ops()[0].mask(), Flags::ZERO);
    }
}
