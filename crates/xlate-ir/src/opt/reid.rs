use std::collections::HashMap;

use crate::cfg::CfgAnalysis;
use crate::function::Function;
use crate::inst::InstId;

/// Renumber instruction ids in RPO order so later passes can index vectors
/// by id (`spec.md` §4.6 step 2).
pub fn reid(func: &mut Function) {
    let entry = func.entry();
    let cfg = CfgAnalysis::compute(func, entry);
    let mut remap: HashMap<InstId, InstId> = HashMap::new();
    let mut next = 0u32;

    for &block in &cfg.rpo {
        for inst in func.block_mut(block).insts_mut() {
            remap.insert(inst.id, InstId(next));
            inst.id = InstId(next);
            next += 1;
        }
    }

    // Unreachable blocks (if any survive past local-elimination) still get
    // dense, distinct ids appended after the reachable set so no `InstId`
    // is ever reused.
    let reachable: std::collections::HashSet<_> = cfg.rpo.iter().copied().collect();
    for (_, block) in func.blocks_in_order().collect::<Vec<_>>() {
        if reachable.contains(&block) {
            continue;
        }
        for inst in func.block_mut(block).insts_mut() {
            remap.insert(inst.id, InstId(next));
            inst.id = InstId(next);
            next += 1;
        }
    }

    // `Value::def` must track the renumbered defining instruction.
    for (id, _) in func.values_iter().map(|(i, v)| (i, v.def)).collect::<Vec<_>>() {
        let old_def = func.value(id).def;
        if let Some(&new_def) = remap.get(&old_def) {
            func.value_mut(id).def = new_def;
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
    fn ids_are_dense_from_zero_after_reid() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let a = b.load_imm(Imm::U64(1));
        let c = b.load_imm(Imm::U64(2));
        let _ = b.add(crate::Arg::Value(a), crate::Arg::Value(c));
        let mut func = b.close_with(Terminal::ReturnToHost);

        reid(&mut func);

        let mut ids: Vec<u32> = Vec::new();
        for (_, id) in func.blocks_in_order() {
            for inst in func.block(id).insts() {
                ids.push(inst.id.0);
            }
        }
        ids.sort_unstable();
        let expected: Vec<u32> = (0..ids.len() as u32).collect();
        assert_eq!(ids, expected);
    }
}
