use std::collections::HashMap;

use crate::block::BlockId;
use crate::function::Function;
use crate::inst::{Inst, InstId};
use crate::uniform::Uniform;
use crate::value::ValueId;
use crate::{Arg, OpCode};
use xlate_types::ValueType;

use super::recompute_use_counts;

/// One `(offset, size)` region of the uniform buffer statically pinned to a
/// host register for the whole of translated execution (`spec.md` §4.3
/// "Uniform buffer and static-uniform allocation", §6 `Config.
/// buffers_static_alloc`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticUniformSlot {
    pub offset: u32,
    pub size: u32,
    pub reg: u8,
    pub is_float: bool,
}

/// The full static-uniform allocation plan for one `Config`.
#[derive(Clone, Debug, Default)]
pub struct StaticUniformPlan {
    slots: Vec<StaticUniformSlot>,
}

impl StaticUniformPlan {
    pub const NONE: StaticUniformPlan = StaticUniformPlan { slots: Vec::new() };

    #[must_use]
    pub fn new(slots: Vec<StaticUniformSlot>) -> Self {
        StaticUniformPlan { slots }
    }

    /// Find the static slot fully containing `uniform`'s byte range, if
    /// any. A `Uniform` that only partially overlaps a pinned slot is left
    /// alone -- the spec's contract only promises the rewrite when "a
    /// uniform region is statically assigned" covers the access exactly
    /// enough to compute a register index and in-register offset.
    #[must_use]
    pub fn find(&self, uniform: Uniform) -> Option<(&StaticUniformSlot, u32)> {
        let range = uniform.byte_range();
        self.slots.iter().find_map(|slot| {
            let slot_range = slot.offset..(slot.offset + slot.size);
            if slot_range.start <= range.start && range.end <= slot_range.end {
                Some((slot, range.start - slot_range.start))
            } else {
                None
            }
        })
    }
}

/// Byte-granular last-writer tracking for one block's straight-line uniform
/// accesses (`spec.md` §4.6 step 3).
#[derive(Default)]
struct ByteWriters {
    // byte offset -> (defining value, byte offset within that value's type)
    last_write: HashMap<u32, (ValueId, u32, ValueType)>,
}

impl ByteWriters {
    fn store(&mut self, uniform: Uniform, value: ValueId) {
        for (i, byte) in uniform.byte_range().enumerate() {
            self.last_write.insert(byte, (value, i as u32, uniform.ty));
        }
    }

    /// A load is rewritable iff every byte in its range was written by the
    /// *same* def at a *contiguous* byte offset (i.e. it's reading back
    /// exactly a prior store, not an unrelated stitched-together range).
    fn single_covering_def(&self, uniform: Uniform) -> Option<ValueId> {
        let range = uniform.byte_range();
        let mut found: Option<(ValueId, u32)> = None;
        for byte in range.clone() {
            let (value, byte_off, _) = *self.last_write.get(&byte)?;
            match found {
                None => found = Some((value, byte_off)),
                Some((v, _)) if v != value => return None,
                Some((_, base)) => {
                    let expected = base + (byte - range.start);
                    if byte_off != expected {
                        return None;
                    }
                }
            }
        }
        found.map(|(v, _)| v)
    }
}

/// Track, per block, the last-written tag for each byte of the uniform
/// buffer. A `LoadUniform` fully backed by a single prior store rewrites to
/// a `BitCast` of that value; a uniform region pinned by `plan` rewrites
/// `LoadUniform`/`StoreUniform` to `GetHostGpr`/`SetHostGpr` (or `...Fpr`)
/// (`spec.md` §4.6 step 3).
pub fn uniform_elimination(func: &mut Function, plan: &StaticUniformPlan) {
    for (_, block) in func.blocks_in_order().collect::<Vec<_>>() {
        run_block(func, block, plan);
    }
    recompute_use_counts(func);
}

fn run_block(func: &mut Function, block: BlockId, plan: &StaticUniformPlan) {
    let mut writers = ByteWriters::default();
    let mut replacements: Vec<(InstId, Replacement)> = Vec::new();

    for inst in func.block(block).insts() {
        match inst.opcode {
            OpCode::StoreUniform => {
                let uniform = inst.args()[0].as_uniform().unwrap();
                let value = inst.args()[1].as_value().unwrap();
                if let Some((slot, reg_off)) = plan.find(uniform) {
                    replacements.push((
                        inst.id,
                        Replacement::SetHostReg {
                            reg: slot.reg,
                            reg_off,
                            is_float: slot.is_float,
                            value,
                        },
                    ));
                }
                writers.store(uniform, value);
            }
            OpCode::LoadUniform => {
                let uniform = inst.args()[0].as_uniform().unwrap();
                if let Some((slot, reg_off)) = plan.find(uniform) {
                    replacements.push((
                        inst.id,
                        Replacement::GetHostReg {
                            reg: slot.reg,
                            reg_off,
                            is_float: slot.is_float,
                            ty: uniform.ty,
                        },
                    ));
                } else if let Some(def) = writers.single_covering_def(uniform) {
                    replacements.push((inst.id, Replacement::BitCast { src: def, ty: uniform.ty }));
                }
            }
            _ => {}
        }
    }

    for (inst_id, repl) in replacements {
        apply(func, block, inst_id, repl);
    }
}

enum Replacement {
    BitCast { src: ValueId, ty: ValueType },
    GetHostReg { reg: u8, reg_off: u32, is_float: bool, ty: ValueType },
    SetHostReg { reg: u8, reg_off: u32, is_float: bool, value: ValueId },
}

fn apply(func: &mut Function, block: BlockId, inst_id: InstId, repl: Replacement) {
    let pos = func
        .block(block)
        .insts()
        .iter()
        .position(|i| i.id == inst_id)
        .expect("replacement target must still be in block");

    match repl {
        Replacement::BitCast { src, ty } => {
            let new = Inst::new(inst_id, OpCode::BitCast, vec![Arg::Value(src)]);
            func.block_mut(block).insts_mut()[pos] = new;
            func.block_mut(block).insts_mut()[pos].set_return(ty);
        }
        Replacement::GetHostReg { reg, reg_off, is_float, ty } => {
            let opcode = if is_float { OpCode::GetHostFpr } else { OpCode::GetHostGpr };
            let new = Inst::new(
                inst_id,
                opcode,
                vec![Arg::Imm(xlate_types::Imm::U32(u32::from(reg) | (reg_off << 8)))],
            );
            func.block_mut(block).insts_mut()[pos] = new;
            func.block_mut(block).insts_mut()[pos].set_return(ty);
        }
        Replacement::SetHostReg { reg, reg_off, is_float, value } => {
            let opcode = if is_float { OpCode::SetHostFpr } else { OpCode::SetHostGpr };
            let new = Inst::new(
                inst_id,
                opcode,
                vec![
                    Arg::Imm(xlate_types::Imm::U32(u32::from(reg) | (reg_off << 8))),
                    Arg::Value(value),
                ],
            );
            func.block_mut(block).insts_mut()[pos] = new;
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
    fn store_then_load_rewrites_to_bitcast() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let v = b.load_imm(Imm::U64(0x42));
        b.store_uniform(Uniform::new(0, ValueType::U64), v);
        let loaded = b.load_uniform(Uniform::new(0, ValueType::U64));
        b.store_uniform(Uniform::new(8, ValueType::U64), loaded);
        let mut func = b.close_with(Terminal::ReturnToHost);

        uniform_elimination(&mut func, &StaticUniformPlan::NONE);

        let block = func.find_block_at(Location::new(0x1000)).unwrap();
        let has_load_uniform = func.block(block).insts().iter().any(|i| i.opcode == OpCode::LoadUniform);
        assert!(!has_load_uniform);
        let has_bitcast = func.block(block).insts().iter().any(|i| i.opcode == OpCode::BitCast);
        assert!(has_bitcast);
    }

    #[test]
    fn static_slot_rewrites_to_host_reg_ops() {
        let plan = StaticUniformPlan::new(vec![StaticUniformSlot {
            offset: 0,
            size: 8,
            reg: 3,
            is_float: false,
        }]);
        let mut b = HirBuilder::new(Location::new(0x1000));
        let v = b.load_imm(Imm::U64(1));
        b.store_uniform(Uniform::new(0, ValueType::U64), v);
        let loaded = b.load_uniform(Uniform::new(0, ValueType::U64));
        b.store_uniform(Uniform::new(16, ValueType::U64), loaded);
        let mut func = b.close_with(Terminal::ReturnToHost);

        uniform_elimination(&mut func, &plan);

        let block = func.find_block_at(Location::new(0x1000)).unwrap();
        let opcodes: Vec<_> = func.block(block).insts().iter().map(|i| i.opcode).collect();
        assert!(opcodes.contains(&OpCode::SetHostGpr));
        assert!(opcodes.contains(&OpCode::GetHostGpr));
    }
}
