use std::collections::HashMap;

use crate::function::Function;
use crate::inst::InstId;
use crate::value::ValueId;
use crate::Arg;

/// Reserved-register descriptor for one host ABI (`spec.md` §4.7 "a
/// register file descriptor for reserved registers (temps, callee-saves
/// that the trampoline preserves, state-pointer, cache-pointer, flags,
/// RSB)"). `gpr_available`/`fpr_available` are bitmasks over register
/// indices 0..31; a `0` bit means the register is reserved and never
/// handed out by the allocator.
#[derive(Clone, Copy, Debug)]
pub struct RegisterFile {
    pub gpr_available: u32,
    pub fpr_available: u32,
}

impl RegisterFile {
    #[must_use]
    pub const fn new(gpr_available: u32, fpr_available: u32) -> Self {
        RegisterFile { gpr_available, fpr_available }
    }

    fn indices(mask: u32) -> impl Iterator<Item = u8> {
        (0..32u8).filter(move |i| mask & (1 << i) != 0)
    }
}

/// Where the allocator placed one `Value`: a host GPR, a host FPR/vector
/// register, or a stack spill slot (`spec.md` §4.7 step 4: "Record
/// `ValueAllocated{type, host_reg|slot}`").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation {
    Gpr(u8),
    Fpr(u8),
    Mem(u32),
}

impl Allocation {
    #[must_use]
    pub const fn is_spilled(self) -> bool {
        matches!(self, Allocation::Mem(_))
    }
}

#[derive(Clone, Copy, Debug)]
struct Interval {
    value: ValueId,
    start: u32,
    end: u32,
    fpr: bool,
}

/// Linear-scan allocator over an IR function already past passes 1–6
/// (`spec.md` §4.7). Consumes the RPO-dense `InstId` space produced by
/// `Reid` as its liveness axis.
pub struct RegisterAllocator {
    file: RegisterFile,
}

impl RegisterAllocator {
    #[must_use]
    pub fn new(file: RegisterFile) -> Self {
        RegisterAllocator { file }
    }

    /// Run the allocator, returning the chosen `Allocation` per `ValueId`
    /// that is actually defined (has at least one live instruction) in
    /// `func`. Values that were fully eliminated by earlier passes (e.g. a
    /// `Local` rewritten entirely to SSA then dead-code-removed) never
    /// appear as a key.
    #[must_use]
    pub fn run(&self, func: &Function) -> HashMap<ValueId, Allocation> {
        let intervals = build_intervals(func);
        self.allocate(intervals)
    }

    fn allocate(&self, mut intervals: Vec<Interval>) -> HashMap<ValueId, Allocation> {
        intervals.sort_by_key(|iv| iv.start);

        let mut result = HashMap::new();
        let mut next_spill_slot = 0u32;

        // (end, reg) actives per bank, kept sorted by end ascending.
        let mut active_gpr: Vec<(u32, u8)> = Vec::new();
        let mut active_fpr: Vec<(u32, u8)> = Vec::new();
        let mut free_gpr: Vec<u8> = RegisterFile::indices(self.file.gpr_available).collect();
        let mut free_fpr: Vec<u8> = RegisterFile::indices(self.file.fpr_available).collect();
        // Highest-index-first so "allocate the highest-index free register"
        // (`spec.md` §4.7 step 3) is a simple `pop`.
        free_gpr.sort_unstable();
        free_fpr.sort_unstable();

        for iv in intervals {
            let (active, free) = if iv.fpr {
                (&mut active_fpr, &mut free_fpr)
            } else {
                (&mut active_gpr, &mut free_gpr)
            };

            // Expire actives whose end < new.start; return their registers.
            let mut i = 0;
            while i < active.len() {
                if active[i].0 < iv.start {
                    let (_, reg) = active.remove(i);
                    let pos = free.partition_point(|&r| r < reg);
                    free.insert(pos, reg);
                } else {
                    i += 1;
                }
            }

            if let Some(reg) = free.pop() {
                insert_active(active, iv.end, reg);
                result.insert(iv.value, bank_alloc(iv.fpr, reg));
                continue;
            }

            // No free register: spill either the new interval or the active
            // with the latest end, per `spec.md` §4.7 step 3.
            match active.last().copied() {
                Some((latest_end, reg)) if latest_end > iv.end => {
                    active.pop();
                    let spilled_value = result
                        .iter()
                        .find(|(_, a)| **a == bank_alloc(iv.fpr, reg))
                        .map(|(v, _)| *v);
                    if let Some(v) = spilled_value {
                        let slot = next_spill_slot;
                        next_spill_slot += 1;
                        result.insert(v, Allocation::Mem(slot));
                    }
                    insert_active(active, iv.end, reg);
                    result.insert(iv.value, bank_alloc(iv.fpr, reg));
                }
                _ => {
                    let slot = next_spill_slot;
                    next_spill_slot += 1;
                    result.insert(iv.value, Allocation::Mem(slot));
                }
            }
        }
        result
    }
}

/// Insert `(end, reg)` keeping the active list sorted by end ascending;
/// among equal ends, prefer lower register index for the next allocation
/// out of this list (`spec.md` §4.7 "Tie-break on simultaneous ends").
fn insert_active(active: &mut Vec<(u32, u8)>, end: u32, reg: u8) {
    let pos = active.partition_point(|&(e, r)| (e, r) < (end, reg));
    active.insert(pos, (end, reg));
}

fn bank_alloc(fpr: bool, reg: u8) -> Allocation {
    if fpr {
        Allocation::Fpr(reg)
    } else {
        Allocation::Gpr(reg)
    }
}

/// Build one live interval per defined value: `[def_id, max(use_id)]` in
/// RPO id space (`spec.md` §4.7 step 1). A value with no uses still gets a
/// degenerate `[def_id, def_id]` interval (it may still need a register
/// across the pseudo-op chain or for codegen purposes even if DCE would
/// normally have removed it).
fn build_intervals(func: &Function) -> Vec<Interval> {
    let mut start: HashMap<ValueId, u32> = HashMap::new();
    let mut end: HashMap<ValueId, u32> = HashMap::new();

    for (_, block) in func.blocks_in_order() {
        for inst in func.block(block).insts() {
            // The value defined by this instruction, if any (opcodes with a
            // `Void` return type define nothing an allocator needs to place).
            if let Some(v) = func.values_iter().find(|(_, val)| val.def == inst.id).map(|(id, _)| id) {
                start.entry(v).or_insert(inst.id.0);
                end.entry(v).or_insert(inst.id.0);
            }
            for arg in inst.args() {
                mark_use(arg, inst.id, &mut end);
            }
        }
    }

    start
        .into_iter()
        .map(|(value, s)| {
            let ty = func.value(value).ty;
            Interval {
                value,
                start: s,
                end: *end.get(&value).unwrap_or(&s),
                fpr: ty.is_fpr_class(),
            }
        })
        .collect()
}

fn mark_use(arg: &Arg, at: InstId, end: &mut HashMap<ValueId, u32>) {
    match arg {
        Arg::Value(v) | Arg::Cond(v) => {
            end.entry(*v).and_modify(|e| *e = (*e).max(at.0)).or_insert(at.0);
        }
        Arg::Params(vs) => {
            for v in vs {
                end.entry(*v).and_modify(|e| *e = (*e).max(at.0)).or_insert(at.0);
            }
        }
        Arg::Operand(op) => {
            mark_use(op.left(), at, end);
            if let Some(r) = op.right() {
                mark_use(r, at, end);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::HirBuilder;
    use crate::block::Terminal;
    use crate::opt;
    use xlate_types::{Imm, Location};

    #[test]
    fn disjoint_intervals_share_a_register() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let a = b.load_imm(Imm::U64(1));
        b.store_uniform(crate::Uniform::new(0, xlate_types::ValueType::U64), a);
        let c = b.load_imm(Imm::U64(2));
        b.store_uniform(crate::Uniform::new(8, xlate_types::ValueType::U64), c);
        let mut func = b.close_with(Terminal::ReturnToHost);
        opt::reid(&mut func);

        let file = RegisterFile::new(0b1, 0);
        let alloc = RegisterAllocator::new(file).run(&func);
        assert_eq!(alloc.len(), 2);
        let regs: std::collections::HashSet<_> = alloc.values().copied().collect();
        // Only one physical register available; both disjoint values fit in it.
        assert_eq!(regs.len(), 1);
    }

    #[test]
    fn overlapping_intervals_force_a_spill_with_one_register() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let a = b.load_imm(Imm::U64(1));
        let c = b.load_imm(Imm::U64(2));
        let sum = b.add(crate::Arg::Value(a), crate::Arg::Value(c));
        b.store_uniform(crate::Uniform::new(0, xlate_types::ValueType::U64), sum);
        let mut func = b.close_with(Terminal::ReturnToHost);
        opt::reid(&mut func);

        let file = RegisterFile::new(0b1, 0);
        let alloc = RegisterAllocator::new(file).run(&func);
        assert!(alloc.values().any(Allocation::is_spilled));
    }

    #[test]
    fn fpr_typed_value_uses_the_float_bank() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let v = b.load_uniform(crate::Uniform::new(0, xlate_types::ValueType::V128));
        b.store_uniform(crate::Uniform::new(16, xlate_types::ValueType::V128), v);
        let mut func = b.close_with(Terminal::ReturnToHost);
        opt::reid(&mut func);

        let file = RegisterFile::new(0, 0b1);
        let alloc = RegisterAllocator::new(file).run(&func);
        assert!(alloc.values().all(|a| matches!(a, Allocation::Fpr(_))));
    }
}
