use std::collections::BTreeMap;
use std::sync::Arc;

use crate::block::{Block, BlockId, JitCache};
use crate::inst::InstId;
use crate::value::{Value, ValueId};
use xlate_types::{Location, ValueType};

/// An ordered-by-location collection of blocks, a start location, and a
/// `JitCache` descriptor (`spec.md` §3 "Function"). `blocks` is a
/// `BTreeMap<Location, BlockId>` standing in for the source's intrusive
/// rbtree: the arena (`Vec<Block>`) owns storage, the map gives
/// location-ordered iteration and exact-match lookup.
///
/// Instance counting (`spec.md` §3: "reference-counted") is modeled by
/// wrapping a finalized `Function` in an `Arc`, rather than hand-rolling a
/// refcount field — a function stays alive exactly as long as some module,
/// cache entry, or in-flight translation holds a clone of that `Arc`.
#[derive(Clone, Debug)]
pub struct Function {
    pub start: Location,
    arena: Vec<Block>,
    by_start: BTreeMap<Location, BlockId>,
    pub jit_cache: JitCache,
    values: Vec<Value>,
    next_local_id: u32,
    next_inst_id: u32,
}

impl Function {
    #[must_use]
    pub fn new(start: Location) -> Self {
        Function {
            start,
            arena: Vec::new(),
            by_start: BTreeMap::new(),
            jit_cache: JitCache::default(),
            values: Vec::new(),
            next_local_id: 0,
            next_inst_id: 0,
        }
    }

    /// Allocate a fresh `Local` id, unique within this function.
    pub fn alloc_local_id(&mut self) -> u32 {
        let id = self.next_local_id;
        self.next_local_id += 1;
        id
    }

    /// Allocate a fresh, unique (but not yet RPO-dense) `InstId`. The
    /// `Reid` pass (`spec.md` §4.6 step 2) renumbers every instruction in
    /// RPO order after SSA construction; ids assigned here only need to be
    /// distinct.
    pub fn alloc_inst_id(&mut self) -> InstId {
        let id = InstId(self.next_inst_id);
        self.next_inst_id += 1;
        id
    }

    /// Allocate the `Value` for a newly appended `Inst`'s result.
    pub fn alloc_value(&mut self, def: InstId, ty: ValueType) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value::new(def, ty));
        id
    }

    #[must_use]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.0 as usize]
    }

    pub fn use_value(&mut self, id: ValueId) {
        self.value_mut(id).mark_used();
    }

    pub fn unuse_value(&mut self, id: ValueId) {
        self.value_mut(id).mark_unused();
    }

    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn values_iter(&self) -> impl Iterator<Item = (ValueId, &Value)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (ValueId(i as u32), v))
    }

    /// Allocate a new block at `start`, returning its `BlockId`.
    ///
    /// `spec.md` §3 invariant: "Within a module, at most one block starts
    /// at a given location; same for functions" — enforced here at the
    /// function scope via the exact-match `by_start` map.
    pub fn alloc_block(&mut self, start: Location) -> BlockId {
        assert!(
            !self.by_start.contains_key(&start),
            "duplicate block start location {start:?} within function"
        );
        let id = BlockId(self.arena.len() as u32);
        self.arena.push(Block::new(start));
        self.by_start.insert(start, id);
        id
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.arena[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.arena[id.0 as usize]
    }

    #[must_use]
    pub fn find_block_at(&self, loc: Location) -> Option<BlockId> {
        self.by_start.get(&loc).copied()
    }

    /// Iterate blocks in location order (the "rbtree" traversal order
    /// `spec.md` §3 describes).
    pub fn blocks_in_order(&self) -> impl Iterator<Item = (Location, BlockId)> + '_ {
        self.by_start.iter().map(|(&loc, &id)| (loc, id))
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.find_block_at(self.start).expect("function has no entry block")
    }
}

/// A reference-counted handle to a finalized `Function`; multiple modules,
/// cache entries, or link sites may hold a clone simultaneously
/// (`spec.md` §3 "an instance counter (reference-counted)").
pub type HirFunction = Arc<Function>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_start_rejected() {
        let mut f = Function::new(Location::new(0x1000));
        f.alloc_block(Location::new(0x1000));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut f2 = f.clone();
            f2.alloc_block(Location::new(0x1000));
        }));
        assert!(result.is_err());
    }

    #[test]
    fn blocks_iterate_in_location_order() {
        let mut f = Function::new(Location::new(0x2000));
        f.alloc_block(Location::new(0x3000));
        f.alloc_block(Location::new(0x1000));
        f.alloc_block(Location::new(0x2000));
        let order: Vec<_> = f.blocks_in_order().map(|(loc, _)| loc).collect();
        assert_eq!(
            order,
            vec![Location::new(0x1000), Location::new(0x2000), Location::new(0x3000)]
        );
    }
}
