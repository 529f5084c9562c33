use std::collections::{HashMap, HashSet};

use crate::block::BlockId;
use crate::function::Function;

/// CFG analysis results for one `Function`: reverse post-order, immediate
/// dominators, `DOMINATES` single-incoming-edge marks, and back edges
/// (`spec.md` §4.5 "CFG analysis pass").
#[derive(Clone, Debug, Default)]
pub struct CfgAnalysis {
    /// Blocks in reverse post-order, populated as each node has all its
    /// non-back predecessors processed.
    pub rpo: Vec<BlockId>,
    /// Immediate dominator of every block except the entry (which has
    /// none).
    idom: HashMap<BlockId, BlockId>,
    /// `(from, to)` edges where `to` is reached via a single incoming edge
    /// and therefore `from` trivially dominates the edge.
    edge_dominates: HashSet<(BlockId, BlockId)>,
    /// `(from, to)` edges discovered as back edges by the DFS pass.
    back_edges: HashSet<(BlockId, BlockId)>,
}

impl CfgAnalysis {
    /// Run the full analysis pass over `func`, rooted at its entry block.
    #[must_use]
    pub fn compute(func: &Function, entry: BlockId) -> Self {
        let back_edges = find_back_edges(func, entry);
        let edge_dominates = find_edge_dominates(func);
        let rpo = reverse_post_order(func, entry, &back_edges);
        let idom = compute_dominators(func, entry, &rpo);
        CfgAnalysis {
            rpo,
            idom,
            edge_dominates,
            back_edges,
        }
    }

    #[must_use]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    #[must_use]
    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.back_edges.contains(&(from, to))
    }

    #[must_use]
    pub fn edge_dominates(&self, from: BlockId, to: BlockId) -> bool {
        self.edge_dominates.contains(&(from, to))
    }

    /// `spec.md` §8 "Round-trip / invariants": every back-edge endpoint
    /// dominates its source.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut cur = b;
        while let Some(p) = self.idom(cur) {
            if p == a {
                return true;
            }
            cur = p;
        }
        false
    }
}

/// Iterative DFS marking a visiting set; an edge to a currently-visiting
/// node is a back edge (`spec.md` §4.5).
fn find_back_edges(func: &Function, entry: BlockId) -> HashSet<(BlockId, BlockId)> {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Visiting,
        Done,
    }
    let mut state: HashMap<BlockId, State> = HashMap::new();
    let mut back_edges = HashSet::new();
    // Explicit stack of (node, next-succ-index) to avoid recursion depth
    // concerns on pathological CFGs.
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    state.insert(entry, State::Visiting);

    while let Some(&mut (node, ref mut idx)) = stack.last_mut() {
        let succs = &func.block(node).succs;
        if *idx < succs.len() {
            let succ = succs[*idx];
            *idx += 1;
            match state.get(&succ) {
                Some(State::Visiting) => {
                    back_edges.insert((node, succ));
                }
                Some(State::Done) => {}
                None => {
                    state.insert(succ, State::Visiting);
                    stack.push((succ, 0));
                }
            }
        } else {
            state.insert(node, State::Done);
            stack.pop();
        }
    }
    back_edges
}

fn find_edge_dominates(func: &Function) -> HashSet<(BlockId, BlockId)> {
    let mut out = HashSet::new();
    for (_, id) in func.blocks_in_order() {
        let preds = &func.block(id).preds;
        if preds.len() == 1 {
            out.insert((preds[0], id));
        }
    }
    out
}

/// Populate RPO as each node has all its non-back predecessors processed
/// (`spec.md` §4.5). Implemented as a standard post-order DFS reversed,
/// which satisfies that property for a reducible CFG.
fn reverse_post_order(func: &Function, entry: BlockId, back_edges: &HashSet<(BlockId, BlockId)>) -> Vec<BlockId> {
    let mut visited = HashSet::new();
    let mut post_order = Vec::new();
    let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
    visited.insert(entry);

    while let Some(&mut (node, ref mut idx)) = stack.last_mut() {
        let succs = &func.block(node).succs;
        if *idx < succs.len() {
            let succ = succs[*idx];
            *idx += 1;
            if back_edges.contains(&(node, succ)) {
                continue;
            }
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            post_order.push(node);
            stack.pop();
        }
    }
    post_order.reverse();
    post_order
}

/// The Cooper-Harvey-Kennedy iterative dominator algorithm: an iterative
/// worklist walks successors, propagating the nearest common dominator via
/// the chain-length algorithm (equalize depths, then walk up in lockstep)
/// (`spec.md` §4.5).
fn compute_dominators(func: &Function, entry: BlockId, rpo: &[BlockId]) -> HashMap<BlockId, BlockId> {
    let rpo_index: HashMap<BlockId, usize> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();
    let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
    idom.insert(entry, entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter() {
            if node == entry {
                continue;
            }
            let preds = &func.block(node).preds;
            let mut new_idom: Option<BlockId> = None;
            for &p in preds {
                if !idom.contains_key(&p) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(acc) => intersect(acc, p, &idom, &rpo_index),
                });
            }
            if let Some(computed) = new_idom {
                if idom.get(&node) != Some(&computed) {
                    idom.insert(node, computed);
                    changed = true;
                }
            }
        }
    }
    idom.remove(&entry);
    idom
}

fn intersect(
    mut a: BlockId,
    mut b: BlockId,
    idom: &HashMap<BlockId, BlockId>,
    rpo_index: &HashMap<BlockId, usize>,
) -> BlockId {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::HirBuilder;
    use crate::block::Terminal;
    use xlate_types::{Imm, Location};

    #[test]
    fn diamond_cfg_dominance() {
        // entry -> A -> (B, C) -> D, a classic diamond.
        let mut b = HirBuilder::new(Location::new(0x1000));
        let cond = b.load_imm(Imm::Bool(true));
        let (then_b, else_b) = b.if_(cond, Location::new(0x2000), Location::new(0x3000));
        b.set_current(then_b);
        b.link_block(Location::new(0x4000));
        let func = {
            b.set_current(else_b);
            b.link_block(Location::new(0x4000));
            b.close_with(Terminal::ReturnToHost)
        };

        let entry = func.find_block_at(Location::new(0x1000)).unwrap();
        let d = func.find_block_at(Location::new(0x4000)).unwrap();
        let cfg = CfgAnalysis::compute(&func, entry);
        assert!(cfg.dominates(entry, d));
        assert_eq!(cfg.idom(d), Some(entry));
    }

    #[test]
    fn back_edge_detection_in_loop() {
        // entry(A) -> B -> (A [back edge], C)
        let mut b = HirBuilder::new(Location::new(0x1000));
        b.link_block(Location::new(0x2000));
        let cond = b.load_imm(Imm::Bool(false));
        let (_back, exit) = b.if_(cond, Location::new(0x1000), Location::new(0x3000));
        b.set_current(exit);
        let func = b.close_with(Terminal::ReturnToHost);

        let entry = func.find_block_at(Location::new(0x1000)).unwrap();
        let loop_head = func.find_block_at(Location::new(0x2000)).unwrap();
        let cfg = CfgAnalysis::compute(&func, entry);
        assert!(cfg.is_back_edge(loop_head, entry));
        assert!(cfg.dominates(entry, loop_head));
    }
}
