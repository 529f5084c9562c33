use crate::{Inst, ValueId};
use xlate_types::{Imm, Location};

/// An index into a `Function`'s block arena (Design Notes: "arena-allocated
/// nodes with indices...owning references are unidirectional").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

/// The closing construct of a block; recursive through `If`/`Switch`/
/// `CheckHalt` (`spec.md` §3 "Terminal"). Recursive arms box their nested
/// terminals so `Terminal` itself stays a fixed, movable size (Design Notes
/// "Terminals are recursive").
#[derive(Clone, Debug, PartialEq)]
pub enum Terminal {
    Invalid,
    /// Straight-line continuation.
    LinkBlock { next: Location },
    /// Same, but pins the link eagerly (compile-time resolved target,
    /// skipping the block-linkage stub even on first execution).
    LinkBlockFast { next: Location },
    /// Hand control back to the dispatcher.
    ReturnToDispatch,
    /// Leave the runtime entirely.
    ReturnToHost,
    /// Pop the predicted return off the RSB.
    PopRsbHint,
    If {
        cond: ValueId,
        then_: Box<Terminal>,
        else_: Box<Terminal>,
    },
    Switch {
        value: ValueId,
        cases: Vec<(Imm, Terminal)>,
        default: Box<Terminal>,
    },
    CheckHalt {
        else_: Box<Terminal>,
    },
}

impl Terminal {
    #[must_use]
    pub fn if_(cond: ValueId, then_: Terminal, else_: Terminal) -> Terminal {
        Terminal::If {
            cond,
            then_: Box::new(then_),
            else_: Box::new(else_),
        }
    }

    #[must_use]
    pub fn check_halt(else_: Terminal) -> Terminal {
        Terminal::CheckHalt {
            else_: Box::new(else_),
        }
    }

    /// Whether this terminal (and any nested arm) statically names a next
    /// guest location worth following for CFG successor computation
    /// (`spec.md` §4.5 "Finalization").
    pub fn static_targets(&self, out: &mut Vec<Location>) {
        match self {
            Terminal::Invalid | Terminal::ReturnToDispatch | Terminal::ReturnToHost | Terminal::PopRsbHint => {}
            Terminal::LinkBlock { next } | Terminal::LinkBlockFast { next } => out.push(*next),
            Terminal::If { then_, else_, .. } => {
                then_.static_targets(out);
                else_.static_targets(out);
            }
            Terminal::Switch { cases, default, .. } => {
                for (_, t) in cases {
                    t.static_targets(out);
                }
                default.static_targets(out);
            }
            Terminal::CheckHalt { else_ } => else_.static_targets(out),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        !matches!(self, Terminal::Invalid)
    }
}

/// Per-block/function compiled-artifact descriptor (`spec.md` §3 "Block",
/// §4.2 "JitCache"). Only bookkeeping lives here; the executable bytes and
/// the arena that owns them belong to `xlate-runtime::CodeCache` — keeping
/// the state *name* in `xlate-ir` lets the optimizer/builder reason about
/// "is this block already compiled" without depending on the runtime crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitCacheState {
    #[default]
    Uncached,
    Translating,
    Cached,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JitCache {
    pub state: JitCacheState,
    pub cache_id: u16,
    pub offset: u32,
}

impl JitCache {
    /// `Translating -> Cached` publish. `spec.md` §5 requires this
    /// transition to be visible to a concurrent dispatcher probe before the
    /// L1/L2 translate-table entry is published; `xlate-runtime` performs
    /// the actual atomic release store, this just updates the plain-data
    /// descriptor once the caller already holds the owning entity's write
    /// lock (`spec.md` §4.2).
    pub fn publish(&mut self, cache_id: u16, offset: u32) {
        self.cache_id = cache_id;
        self.offset = offset;
        self.state = JitCacheState::Cached;
    }
}

/// An ordered sequence of `Inst`, a start location, an optional end
/// location, a `Terminal`, and a `JitCache` descriptor (`spec.md` §3
/// "Block"). Predecessor/successor edges are filled in by
/// `HirBuilder::finalize` (`spec.md` §4.5).
#[derive(Clone, Debug)]
pub struct Block {
    pub start: Location,
    pub end: Option<Location>,
    insts: Vec<Inst>,
    terminal: Terminal,
    pub jit_cache: JitCache,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

impl Block {
    #[must_use]
    pub fn new(start: Location) -> Self {
        Block {
            start,
            end: None,
            insts: Vec::new(),
            terminal: Terminal::Invalid,
            jit_cache: JitCache::default(),
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.terminal.is_closed()
    }

    #[must_use]
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    pub fn insts_mut(&mut self) -> &mut Vec<Inst> {
        &mut self.insts
    }

    /// Append an instruction. `spec.md` §4.5 "Terminal placement": "A
    /// closed block admits no new instructions."
    pub fn push(&mut self, inst: Inst) {
        assert!(self.is_open(), "cannot append to a block past its terminal");
        self.insts.push(inst);
    }

    #[must_use]
    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    /// Close the block with a terminal. Idempotent-unsafe by design: a
    /// second call panics, matching "A closed block admits no new
    /// instructions" for terminals too.
    pub fn close(&mut self, terminal: Terminal, end: Location) {
        assert!(self.is_open(), "block already closed");
        self.end = Some(end);
        self.terminal = terminal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arg, Imm, InstId, OpCode};

    #[test]
    fn closed_block_rejects_further_insts() {
        let mut b = Block::new(Location::new(0x1000));
        b.push(Inst::new(InstId(0), OpCode::LoadImm, vec![Arg::Imm(Imm::U32(1))]));
        b.close(Terminal::ReturnToHost, Location::new(0x1002));
        assert!(!b.is_open());
    }

    #[test]
    #[should_panic]
    fn push_after_close_panics() {
        let mut b = Block::new(Location::new(0x1000));
        b.close(Terminal::ReturnToHost, Location::new(0x1000));
        b.push(Inst::new(InstId(0), OpCode::LoadImm, vec![Arg::Imm(Imm::U32(1))]));
    }

    #[test]
    fn static_targets_recurse_through_if() {
        let t = Terminal::if_(
            ValueId(0),
            Terminal::LinkBlock { next: Location::new(0x10) },
            Terminal::LinkBlock { next: Location::new(0x20) },
        );
        let mut out = Vec::new();
        t.static_targets(&mut out);
        assert_eq!(out, vec![Location::new(0x10), Location::new(0x20)]);
    }
}
