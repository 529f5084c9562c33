use crate::block::{BlockId, Terminal};
use crate::function::Function;
use crate::inst::{Inst, InstId};
use crate::value::ValueId;
use crate::{Arg, Lambda, Local, OpCode, Operand, Uniform};
use xlate_types::{Flags, Imm, Location, ValueType};

/// Streams IR into blocks while constructing a function's CFG
/// (`spec.md` §4.5 "HIR builder and CFG analysis").
///
/// Owns the `Function` under construction and a cursor naming the block
/// currently being appended to. `If`/`Switch` close the current block on
/// the caller-supplied terminal and return the newly created successor
/// blocks; the caller is responsible for selecting one with
/// [`HirBuilder::set_current`] before emitting further instructions
/// (`spec.md` §4.5 point 2: "the caller drives").
pub struct HirBuilder {
    func: Function,
    current: Option<BlockId>,
}

impl HirBuilder {
    /// Creates the entry block (sentinel `Location::INVALID`) with a
    /// `LinkBlock` to `start`, then opens `start` itself as the current
    /// block (`spec.md` §4.5 point 1).
    #[must_use]
    pub fn new(start: Location) -> Self {
        let mut func = Function::new(start);
        let entry = func.alloc_block(Location::INVALID);
        let start_block = func.alloc_block(start);
        func.block_mut(entry).close(Terminal::LinkBlock { next: start }, start);
        HirBuilder {
            func,
            current: Some(start_block),
        }
    }

    #[must_use]
    pub fn current(&self) -> BlockId {
        self.current.expect("HirBuilder has no current block (past a closing terminal)")
    }

    /// Select the block subsequent instructions append to; used after
    /// `if_`/`switch_` return successor blocks the caller must drive.
    pub fn set_current(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    /// Open (or reuse, if already created) a block at `at` and make it
    /// current.
    pub fn open_block(&mut self, at: Location) -> BlockId {
        let id = self.func.find_block_at(at).unwrap_or_else(|| self.func.alloc_block(at));
        self.current = Some(id);
        id
    }

    fn emit(&mut self, opcode: OpCode, args: Vec<Arg>) -> ValueId {
        // Mark uses before the Inst takes ownership of the args.
        for arg in &args {
            if let Some(v) = arg.as_value() {
                self.func.use_value(v);
            }
            if let Arg::Params(vs) = arg {
                for v in vs {
                    self.func.use_value(*v);
                }
            }
        }
        let inst_id = self.func.alloc_inst_id();
        let inst = Inst::new(inst_id, opcode, args);
        let ret_ty = inst.ret_ty();
        self.func.block_mut(self.current()).push(inst);
        self.func.alloc_value(inst_id, ret_ty)
    }

    pub fn load_imm(&mut self, imm: Imm) -> ValueId {
        self.emit(OpCode::LoadImm, vec![Arg::Imm(imm)])
    }

    pub fn load_uniform(&mut self, uniform: Uniform) -> ValueId {
        self.emit(OpCode::LoadUniform, vec![Arg::Uniform(uniform)])
    }

    pub fn store_uniform(&mut self, uniform: Uniform, value: ValueId) {
        self.emit(OpCode::StoreUniform, vec![Arg::Uniform(uniform), Arg::Value(value)]);
    }

    pub fn define_local(&mut self, local: Local) {
        self.emit(OpCode::DefineLocal, vec![Arg::Local(local)]);
    }

    pub fn load_local(&mut self, local: Local) -> ValueId {
        self.emit(OpCode::LoadLocal, vec![Arg::Local(local)])
    }

    pub fn store_local(&mut self, local: Local, value: ValueId) {
        self.emit(OpCode::StoreLocal, vec![Arg::Local(local), Arg::Value(value)]);
    }

    pub fn add_phi(&mut self, ty: ValueType, incoming: Vec<ValueId>) -> ValueId {
        let v = self.emit(OpCode::AddPhi, vec![Arg::Params(incoming)]);
        self.func.value_mut(v).ty = ty;
        v
    }

    fn binop(&mut self, opcode: OpCode, left: Arg, right: Arg) -> ValueId {
        self.emit(opcode, vec![left, right])
    }

    pub fn add(&mut self, left: Arg, right: Arg) -> ValueId {
        self.binop(OpCode::Add, left, right)
    }
    pub fn sub(&mut self, left: Arg, right: Arg) -> ValueId {
        self.binop(OpCode::Sub, left, right)
    }
    pub fn and(&mut self, left: Arg, right: Arg) -> ValueId {
        self.binop(OpCode::And, left, right)
    }
    pub fn or(&mut self, left: Arg, right: Arg) -> ValueId {
        self.binop(OpCode::Or, left, right)
    }
    pub fn xor(&mut self, left: Arg, right: Arg) -> ValueId {
        self.binop(OpCode::Xor, left, right)
    }
    pub fn shl(&mut self, left: Arg, right: Arg) -> ValueId {
        self.binop(OpCode::Shl, left, right)
    }
    pub fn cmp(&mut self, left: Arg, right: Arg) -> ValueId {
        self.binop(OpCode::Cmp, left, right)
    }

    pub fn not(&mut self, value: Arg) -> ValueId {
        self.emit(OpCode::Not, vec![value])
    }

    /// Attach a `SaveFlags(mask)` pseudo-op to `producer`'s defining
    /// instruction (`spec.md` §3 "Flags", Design Notes "Pseudo-operation
    /// chain").
    pub fn save_flags(&mut self, producer: ValueId, mask: Flags) {
        let def = self.func.value(producer).def;
        self.func
            .block_mut(self.current())
            .insts_mut()
            .iter_mut()
            .find(|i| i.id == def)
            .expect("producer inst must live in the current block")
            .push_pseudo(crate::inst::PseudoOp::SaveFlags(mask));
    }

    pub fn test_flags(&mut self, mask: Flags) -> ValueId {
        self.emit(OpCode::TestFlags, vec![Arg::Flags(mask)])
    }

    pub fn mem_load(&mut self, addr: ValueId) -> ValueId {
        self.emit(OpCode::MemLoad, vec![Arg::Value(addr)])
    }

    pub fn mem_store(&mut self, addr: ValueId, data: ValueId) {
        self.emit(OpCode::MemStore, vec![Arg::Value(addr), Arg::Value(data)]);
    }

    pub fn call_lambda(&mut self, target: Lambda) {
        let arg = match target {
            Lambda::Imm(loc) => Arg::Lambda(Lambda::Imm(loc)),
            Lambda::Value(v) => {
                self.func.use_value(v);
                Arg::Lambda(Lambda::Value(v))
            }
        };
        let inst_id = self.func.alloc_inst_id();
        let inst = Inst::new(inst_id, OpCode::CallLambda, vec![arg]);
        self.func.block_mut(self.current()).push(inst);
    }

    pub fn advance_pc(&mut self, delta: Imm) {
        self.emit(OpCode::AdvancePc, vec![Arg::Imm(delta)]);
    }

    /// Push `return_loc` onto the host RSB ahead of a guest call
    /// (`spec.md` §8 scenario 4). The matching `ret()`/`close_with` at the
    /// callee's far end closes on `Terminal::PopRsbHint`, which consumes
    /// whatever this push leaves on top of the stack.
    pub fn push_rsb(&mut self, return_loc: Location) {
        self.emit(OpCode::PushRsb, vec![Arg::Imm(Imm::U64(return_loc.value()))]);
    }

    #[must_use]
    pub fn operand(&self, left: Arg, op: xlate_types::OperandOp, right: Option<Arg>) -> Operand {
        Operand::new(left, op, right)
    }

    /// Close the current block with `LinkBlock { next }` and open `next`
    /// as the new current block (`spec.md` §4.5 point 3).
    pub fn link_block(&mut self, next: Location) {
        let here = self.current();
        self.func.block_mut(here).close(Terminal::LinkBlock { next }, next);
        self.current = None;
        self.open_block(next);
    }

    /// Close the current block on an `If` terminal, allocating fresh
    /// then/else blocks at the given locations and returning their ids for
    /// the caller to drive (`spec.md` §4.5 point 2).
    pub fn if_(&mut self, cond: ValueId, then_loc: Location, else_loc: Location) -> (BlockId, BlockId) {
        self.func.use_value(cond);
        let here = self.current();
        let then_block = self.func.find_block_at(then_loc).unwrap_or_else(|| self.func.alloc_block(then_loc));
        let else_block = self.func.find_block_at(else_loc).unwrap_or_else(|| self.func.alloc_block(else_loc));
        let terminal = Terminal::if_(
            cond,
            Terminal::LinkBlock { next: then_loc },
            Terminal::LinkBlock { next: else_loc },
        );
        let here_start = self.func.block(here).start;
        self.func.block_mut(here).close(terminal, here_start);
        self.current = None;
        (then_block, else_block)
    }

    /// Close the current block on a `Switch` terminal.
    pub fn switch_(&mut self, value: ValueId, cases: Vec<(Imm, Location)>, default_loc: Location) -> (Vec<BlockId>, BlockId) {
        self.func.use_value(value);
        let here = self.current();
        let mut case_blocks = Vec::with_capacity(cases.len());
        let mut case_terms = Vec::with_capacity(cases.len());
        for (imm, loc) in &cases {
            let id = self.func.find_block_at(*loc).unwrap_or_else(|| self.func.alloc_block(*loc));
            case_blocks.push(id);
            case_terms.push((*imm, Terminal::LinkBlock { next: *loc }));
        }
        let default_block = self
            .func
            .find_block_at(default_loc)
            .unwrap_or_else(|| self.func.alloc_block(default_loc));
        let terminal = Terminal::Switch {
            value,
            cases: case_terms,
            default: Box::new(Terminal::LinkBlock { next: default_loc }),
        };
        let here_start = self.func.block(here).start;
        self.func.block_mut(here).close(terminal, here_start);
        self.current = None;
        (case_blocks, default_block)
    }

    /// Close the current block with `PopRSBHint` and finalize the function
    /// (`spec.md` §4.5 point 4).
    pub fn ret(mut self) -> Function {
        if let Some(here) = self.current {
            let end = self.func.block(here).start;
            self.func.block_mut(here).close(Terminal::PopRsbHint, end);
            self.current = None;
        }
        self.finalize()
    }

    /// Close the current block with an explicit terminal that doesn't fit
    /// the named helpers above (`ReturnToHost`, `ReturnToDispatch`,
    /// `CheckHalt`, ...) and finalize.
    pub fn close_with(mut self, terminal: Terminal) -> Function {
        if let Some(here) = self.current {
            let end = self.func.block(here).start;
            self.func.block_mut(here).close(terminal, end);
            self.current = None;
        }
        self.finalize()
    }

    /// Materialize predecessor/successor arrays per block from the
    /// terminal edges created during emission (`spec.md` §4.5
    /// "Finalization").
    fn finalize(mut self) -> Function {
        let targets: Vec<(BlockId, Vec<Location>)> = self
            .func
            .blocks_in_order()
            .map(|(_, id)| {
                let mut out = Vec::new();
                self.func.block(id).terminal().static_targets(&mut out);
                (id, out)
            })
            .collect();

        for (from, locs) in targets {
            for loc in locs {
                if let Some(to) = self.func.find_block_at(loc) {
                    if !self.func.block(from).succs.contains(&to) {
                        self.func.block_mut(from).succs.push(to);
                    }
                    if !self.func.block(to).preds.contains(&from) {
                        self.func.block_mut(to).preds.push(from);
                    }
                }
            }
        }
        self.func
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Terminal;
    use xlate_types::ValueType;

    #[test]
    fn entry_links_to_start_block() {
        let b = HirBuilder::new(Location::new(0x1000));
        let func = b.close_with(Terminal::ReturnToHost);
        let entry = func.find_block_at(Location::INVALID).unwrap();
        assert_eq!(
            *func.block(entry).terminal(),
            Terminal::LinkBlock { next: Location::new(0x1000) }
        );
    }

    #[test]
    fn straight_line_two_block_run() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let imm = b.load_imm(Imm::U64(0x42));
        b.store_uniform(Uniform::new(0, ValueType::U64), imm);
        b.link_block(Location::new(0x2000));
        let func = b.close_with(Terminal::ReturnToHost);

        assert_eq!(func.block_count(), 3); // sentinel entry + 0x1000 + 0x2000
        let first = func.find_block_at(Location::new(0x1000)).unwrap();
        let second = func.find_block_at(Location::new(0x2000)).unwrap();
        assert!(func.block(first).succs.contains(&second));
        assert!(func.block(second).preds.contains(&first));
    }

    #[test]
    fn if_terminal_creates_both_arms() {
        let mut b = HirBuilder::new(Location::new(0x1000));
        let cond = b.load_imm(Imm::Bool(true));
        let (then_b, else_b) = b.if_(cond, Location::new(0x10), Location::new(0x20));
        b.set_current(then_b);
        let func_then = b.close_with(Terminal::ReturnToHost);
        let _ = else_b;
        assert!(func_then.find_block_at(Location::new(0x20)).is_some());
    }
}
