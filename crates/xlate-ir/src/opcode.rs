use xlate_types::ValueType;

/// The core IR opcode set (`spec.md` §3-§4.6). Each variant's arity and
/// argument kinds are declared by `IrMeta` and checked on every `Inst`
/// append (`spec.md` §4.4 "Validation").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Materialize a constant. Arity 1: `Imm`.
    LoadImm,
    /// Read the uniform buffer. Arity 1: `Uniform`. Absent from a function
    /// once `UniformElimination` statically resolves it (`spec.md` §4.6
    /// step 3).
    LoadUniform,
    /// Write the uniform buffer. Arity 2: `Uniform`, `Value`. Side-effecting.
    StoreUniform,
    /// Pre-SSA local definition. Arity 1: `Local`. Removed by
    /// `LocalElimination` (`spec.md` §4.6 step 1).
    DefineLocal,
    /// Pre-SSA local read. Arity 1: `Local`.
    LoadLocal,
    /// Pre-SSA local write. Arity 2: `Local`, `Value`. Side-effecting until
    /// SSA construction removes it.
    StoreLocal,
    /// SSA phi. Arity 1: `Params` (one incoming `Value` per predecessor).
    AddPhi,
    /// Reinterpret bit pattern to another `ValueType` of equal width.
    /// Arity 1: `Value`.
    BitCast,
    /// Reinterpret a sub-range of bits of a wider `Value` as a narrower
    /// type. Arity 2: `Value`, `Imm` (bit offset).
    BitExtract,
    /// Read a static-uniform-pinned host GPR. Arity 1: `Imm` (register
    /// index). Produced by `UniformElimination` (`spec.md` §4.3, §4.6
    /// step 3); never emitted by the builder directly.
    GetHostGpr,
    /// Write a static-uniform-pinned host GPR. Arity 2: `Imm`, `Value`.
    SetHostGpr,
    GetHostFpr,
    SetHostFpr,
    /// Binary arithmetic/logic. Arity 2: `Value`/`Imm`/`Operand` operands
    /// (validated per-instance; codegen further narrows via `EmitOperand`).
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Mul,
    UDiv,
    SDiv,
    /// Unary. Arity 1.
    Not,
    Neg,
    /// Compare, producing a `BOOL` value. Arity 2.
    Cmp,
    /// `cond ? a : b`. Arity 3.
    Select,
    /// Load from opaque guest memory via `page_table`. Arity 1: address
    /// `Value`.
    MemLoad,
    /// Store to opaque guest memory. Arity 2: address `Value`, data
    /// `Value`. Side-effecting.
    MemStore,
    /// Pseudo: attach a flags-producing mask to the preceding arithmetic
    /// def. Never appears as a standalone stream entry — always riding the
    /// pseudo-op chain (`spec.md` §3 "Flags", Design Notes).
    SaveFlags,
    ClearFlags,
    /// Arity 1: `Flags` mask. Produces `BOOL`.
    TestFlags,
    TestNotFlags,
    /// Arity 1: `Flags` mask. Produces the raw flags word.
    GetFlags,
    /// Call a registered host function by address. Arity 1: `Lambda`
    /// (address). Side-effecting; surfaces as `HaltReason::CALL_HOST` --
    /// lowering hands control back to the dispatcher, which resolves the
    /// call against the host-function registry and resumes the caller
    /// (`spec.md` §4.9 "CallHost()").
    CallLambda,
    /// Call a registered host function by address, inline, without ever
    /// halting. Arity 1: `Value` (address). Side-effecting; lowered to a
    /// direct `"env"."call_host"` import call in the same Wasm block.
    CallDynamic,
    /// Update `State.current_loc` without transferring control. Arity 1:
    /// `Lambda`. Side-effecting.
    SetLocation,
    /// Advance the guest PC by a fixed instruction length. Arity 1: `Imm`.
    /// Side-effecting — this is the only IR-level PC mutation the spec
    /// names (`spec.md` §5 "Suspension points").
    AdvancePc,
    /// Push a predicted return location onto the per-thread RSB
    /// (`spec.md` §4.1 "RSB", §8 scenario 4: "`A: PushRSB(retA); call B`").
    /// Arity 1: `Imm` (the guest `Location` the eventual matching
    /// `Terminal::PopRsbHint` should resume at). Side-effecting: it talks
    /// to the host-owned `Rsb`, not to any value in this function.
    PushRsb,
}

/// Declared arity/return-kind metadata for one `OpCode` (`spec.md` §4.4).
#[derive(Clone, Copy, Debug)]
pub struct IrMeta {
    pub arity: usize,
    pub declared_return: ValueType,
    pub side_effect: bool,
}

impl OpCode {
    #[must_use]
    pub fn meta(self) -> IrMeta {
        use OpCode::*;
        let (arity, declared_return, side_effect) = match self {
            LoadImm => (1, ValueType::U64, false),
            LoadUniform => (1, ValueType::U64, false),
            StoreUniform => (2, ValueType::Void, true),
            DefineLocal => (1, ValueType::Void, false),
            LoadLocal => (1, ValueType::U64, false),
            StoreLocal => (2, ValueType::Void, true),
            AddPhi => (1, ValueType::U64, false),
            BitCast => (1, ValueType::U64, false),
            BitExtract => (2, ValueType::U64, false),
            GetHostGpr | GetHostFpr => (1, ValueType::U64, false),
            SetHostGpr | SetHostFpr => (2, ValueType::Void, true),
            Add | Sub | And | Or | Xor | Shl | Shr | Sar | Mul | UDiv | SDiv => {
                (2, ValueType::U64, false)
            }
            Not | Neg => (1, ValueType::U64, false),
            Cmp => (2, ValueType::Bool, false),
            Select => (3, ValueType::U64, false),
            MemLoad => (1, ValueType::U64, false),
            MemStore => (2, ValueType::Void, true),
            SaveFlags | ClearFlags => (1, ValueType::Void, false),
            TestFlags | TestNotFlags => (1, ValueType::Bool, false),
            GetFlags => (1, ValueType::U64, false),
            CallLambda | CallDynamic => (1, ValueType::Void, true),
            SetLocation => (1, ValueType::Void, true),
            AdvancePc => (1, ValueType::Void, true),
            PushRsb => (1, ValueType::Void, true),
        };
        IrMeta {
            arity,
            declared_return,
            side_effect,
        }
    }

    /// Side-effect opcode set per `spec.md` §4.6 step 5 DCE: memory stores,
    /// `StoreUniform`, `StoreLocal` (pre-SSA), `CallLambda/Dynamic`,
    /// `SetLocation`, `AdvancePC`.
    #[must_use]
    pub fn has_side_effect(self) -> bool {
        self.meta().side_effect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arities_match_spec_table() {
        assert_eq!(OpCode::StoreUniform.meta().arity, 2);
        assert_eq!(OpCode::Select.meta().arity, 3);
        assert_eq!(OpCode::LoadImm.meta().arity, 1);
    }

    #[test]
    fn side_effect_set() {
        assert!(OpCode::StoreUniform.has_side_effect());
        assert!(OpCode::CallLambda.has_side_effect());
        assert!(!OpCode::Add.has_side_effect());
    }

    #[test]
    fn comparisons_return_bool() {
        assert_eq!(OpCode::Cmp.meta().declared_return, ValueType::Bool);
        assert_eq!(OpCode::TestFlags.meta().declared_return, ValueType::Bool);
    }
}
