use xlate_types::ValueType;

/// A function-local scalar slot, `{id, ValueType}`, that lives only until
/// `LocalElimination` rewrites it into SSA form (`spec.md` §3, §4.6 step 1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Local {
    pub id: u32,
    pub ty: ValueType,
}

impl Local {
    #[must_use]
    pub const fn new(id: u32, ty: ValueType) -> Self {
        Local { id, ty }
    }
}
