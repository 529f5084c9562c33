use crate::{Lambda, Local, Operand, Uniform, ValueId};
use xlate_types::{Flags, Imm};

/// A tagged union over every shape an `Inst`'s generic argument slot can
/// take (`spec.md` §4.4, Design Notes "Tagged arguments"). `Operand` spans
/// three slots on its own and is never nested inside another `Arg`.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Void,
    Value(ValueId),
    Imm(Imm),
    /// A boolean-typed `Value` used as a branch/select condition; kept
    /// distinct from the generic `Value` tag so `IRMeta` validation can
    /// require a `BOOL`-typed def without re-deriving it from `ValueType`.
    Cond(ValueId),
    Flags(Flags),
    Operand(Operand),
    Local(Local),
    Uniform(Uniform),
    Lambda(Lambda),
    /// The incoming-value list of an `AddPhi`, one per predecessor in
    /// block-predecessor order (`spec.md` §4.6 step 1).
    Params(Vec<ValueId>),
}

impl Arg {
    #[must_use]
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Arg::Value(v) | Arg::Cond(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_imm(&self) -> Option<Imm> {
        match self {
            Arg::Imm(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_uniform(&self) -> Option<Uniform> {
        match self {
            Arg::Uniform(u) => Some(*u),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_local(&self) -> Option<Local> {
        match self {
            Arg::Local(l) => Some(*l),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, Arg::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cond_and_value_both_project_to_value_id() {
        assert_eq!(Arg::Value(ValueId(1)).as_value(), Some(ValueId(1)));
        assert_eq!(Arg::Cond(ValueId(2)).as_value(), Some(ValueId(2)));
        assert_eq!(Arg::Void.as_value(), None);
    }
}
