use crate::OpCode;
use xlate_types::{Imm, ValueType};

/// Fold a binary opcode over two `LoadImm` operands when both are
/// statically known (`spec.md` §4.6 step 6: "Applied opportunistically
/// during the passes above for `LoadImm`+binary-op; replaces defs and
/// retargets users").
///
/// Returns `None` when either operand is not a constant, or the opcode has
/// no constant-folding rule (e.g. side-effecting opcodes never reach here).
#[must_use]
pub fn try_fold_binop(
    opcode: OpCode,
    left: Option<(Imm, ValueType)>,
    right: Option<(Imm, ValueType)>,
) -> Option<Imm> {
    let (l, ty) = left?;
    let (r, _) = right?;
    let a = l.as_u64();
    let b = r.as_u64();
    let mask = width_mask(ty);
    let result = match opcode {
        OpCode::Add => a.wrapping_add(b) & mask,
        OpCode::Sub => a.wrapping_sub(b) & mask,
        OpCode::And => a & b,
        OpCode::Or => a | b,
        OpCode::Xor => a ^ b,
        OpCode::Shl => a.wrapping_shl((b & 63) as u32) & mask,
        OpCode::Shr => (a & mask).wrapping_shr((b & 63) as u32),
        OpCode::Mul => a.wrapping_mul(b) & mask,
        _ => return None,
    };
    Some(imm_of_width(result, ty))
}

fn width_mask(ty: ValueType) -> u64 {
    let bits = ty.size_bytes() * 8;
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn imm_of_width(value: u64, ty: ValueType) -> Imm {
    match ty.size_bytes() {
        1 => Imm::U8(value as u8),
        2 => Imm::U16(value as u16),
        4 => Imm::U32(value as u32),
        _ => Imm::U64(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_add_of_two_constants() {
        let r = try_fold_binop(
            OpCode::Add,
            Some((Imm::U32(2), ValueType::U32)),
            Some((Imm::U32(3), ValueType::U32)),
        );
        assert_eq!(r, Some(Imm::U32(5)));
    }

    #[test]
    fn non_constant_operand_does_not_fold() {
        assert_eq!(try_fold_binop(OpCode::Add, None, Some((Imm::U32(3), ValueType::U32))), None);
    }

    #[test]
    fn add_wraps_at_declared_width() {
        let r = try_fold_binop(
            OpCode::Add,
            Some((Imm::U8(0xFF), ValueType::U8)),
            Some((Imm::U8(1), ValueType::U8)),
        );
        assert_eq!(r, Some(Imm::U8(0)));
    }
}
