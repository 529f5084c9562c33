use xlate_types::ValueType;

/// A typed slice `{offset, ValueType}` into the per-thread uniform buffer
/// (guest CPU-state region). Loads/stores of `Uniform` are the only way IR
/// reads/writes guest registers and flags (`spec.md` §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Uniform {
    pub offset: u32,
    pub ty: ValueType,
}

impl Uniform {
    #[must_use]
    pub const fn new(offset: u32, ty: ValueType) -> Self {
        Uniform { offset, ty }
    }

    /// The half-open byte range this uniform covers; used by
    /// `UniformElimination` to detect full-coverage prior stores and by the
    /// static-uniform allocation plan to find overlapping host-register
    /// pins (`spec.md` §4.3, §4.6 step 3).
    #[must_use]
    pub fn byte_range(self) -> std::ops::Range<u32> {
        self.offset..(self.offset + self.ty.size_bytes())
    }

    #[must_use]
    pub fn overlaps(self, other: Uniform) -> bool {
        let a = self.byte_range();
        let b = other.byte_range();
        a.start < b.end && b.start < a.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlate_types::ValueType;

    #[test]
    fn overlap_detection() {
        let a = Uniform::new(0, ValueType::U32);
        let b = Uniform::new(2, ValueType::U32);
        let c = Uniform::new(4, ValueType::U32);
        assert!(a.overlaps(b));
        assert!(!a.overlaps(c));
    }
}
