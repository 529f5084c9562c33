use xxhash_rust::xxh3::xxh3_64;

/// The wire-stable parameter type used in `HostFunction` signatures
/// (`spec.md` §6).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    Void,
    Point,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float8,
    Float16,
    Float32,
    Float64,
    Float128,
    Struct(Vec<ParamType>),
}

impl ParamType {
    /// Stable discriminant used only to build the flattened byte stream fed
    /// to the signature hash; never persisted or compared across versions.
    fn tag(&self) -> u8 {
        match self {
            ParamType::Void => 0,
            ParamType::Point => 1,
            ParamType::Uint8 => 2,
            ParamType::Uint16 => 3,
            ParamType::Uint32 => 4,
            ParamType::Uint64 => 5,
            ParamType::Int8 => 6,
            ParamType::Int16 => 7,
            ParamType::Int32 => 8,
            ParamType::Int64 => 9,
            ParamType::Float8 => 10,
            ParamType::Float16 => 11,
            ParamType::Float32 => 12,
            ParamType::Float64 => 13,
            ParamType::Float128 => 14,
            ParamType::Struct(_) => 15,
        }
    }

    fn flatten_into(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        if let ParamType::Struct(fields) = self {
            out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
            for field in fields {
                field.flatten_into(out);
            }
        }
    }
}

/// `signature_hash([ParamType]) = xxh3_64(contiguous ParamType bytes)`.
///
/// `spec.md` §6 specifies CityHash64 over "the contiguous `ParamType`
/// bytes"; ported to `xxh3` (already a dependency elsewhere in the teacher's
/// repo) per `SPEC_FULL.md` §C — any stable, collision-resistant 64-bit hash
/// satisfies the contract, which only requires two equal signatures to hash
/// equal.
#[must_use]
pub fn signature_hash(params: &[ParamType]) -> u64 {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(params.len() as u32).to_le_bytes());
    for param in params {
        param.flatten_into(&mut bytes);
    }
    xxh3_64(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_signatures_hash_equal() {
        let a = [ParamType::Uint64, ParamType::Int32];
        let b = [ParamType::Uint64, ParamType::Int32];
        assert_eq!(signature_hash(&a), signature_hash(&b));
    }

    #[test]
    fn distinct_signatures_hash_differ() {
        let a = [ParamType::Uint64];
        let b = [ParamType::Int64];
        assert_ne!(signature_hash(&a), signature_hash(&b));
    }

    #[test]
    fn nested_struct_participates_in_hash() {
        let flat = [ParamType::Uint8];
        let nested = [ParamType::Struct(vec![ParamType::Uint8])];
        assert_ne!(signature_hash(&flat), signature_hash(&nested));
    }
}
