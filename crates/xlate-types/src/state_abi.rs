/// Stable byte offsets of `State`'s fields (`spec.md` §6 "`State` memory
/// layout"). The struct itself is defined in `xlate-runtime` (it owns the
/// uniform buffer's storage), but both `xlate-runtime`'s trampoline code and
/// `xlate-codegen`'s IR→Wasm lowering must agree on these offsets without
/// either crate depending on the other, so the contract lives here at the
/// bottom of the dependency graph.
///
/// `xlate-runtime` asserts these against the real struct with `memoffset`
/// (`SPEC_FULL.md` §C "Test tooling").
pub mod state_offset {
    pub const L1_CODE_CACHE: usize = 0x00;
    pub const L2_CODE_CACHE: usize = 0x08;
    pub const INTERFACE: usize = 0x10;
    pub const HALT_REASON: usize = 0x18;
    pub const PREV_LOC: usize = 0x20;
    pub const RSB_POINTER: usize = 0x28;
    pub const CURRENT_LOC: usize = 0x30;
    pub const BLOCKING_LINKAGE_ADDR: usize = 0x38;
    pub const PAGE_TABLE: usize = 0x40;
    pub const LOCAL_BUFFER: usize = 0x48;
    pub const HOST_FLAGS: usize = 0x50;
    pub const UNIFORM_BUFFER_BEGIN: usize = 0x58;
}

#[cfg(test)]
mod tests {
    use super::state_offset::*;

    #[test]
    fn offsets_are_monotonically_increasing_and_8_aligned_until_the_buffer() {
        let ordered = [
            L1_CODE_CACHE,
            L2_CODE_CACHE,
            INTERFACE,
            HALT_REASON,
            PREV_LOC,
            RSB_POINTER,
            CURRENT_LOC,
            BLOCKING_LINKAGE_ADDR,
            PAGE_TABLE,
            LOCAL_BUFFER,
            HOST_FLAGS,
            UNIFORM_BUFFER_BEGIN,
        ];
        for w in ordered.windows(2) {
            assert!(w[0] < w[1], "{:#x} should precede {:#x}", w[0], w[1]);
        }
    }
}
