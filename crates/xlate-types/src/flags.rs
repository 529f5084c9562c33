use bitflags::bitflags;

bitflags! {
    /// The condition-flag bitset threaded through `SaveFlags`/`ClearFlags`
    /// pseudo-ops and `TestFlags`/`GetFlags` (`spec.md` §3).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u16 {
        const CARRY             = 1 << 0;
        const OVERFLOW          = 1 << 1;
        const ZERO              = 1 << 2;
        const NEGATE            = 1 << 3;
        const PARITY            = 1 << 4;
        const AUXILIARY_CARRY   = 1 << 5;
    }
}

impl Flags {
    #[must_use]
    pub const fn nzcv() -> Flags {
        Flags::from_bits_truncate(
            Flags::CARRY.bits() | Flags::OVERFLOW.bits() | Flags::ZERO.bits() | Flags::NEGATE.bits(),
        )
    }
}

bitflags! {
    /// The `State.halt_reason` bitset (`spec.md` §4.1, §7).
    ///
    /// Stored as a plain `u32` at a stable `State` offset so translated code
    /// and hand-written trampolines can write it without going through the
    /// Rust type; `HaltReason` is the typed view the host loop matches on.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct HaltReason: u32 {
        const NONE          = 0;
        const STEP          = 1 << 0;
        const SIGNAL        = 1 << 1;
        const PAGE_FATAL    = 1 << 2;
        const CODE_MISS     = 1 << 3;
        const MODULE_MISS   = 1 << 4;
        const BLOCK_LINKAGE = 1 << 5;
        const CALL_HOST     = 1 << 6;
        const ILLEGAL_CODE  = 1 << 7;
    }
}

impl HaltReason {
    /// `spec.md` §4.9: terminal reasons never re-enter the dispatcher
    /// without an explicit API call from the embedder.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.intersects(
            HaltReason::PAGE_FATAL
                .union(HaltReason::SIGNAL)
                .union(HaltReason::ILLEGAL_CODE)
                .union(HaltReason::MODULE_MISS),
        ) || self.is_empty()
    }
}

bitflags! {
    /// Global optimization-pipeline toggles (`Config.global_opts`,
    /// `spec.md` §6) and per-module opt-ins (`ModuleConfig.optimizations`,
    /// recovered from `source/runtime/backend/module.h` — see `SPEC_FULL.md` §D.1).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Optimizations: u32 {
        const RETURN_STACK_BUFFER   = 1 << 0;
        const FLAG_ELIMINATION      = 1 << 1;
        const UNIFORM_ELIMINATION   = 1 << 2;
        const DEAD_CODE_REMOVE      = 1 << 3;
        const STATIC_CODE           = 1 << 4;
        const BLOCK_LINK            = 1 << 5;
        const CONSTANT_FOLDING      = 1 << 6;
        const DIRECT_BLOCK_LINK     = 1 << 7;
        const INDIRECT_BLOCK_LINK   = 1 << 8;
        const FUNCTION_BASE_COMPILE = 1 << 9;
    }
}

impl Optimizations {
    #[must_use]
    pub const fn has(self, flag: Optimizations) -> bool {
        self.intersects(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_reasons() {
        assert!(HaltReason::PAGE_FATAL.is_terminal());
        assert!(HaltReason::SIGNAL.is_terminal());
        assert!(HaltReason::ILLEGAL_CODE.is_terminal());
        assert!(HaltReason::MODULE_MISS.is_terminal());
        assert!(!HaltReason::CODE_MISS.is_terminal());
        assert!(!HaltReason::BLOCK_LINKAGE.is_terminal());
        assert!(!HaltReason::CALL_HOST.is_terminal());
    }

    #[test]
    fn module_opt_query() {
        let cfg = Optimizations::DIRECT_BLOCK_LINK | Optimizations::CONSTANT_FOLDING;
        assert!(cfg.has(Optimizations::DIRECT_BLOCK_LINK));
        assert!(!cfg.has(Optimizations::INDIRECT_BLOCK_LINK));
    }
}
