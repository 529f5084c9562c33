//! The `State` memory layout (`spec.md` §6). This is the single shared
//! region every lowered Wasm block function and every trampoline entry/exit
//! addresses through the fixed offsets in
//! `xlate_types::state_abi::state_offset` -- `tests/state_abi.rs` asserts
//! the two never drift apart with `memoffset`.
//!
//! Pointer-shaped fields are plain `u64` rather than raw pointers: from the
//! Wasm side they are never dereferenced directly (a lowered block receives
//! `page_table_ptr`/`host_reg_ptr`/`local_buffer_ptr` as separate `i32`
//! parameters, computed from these fields by the trampoline before each
//! call, per `spec.md` §4.1 step 2), and keeping them as plain integers
//! means `State` is `Send + Sync` without an `unsafe impl`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use xlate_types::{HaltReason, Location};

/// Size of the uniform buffer this crate allocates; `Config::uniform_buffer_size`
/// caps the prefix an embedder may actually address (`spec.md` §6 "Config").
pub const UNIFORM_BUFFER_BYTES: usize = 4096;

#[repr(C)]
pub struct State {
    pub l1_code_cache: u64,
    pub l2_code_cache: u64,
    pub interface: u64,
    pub halt_reason: AtomicU32,
    _halt_reason_pad: u32,
    pub prev_loc: AtomicU64,
    pub rsb_pointer: u64,
    pub current_loc: AtomicU64,
    pub blocking_linkage_addr: AtomicU64,
    pub page_table: u64,
    pub local_buffer: u64,
    pub host_flags: AtomicU64,
    pub uniform_buffer: [u8; UNIFORM_BUFFER_BYTES],
}

impl State {
    #[must_use]
    pub fn new() -> Self {
        State {
            l1_code_cache: 0,
            l2_code_cache: 0,
            interface: 0,
            halt_reason: AtomicU32::new(HaltReason::NONE.bits()),
            _halt_reason_pad: 0,
            prev_loc: AtomicU64::new(Location::INVALID.value()),
            rsb_pointer: 0,
            current_loc: AtomicU64::new(Location::INVALID.value()),
            blocking_linkage_addr: AtomicU64::new(0),
            page_table: 0,
            local_buffer: 0,
            host_flags: AtomicU64::new(0),
            uniform_buffer: [0u8; UNIFORM_BUFFER_BYTES],
        }
    }

    #[must_use]
    pub fn halt_reason(&self) -> HaltReason {
        HaltReason::from_bits_truncate(self.halt_reason.load(Ordering::Acquire))
    }

    pub fn set_halt_reason(&self, reason: HaltReason) {
        self.halt_reason.store(reason.bits(), Ordering::Release);
    }

    pub fn or_halt_reason(&self, reason: HaltReason) {
        self.halt_reason.fetch_or(reason.bits(), Ordering::AcqRel);
    }

    /// `Interface::signal_interrupt` (`spec.md` §5 "Cancellation/timeout"):
    /// settable from a thread other than the one running `Runtime::run`.
    pub fn signal_interrupt(&self) {
        self.or_halt_reason(HaltReason::SIGNAL);
    }

    pub fn clear_interrupt(&self) {
        self.halt_reason
            .fetch_and(!HaltReason::SIGNAL.bits(), Ordering::AcqRel);
    }

    #[must_use]
    pub fn current_loc(&self) -> Location {
        Location::from(self.current_loc.load(Ordering::Acquire))
    }

    pub fn set_current_loc(&self, loc: Location) {
        self.current_loc.store(loc.value(), Ordering::Release);
    }

    #[must_use]
    pub fn prev_loc(&self) -> Location {
        Location::from(self.prev_loc.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn uniform_buffer(&mut self, len: usize) -> &mut [u8] {
        &mut self.uniform_buffer[..len.min(UNIFORM_BUFFER_BYTES)]
    }
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_reason_round_trips() {
        let s = State::new();
        assert_eq!(s.halt_reason(), HaltReason::NONE);
        s.or_halt_reason(HaltReason::CODE_MISS);
        assert!(s.halt_reason().contains(HaltReason::CODE_MISS));
        s.signal_interrupt();
        assert!(s.halt_reason().contains(HaltReason::SIGNAL));
        s.clear_interrupt();
        assert!(!s.halt_reason().contains(HaltReason::SIGNAL));
    }

    #[test]
    fn current_loc_round_trips() {
        let s = State::new();
        s.set_current_loc(Location::new(0x4000));
        assert_eq!(s.current_loc(), Location::new(0x4000));
    }

    #[test]
    fn prev_loc_round_trips() {
        let s = State::new();
        s.prev_loc.store(Location::new(0x4000).value(), Ordering::Release);
        assert_eq!(s.prev_loc(), Location::new(0x4000));
    }
}
