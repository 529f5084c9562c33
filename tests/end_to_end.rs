//! Exercises the `xlate` facade the way an embedder would: map a module,
//! register a translator, and run to completion (`spec.md` §8 scenario 1
//! "Straight-line two-block run").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memoffset::offset_of;
use xlate::{AddressSpace, Config, HaltReason, Location, Module as XModule, ModuleConfig, Runtime, State};
use xlate_ir::{HirBuilder, Terminal};
use xlate_types::Imm;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// `LoadImm 0x42 -> StoreUniform off=0`, terminal `LinkBlock(0x2000)`, then a
/// block at `0x2000` that returns to the host — the literal scenario from
/// `spec.md` §8.1.
fn build_straight_line_module(space: &Arc<AddressSpace>) -> Arc<XModule> {
    let module = space
        .map_module(Location::new(0x1000), Location::new(0x3000), ModuleConfig::default())
        .expect("fresh address space, nothing to overlap");

    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();
    module.set_translator(Arc::new(move |loc| {
        calls2.fetch_add(1, Ordering::SeqCst);
        if loc == Location::new(0x1000) {
            let mut b = HirBuilder::new(loc);
            let v = b.load_imm(Imm::U32(0x42));
            b.store_uniform(xlate_ir::Uniform::new(0, xlate_types::ValueType::U64), v);
            Some(b.close_with(Terminal::LinkBlock { next: Location::new(0x2000) }))
        } else if loc == Location::new(0x2000) {
            let b = HirBuilder::new(loc);
            Some(b.close_with(Terminal::ReturnToHost))
        } else {
            None
        }
    }));
    module
}

#[test]
fn straight_line_two_block_run_matches_spec_scenario_one() {
    init_tracing();
    let space = Arc::new(AddressSpace::new());
    let _module = build_straight_line_module(&space);

    let config = Config::new(0x1000, 0x3000);
    let mut rt = Runtime::new(config, space).expect("runtime construction");

    let halt = rt.run();
    assert_eq!(halt, HaltReason::NONE, "a straight-line LinkBlock -> ReturnToHost leaves nothing pending");
    assert_eq!(rt.get_location(), Location::new(0x2000), "current_loc lands on the linked block");

    let buf = rt.uniform_buffer();
    assert_eq!(&buf[0..8], &0x42u64.to_le_bytes(), "byte 0..8 of the uniform buffer holds the stored immediate");
}

/// `State`'s layout is part of the public ABI this facade re-exports
/// (`spec.md` §6); an embedder linking against `xlate` directly -- not just
/// `xlate-runtime`'s own `tests/state_abi.rs` -- must see the same offsets.
#[test]
fn facade_reexports_the_same_state_layout() {
    assert_eq!(offset_of!(State, halt_reason), xlate_types::state_abi::state_offset::HALT_REASON);
    assert_eq!(offset_of!(State, current_loc), xlate_types::state_abi::state_offset::CURRENT_LOC);
}
