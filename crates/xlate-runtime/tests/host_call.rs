//! Exercises the `OpCode::CallLambda` / `HaltReason::CALL_HOST` route end to
//! end: a registered `HostFunction` is actually invoked from translated
//! code, and control resumes at the call site afterward.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use xlate_ir::{Function as IrFunction, HirBuilder, Lambda, Terminal};
use xlate_runtime::{Config, HostFunction, Runtime, State};
use xlate_types::Location;

static CALLS: AtomicUsize = AtomicUsize::new(0);
static SEEN_AT: AtomicUsize = AtomicUsize::new(0);

fn counting_host_fn(state: &State) -> u64 {
    CALLS.fetch_add(1, Ordering::SeqCst);
    SEEN_AT.store(state.current_loc().value() as usize, Ordering::SeqCst);
    0x2A
}

/// A block whose only content is a host call, mirroring `Assembler::CallHost`
/// wrapping `CallLambda` in `ganyao114/SwiftVM`'s frontend.
fn call_host_function(start: Location, target: Location) -> IrFunction {
    let mut b = HirBuilder::new(start);
    b.call_lambda(Lambda::Imm(target));
    // Dead: `CallLambda`'s lowering always returns before this is reached.
    b.close_with(Terminal::ReturnToHost)
}

#[test]
fn call_lambda_invokes_the_registered_host_function_and_resumes_the_caller() {
    CALLS.store(0, Ordering::SeqCst);
    SEEN_AT.store(0, Ordering::SeqCst);

    let host_addr = Location::new(0x9000);
    let call_site = Location::new(0x1000);

    let space = Arc::new(xlate_runtime::AddressSpace::new());
    space.trampolines().register_host_function(HostFunction::new(
        "env",
        "counting_host_fn",
        vec![],
        host_addr,
        counting_host_fn,
    ));
    let module = space
        .map_module(call_site, Location::new(0x3000), xlate_runtime::ModuleConfig::default())
        .unwrap();
    module.set_translator(Arc::new(move |loc| Some(call_host_function(loc, host_addr))));

    let config = Config::new(call_site.value(), 0x3000);
    let mut rt = Runtime::new(config, space).unwrap();

    // First step translates the block at `call_site`; nothing has run yet.
    let halt = rt.step();
    assert_eq!(halt, xlate_types::HaltReason::CODE_MISS);
    assert_eq!(CALLS.load(Ordering::SeqCst), 0, "translating must not execute the block");

    // Second step invokes the now-cached block, which halts with CALL_HOST;
    // `dispatch_one` must resolve that inline before `step()` returns.
    let halt = rt.step();
    assert_eq!(CALLS.load(Ordering::SeqCst), 1, "the host function must have run exactly once");
    assert_eq!(
        SEEN_AT.load(Ordering::SeqCst),
        host_addr.value() as usize,
        "the host function must observe current_loc pointing at its own address"
    );
    assert_eq!(
        rt.get_location(),
        call_site,
        "control must resume at the call site, not stay parked on the host address"
    );
    assert!(
        !halt.is_terminal(),
        "a resolved CALL_HOST halt must leave the loop able to retry, not hand control to the embedder"
    );
}
