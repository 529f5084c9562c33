//! Asserts `State`'s field offsets never drift from
//! `xlate_types::state_abi::state_offset`, the contract `xlate-codegen`'s
//! lowered Wasm blocks compile directly against.

use memoffset::offset_of;
use xlate_runtime::State;
use xlate_types::state_abi::state_offset;

#[test]
fn state_field_offsets_match_the_shared_contract() {
    assert_eq!(offset_of!(State, l1_code_cache), state_offset::L1_CODE_CACHE);
    assert_eq!(offset_of!(State, l2_code_cache), state_offset::L2_CODE_CACHE);
    assert_eq!(offset_of!(State, interface), state_offset::INTERFACE);
    assert_eq!(offset_of!(State, halt_reason), state_offset::HALT_REASON);
    assert_eq!(offset_of!(State, prev_loc), state_offset::PREV_LOC);
    assert_eq!(offset_of!(State, rsb_pointer), state_offset::RSB_POINTER);
    assert_eq!(offset_of!(State, current_loc), state_offset::CURRENT_LOC);
    assert_eq!(
        offset_of!(State, blocking_linkage_addr),
        state_offset::BLOCKING_LINKAGE_ADDR
    );
    assert_eq!(offset_of!(State, page_table), state_offset::PAGE_TABLE);
    assert_eq!(offset_of!(State, local_buffer), state_offset::LOCAL_BUFFER);
    assert_eq!(offset_of!(State, host_flags), state_offset::HOST_FLAGS);
    assert_eq!(
        offset_of!(State, uniform_buffer),
        state_offset::UNIFORM_BUFFER_BEGIN
    );
}
