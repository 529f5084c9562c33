//! How one `Runtime`'s shared Wasm linear memory (`xlate_codegen::abi`'s
//! imported `"env"."memory"`) is carved up among `State`, the guest page
//! table, the host-register scratch area, and the cross-block local buffer.
//!
//! Only `STATE_BASE` is a contract `xlate-codegen` knows about (it's where
//! `state_offset`'s offsets are measured from); the other three bases are
//! passed to every block call as ordinary `i32` parameters
//! (`PARAM_PAGE_TABLE_PTR` etc.), so a lowered block never needs to know
//! them at compile time.

pub const STATE_BASE: u32 = 0;
pub const STATE_SIZE: u32 = 8192;

pub const PAGE_TABLE_BASE: u32 = STATE_BASE + STATE_SIZE;
pub const PAGE_TABLE_SIZE: u32 = 4096;

pub const HOST_REG_BASE: u32 = PAGE_TABLE_BASE + PAGE_TABLE_SIZE;
pub const HOST_REG_SIZE: u32 = 4096;

pub const LOCAL_BUFFER_BASE: u32 = HOST_REG_BASE + HOST_REG_SIZE;
pub const LOCAL_BUFFER_SIZE: u32 = 4096;

pub const TOTAL_BYTES: u32 = LOCAL_BUFFER_BASE + LOCAL_BUFFER_SIZE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_inside_the_two_imported_pages() {
        assert!(TOTAL_BYTES as u64 <= xlate_codegen::MEMORY_PAGES * 65536);
    }
}
