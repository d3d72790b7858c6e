//! Utility functions.

/// Aligns an address or size up to the next multiple of `align`.
/// `align` must be a power of two.
///
/// Works in `u64` so that rounding a value near the top of the 32-bit
/// space cannot wrap.
pub fn align_up(addr: u64, align: u64) -> u64 {
    assert!(align.is_power_of_two());
    (addr + align - 1) & !(align - 1)
}
