//! Guard bytes around slab items.
//!
//! A redzone is written just before the first item of a slab and right after
//! every carved item. Client code that runs past the end of an item lands
//! in the following redzone, which `validate()` later finds modified.

/// Redzones are compiled in for debug builds, or on demand with the
/// `redzone` feature. When off they take no space at all.
pub const RED_ZONE_ENABLED: bool = cfg!(any(debug_assertions, feature = "redzone"));

/// Bytes of guard after each item (and before the first one).
pub const RED_ZONE_SIZE: usize = if RED_ZONE_ENABLED { 8 } else { 0 };

/// Guard fill pattern.
pub const RED_ZONE_BYTE: u8 = 0xFA;

/// Fill one redzone with the guard pattern.
///
/// # Safety
/// `ptr` must point to `RED_ZONE_SIZE` writable bytes.
#[inline]
pub unsafe fn write_red_zone(ptr: *mut u8) {
    if RED_ZONE_ENABLED {
        core::ptr::write_bytes(ptr, RED_ZONE_BYTE, RED_ZONE_SIZE);
    }
}

/// Check that one redzone still holds the guard pattern.
///
/// # Safety
/// `ptr` must point to `RED_ZONE_SIZE` readable bytes.
#[inline]
pub unsafe fn check_red_zone(ptr: *const u8) -> bool {
    let mut i = 0;
    while i < RED_ZONE_SIZE {
        if ptr.add(i).read() != RED_ZONE_BYTE {
            return false;
        }
        i += 1;
    }
    true
}
