#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(target_os = "linux")]
pub use linux as sys;

#[cfg(target_os = "macos")]
pub mod macos;
#[cfg(target_os = "macos")]
pub use macos as sys;

use crate::util::{align_up, is_aligned};
use core::ptr;

/// Map anonymous memory. Returns null on failure.
///
/// # Safety
/// Caller must ensure `size` is page-aligned and non-zero.
#[inline]
pub unsafe fn map_anonymous(size: usize) -> *mut u8 {
    sys::map_anonymous(size)
}

/// Unmap previously mapped memory.
///
/// # Safety
/// `ptr` must have been returned by `map_anonymous` (or be a page-aligned
/// piece of such a mapping) and `size` must match.
#[inline]
pub unsafe fn unmap(ptr: *mut u8, size: usize) {
    sys::unmap(ptr, size);
}

/// Advise the kernel that the memory range is no longer needed.
/// The kernel may reclaim the physical pages; the range stays mapped.
///
/// # Safety
/// `ptr` and `size` must refer to a valid mapped region and be page-aligned.
#[inline]
pub unsafe fn advise_free(ptr: *mut u8, size: usize) {
    sys::advise_free(ptr, size);
}

/// Map `size` bytes whose base address is a multiple of `align`.
///
/// Maps `size + align` bytes and trims the unaligned head and the excess
/// tail, so the returned region is an ordinary mapping that can be
/// unmapped with `unmap(ptr, size)`. Returns null on failure.
///
/// # Safety
/// `size` must be a non-zero multiple of `align`, and `align` a power of two
/// that is a multiple of the page size.
pub unsafe fn map_aligned(size: usize, align: usize) -> *mut u8 {
    debug_assert!(is_aligned(size, align));

    let raw = map_anonymous(size + align);
    if raw.is_null() {
        return ptr::null_mut();
    }

    let aligned = align_up(raw as usize, align);
    let pad_begin = aligned - raw as usize;
    let pad_end = align - pad_begin;

    if pad_begin > 0 {
        unmap(raw, pad_begin);
    }
    let base = raw.add(pad_begin);
    if pad_end > 0 {
        unmap(base.add(size), pad_end);
    }
    base
}
