/// Align `value` up to the next multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Align `value` down to the previous multiple of `align`.
/// `align` must be a power of two.
#[inline(always)]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check if `value` is aligned to `align`.
#[inline(always)]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Size and alignment of every slab. Slab headers are recovered from item
/// pointers by masking with `SLAB_SIZE - 1`, so this must be a power of two.
pub const SLAB_SIZE: usize = 1 << 22; // 4 MiB

/// Largest item any slab cache may serve.
pub const MAX_SLAB_ITEM: usize = SLAB_SIZE / 4;

/// Alignment of the first byte after the slab header.
pub const CACHE_ALIGN: usize = 32;

/// Word size; every item size is a multiple of it.
pub const PTR_SIZE: usize = core::mem::size_of::<usize>();

/// Upper bound on the number of automatic size classes.
pub const MAX_SIZE_CLASSES: usize = 256;

/// Runtime page size, initialized from sysconf(_SC_PAGESIZE) at startup.
/// Starts at 4096 so `page_size()` never returns zero.
static PAGE_SIZE_CACHED: core::sync::atomic::AtomicUsize =
    core::sync::atomic::AtomicUsize::new(4096);

/// Initialize the page size from the OS.
pub fn init_page_size() {
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let ps = if ps > 0 { ps as usize } else { 4096 };
    PAGE_SIZE_CACHED.store(ps, core::sync::atomic::Ordering::Release);
}

/// Get the system page size. Always returns a valid value (4096 default, real value after init).
#[inline(always)]
pub fn page_size() -> usize {
    PAGE_SIZE_CACHED.load(core::sync::atomic::Ordering::Relaxed)
}

/// Magic written into every formatted slab header.
pub const SLAB_MAGIC: u32 = 0x51ab_face;

/// Poison magic reported for regions blanked at format time and for guards.
pub const INACCESSIBLE_MAGIC: u8 = 0xFA;

/// Poison magic reported for freed items.
pub const FREED_MAGIC: u8 = 0xFD;
