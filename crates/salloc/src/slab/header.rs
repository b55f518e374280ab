//! Slab header and the item layout inside one slab.
//!
//! Layout of a formatted slab (`SLAB_SIZE` bytes, `SLAB_SIZE`-aligned):
//!
//! ```text
//! [header][pad to CACHE_ALIGN][rz][item][rz][item][rz] ... [uncarved]
//!                                 ^ first item             ^ cursor
//! ```
//!
//! Items are carved with a bump cursor; freed items go on an intrusive
//! singly linked free list threaded through their first word.

use super::arena::ArenaKind;
use super::cache::ClassId;
use super::list::{Links, Pointer};
use crate::hardening::redzone::{self, RED_ZONE_SIZE};
use crate::hardening::{abort_with_message, Instrument, ValidationReport};
use crate::util::{
    align_up, CACHE_ALIGN, INACCESSIBLE_MAGIC, PTR_SIZE, SLAB_MAGIC, SLAB_SIZE,
};
use core::mem;
use core::ptr::{self, NonNull};

/// Bytes taken by the header at the start of every slab.
pub const HEADER_SIZE: usize = mem::size_of::<Slab>();

/// Offset of the leading redzone from the slab base.
pub const LEADING_RED_ZONE_OFFSET: usize = align_up(HEADER_SIZE, CACHE_ALIGN);

/// Offset of the first item from the slab base.
pub const FIRST_ITEM_OFFSET: usize = align_up(LEADING_RED_ZONE_OFFSET + RED_ZONE_SIZE, PTR_SIZE);

// Advisory release keeps the first page; the header and leading redzone must live there.
const _: () = assert!(FIRST_ITEM_OFFSET <= 4096);

/// Distance between two consecutive items of `item_size`.
#[inline(always)]
pub const fn item_stride(item_size: usize) -> usize {
    align_up(item_size + RED_ZONE_SIZE, PTR_SIZE)
}

/// How many items of `item_size` one slab holds.
pub const fn capacity(item_size: usize) -> usize {
    (SLAB_SIZE - FIRST_ITEM_OFFSET) / item_stride(item_size)
}

/// Link word stored in a freed item.
#[repr(C)]
struct FreeItem {
    next: Pointer<FreeItem>,
}

#[repr(C)]
pub struct Slab {
    magic: u32,
    arena: ArenaKind,
    owner: Option<ClassId>,
    item_size: usize,
    /// Next uncarved byte.
    brk: *mut u8,
    /// Live items.
    items: usize,
    /// Bytes taken by live items and their trailing redzones.
    used: usize,
    free: Pointer<FreeItem>,
    /// Set once the slab fills up; an emptied slab is only released with it.
    need_release: bool,
    pub(crate) arena_link: Links,
    pub(crate) free_link: Links,
    pub(crate) cache_link: Links,
    pub(crate) partial_link: Links,
}

impl Slab {
    /// Write a blank header at `base`. The slab has no owner until formatted.
    ///
    /// # Safety
    /// `base` must point to at least `HEADER_SIZE` writable bytes, suitably
    /// aligned for `Slab`.
    pub unsafe fn init(base: *mut u8, arena: ArenaKind) -> NonNull<Slab> {
        let slab = base as *mut Slab;
        slab.write(Slab {
            magic: SLAB_MAGIC,
            arena,
            owner: None,
            item_size: 0,
            brk: base.wrapping_add(FIRST_ITEM_OFFSET),
            items: 0,
            used: 0,
            free: None,
            need_release: false,
            arena_link: Links::new(),
            free_link: Links::new(),
            cache_link: Links::new(),
            partial_link: Links::new(),
        });
        NonNull::new_unchecked(slab)
    }

    /// Recover the slab header owning `ptr` by masking the address down to
    /// the slab alignment. Aborts if the header magic is wrong.
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator and its slab must
    /// still be mapped. Foreign pointers may fault here.
    #[inline]
    pub unsafe fn of_ptr(ptr: *const u8) -> NonNull<Slab> {
        let base = (ptr as usize & !(SLAB_SIZE - 1)) as *mut Slab;
        if (*base).magic != SLAB_MAGIC {
            abort_with_message("salloc: pointer does not belong to a slab (bad magic)\n");
        }
        NonNull::new_unchecked(base)
    }

    /// Assign the slab to a cache and reset its item area.
    ///
    /// # Safety
    /// `slab` must be a live header detached from every cache list.
    pub unsafe fn format<I: Instrument>(
        slab: NonNull<Slab>,
        owner: ClassId,
        item_size: usize,
        instrument: &I,
    ) {
        let base = slab.as_ptr() as *mut u8;
        let s = &mut *slab.as_ptr();
        s.magic = SLAB_MAGIC;
        s.owner = Some(owner);
        s.item_size = item_size;
        s.items = 0;
        s.used = 0;
        s.free = None;
        s.brk = base.add(FIRST_ITEM_OFFSET);

        let leading = base.add(LEADING_RED_ZONE_OFFSET);
        instrument.mark_accessible(leading, RED_ZONE_SIZE);
        redzone::write_red_zone(leading);

        instrument.mark_inaccessible(
            leading,
            SLAB_SIZE - LEADING_RED_ZONE_OFFSET,
            INACCESSIBLE_MAGIC,
        );
    }

    /// Forget the item area of an emptied slab: cursor back to the first
    /// item, free list dropped, no owner. Pages past the header may be
    /// discarded after.
    pub fn reset(&mut self) {
        debug_assert_eq!(self.items, 0);
        self.brk = unsafe { self.base().add(FIRST_ITEM_OFFSET) };
        self.free = None;
        self.used = 0;
        self.owner = None;
    }

    #[inline]
    pub fn mark_needs_release(&mut self) {
        self.need_release = true;
    }

    #[inline]
    pub fn needs_release(&self) -> bool {
        self.need_release
    }

    /// Read and clear the release flag.
    #[inline]
    pub fn take_need_release(&mut self) -> bool {
        mem::replace(&mut self.need_release, false)
    }

    #[inline(always)]
    fn base(&self) -> *mut u8 {
        self as *const Slab as *mut u8
    }

    #[inline(always)]
    fn end(&self) -> usize {
        self.base() as usize + SLAB_SIZE
    }

    #[inline]
    pub fn magic(&self) -> u32 {
        self.magic
    }

    #[inline]
    pub fn arena(&self) -> ArenaKind {
        self.arena
    }

    #[inline]
    pub fn owner(&self) -> Option<ClassId> {
        self.owner
    }

    #[inline]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    #[inline]
    pub fn items(&self) -> usize {
        self.items
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn cursor(&self) -> *mut u8 {
        self.brk
    }

    #[inline]
    pub fn has_free_items(&self) -> bool {
        self.free.is_some()
    }

    /// Room for one more item and its trailing redzone before the slab end.
    #[inline]
    pub fn can_carve(&self) -> bool {
        self.brk as usize + self.item_size + RED_ZONE_SIZE <= self.end()
    }

    /// No item can be handed out without freeing one first.
    #[inline]
    pub fn is_fully_populated(&self) -> bool {
        !self.can_carve() && self.free.is_none()
    }

    /// Whether `ptr` is the start of an item that has been carved here.
    pub fn is_item(&self, ptr: *const u8) -> bool {
        let first = self.base() as usize + FIRST_ITEM_OFFSET;
        let p = ptr as usize;
        p >= first && p < self.brk as usize && (p - first) % item_stride(self.item_size) == 0
    }

    /// Bump-carve a fresh item and seal it with a trailing redzone.
    ///
    /// # Safety
    /// The slab must be formatted and `can_carve()` must hold.
    pub unsafe fn carve<I: Instrument>(&mut self, instrument: &I) -> NonNull<u8> {
        debug_assert!(self.can_carve());
        let item = self.brk;
        let item_size = self.item_size;

        instrument.mark_accessible(item, item_size + RED_ZONE_SIZE);
        redzone::write_red_zone(item.add(item_size));
        instrument.mark_inaccessible(item.add(item_size), RED_ZONE_SIZE, INACCESSIBLE_MAGIC);
        instrument.mark_allocated(item, item_size);

        self.brk = align_up(item as usize + item_size + RED_ZONE_SIZE, PTR_SIZE) as *mut u8;
        NonNull::new_unchecked(item)
    }

    /// Pop the most recently freed item.
    ///
    /// # Safety
    /// The slab must be formatted.
    pub unsafe fn pop_free<I: Instrument>(&mut self, instrument: &I) -> Option<NonNull<u8>> {
        let item = self.free?;
        if cfg!(debug_assertions) && !self.is_item(item.as_ptr() as *const u8) {
            abort_with_message("salloc: free list points outside its slab\n");
        }

        instrument.mark_accessible(item.as_ptr() as *const u8, PTR_SIZE);
        // The link word is the only reinterpretation of client memory.
        self.free = ptr::read(ptr::addr_of!((*item.as_ptr()).next));
        instrument.mark_allocated(item.as_ptr() as *const u8, self.item_size);

        Some(item.cast())
    }

    /// Thread `item` onto the free list.
    ///
    /// # Safety
    /// `item` must be a live item of this slab that the caller gives up.
    pub unsafe fn push_free(&mut self, item: NonNull<u8>) {
        if cfg!(debug_assertions) {
            if !self.is_item(item.as_ptr()) {
                abort_with_message("salloc: freed pointer is not an item of its slab\n");
            }
            if let Some(head) = self.free {
                if !self.is_item(head.as_ptr() as *const u8) {
                    abort_with_message("salloc: free list points outside its slab\n");
                }
            }
        }

        let item = item.cast::<FreeItem>();
        ptr::write(ptr::addr_of_mut!((*item.as_ptr()).next), self.free);
        self.free = Some(item);
    }

    #[inline]
    pub fn note_allocated(&mut self) {
        self.items += 1;
        self.used += self.item_size + RED_ZONE_SIZE;
    }

    /// Returns the number of items still live.
    #[inline]
    pub fn note_freed(&mut self) -> usize {
        debug_assert!(self.items > 0, "free on a slab without live items");
        self.items -= 1;
        self.used -= self.item_size + RED_ZONE_SIZE;
        self.items
    }

    /// Re-verify every redzone written so far in this slab.
    ///
    /// # Safety
    /// The slab must be live and formatted at least once.
    pub unsafe fn check_red_zones<I: Instrument>(&self, instrument: &I, report: &mut ValidationReport) {
        report.slabs_checked += 1;
        if RED_ZONE_SIZE == 0 {
            return;
        }

        let base = self.base();
        Self::check_one(base.add(LEADING_RED_ZONE_OFFSET), instrument, report);

        let stride = item_stride(self.item_size);
        let mut item = base.add(FIRST_ITEM_OFFSET);
        while item < self.brk {
            Self::check_one(item.add(self.item_size), instrument, report);
            item = item.add(stride);
        }
    }

    unsafe fn check_one<I: Instrument>(zone: *mut u8, instrument: &I, report: &mut ValidationReport) {
        instrument.mark_accessible(zone, RED_ZONE_SIZE);
        if !redzone::check_red_zone(zone) {
            report.record_corruption(zone as usize);
        }
        instrument.mark_inaccessible(zone, RED_ZONE_SIZE, INACCESSIBLE_MAGIC);
        report.redzones_checked += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardening::NoInstrument;
    use crate::platform;

    struct Mapped(NonNull<Slab>);

    impl Mapped {
        fn new(item_size: usize) -> Self {
            unsafe {
                let base = platform::map_aligned(SLAB_SIZE, SLAB_SIZE);
                assert!(!base.is_null());
                let slab = Slab::init(base, ArenaKind::Grow);
                Slab::format(slab, ClassId::Custom(0), item_size, &NoInstrument);
                Mapped(slab)
            }
        }

        fn slab(&self) -> &mut Slab {
            unsafe { &mut *self.0.as_ptr() }
        }
    }

    impl Drop for Mapped {
        fn drop(&mut self) {
            unsafe { platform::unmap(self.0.as_ptr() as *mut u8, SLAB_SIZE) };
        }
    }

    #[test]
    fn header_fits_before_first_item() {
        assert!(FIRST_ITEM_OFFSET >= HEADER_SIZE + RED_ZONE_SIZE);
        assert_eq!(FIRST_ITEM_OFFSET % PTR_SIZE, 0);
        assert_eq!(LEADING_RED_ZONE_OFFSET % CACHE_ALIGN, 0);
    }

    #[test]
    fn capacity_respects_bound() {
        for item_size in [8, 16, 64, 1000, 4096, SLAB_SIZE / 4 - RED_ZONE_SIZE] {
            let bound = (SLAB_SIZE - HEADER_SIZE) / (item_size + RED_ZONE_SIZE);
            assert!(capacity(item_size) <= bound);
            assert!(capacity(item_size) >= 3);
        }
    }

    #[test]
    fn carve_until_full_matches_capacity() {
        let m = Mapped::new(1 << 16);
        let slab = m.slab();
        let mut carved = 0;
        while slab.can_carve() {
            unsafe { slab.carve(&NoInstrument) };
            slab.note_allocated();
            carved += 1;
        }
        assert_eq!(carved, capacity(1 << 16));
        assert!(slab.is_fully_populated());
        assert!(slab.cursor() as usize <= slab.end());
    }

    #[test]
    fn free_list_is_lifo() {
        let m = Mapped::new(64);
        let slab = m.slab();
        let a = unsafe { slab.carve(&NoInstrument) };
        slab.note_allocated();
        let b = unsafe { slab.carve(&NoInstrument) };
        slab.note_allocated();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, item_stride(64));

        unsafe {
            slab.push_free(a);
            slab.note_freed();
            slab.push_free(b);
            slab.note_freed();
        }
        assert_eq!(slab.items(), 0);
        assert_eq!(unsafe { slab.pop_free(&NoInstrument) }, Some(b));
        assert_eq!(unsafe { slab.pop_free(&NoInstrument) }, Some(a));
        assert_eq!(unsafe { slab.pop_free(&NoInstrument) }, None);
    }

    #[test]
    fn masking_recovers_header() {
        let m = Mapped::new(128);
        let slab = m.slab();
        let item = unsafe { slab.carve(&NoInstrument) };
        let inner = unsafe { item.as_ptr().add(100) };
        let found = unsafe { Slab::of_ptr(inner) };
        assert_eq!(found, m.0);
        assert_eq!(unsafe { found.as_ref() }.item_size(), 128);
    }

    #[test]
    fn red_zones_survive_clean_use() {
        let m = Mapped::new(32);
        let slab = m.slab();
        for _ in 0..10 {
            let p = unsafe { slab.carve(&NoInstrument) };
            unsafe { core::ptr::write_bytes(p.as_ptr(), 0x11, 32) };
        }
        let mut report = ValidationReport::default();
        unsafe { slab.check_red_zones(&NoInstrument, &mut report) };
        assert!(report.is_ok());
        assert_eq!(report.slabs_checked, 1);
        if RED_ZONE_SIZE > 0 {
            assert_eq!(report.redzones_checked, 11);
        }
    }

    #[test]
    fn overrun_is_reported() {
        if RED_ZONE_SIZE == 0 {
            return;
        }
        let m = Mapped::new(32);
        let slab = m.slab();
        let p = unsafe { slab.carve(&NoInstrument) };
        unsafe { p.as_ptr().add(32).write(0) };
        let mut report = ValidationReport::default();
        unsafe { slab.check_red_zones(&NoInstrument, &mut report) };
        assert_eq!(report.corrupted, 1);
        assert_eq!(report.first_corruption, Some(p.as_ptr() as usize + 32));
    }

    #[test]
    fn reset_rewinds_cursor() {
        let m = Mapped::new(256);
        let slab = m.slab();
        let p = unsafe { slab.carve(&NoInstrument) };
        slab.note_allocated();
        unsafe { slab.push_free(p) };
        slab.note_freed();
        slab.reset();
        assert!(!slab.has_free_items());
        assert_eq!(slab.cursor(), p.as_ptr());
        assert_eq!(slab.owner(), None);
    }

    #[test]
    fn release_flag_is_taken_once() {
        let m = Mapped::new(64);
        let slab = m.slab();
        assert!(!slab.needs_release());
        slab.mark_needs_release();
        assert!(slab.take_need_release());
        assert!(!slab.take_need_release());
    }
}
