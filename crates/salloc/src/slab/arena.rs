use crate::allocator::stats::ArenaStats;
use crate::config::ReleasePolicy;
use crate::hardening::abort_with_message;
use crate::platform;
use crate::slab::header::Slab;
use crate::slab::list::{self, ArenaFreeSlabs, ArenaSlabs, SlabList};
use crate::util::{align_down, page_size, SLAB_SIZE};
use core::ptr::{self, NonNull};
use log::{debug, trace};

/// Which of the two arenas of a context a slab or cache belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArenaKind {
    /// Reserved once at initialization, never grows.
    Fixed,
    /// Starts empty and maps one slab at a time on demand.
    Grow,
}

impl ArenaKind {
    pub fn name(self) -> &'static str {
        match self {
            ArenaKind::Fixed => "fixed",
            ArenaKind::Grow => "grow",
        }
    }
}

/// A slab-aligned range of address space handed out one slab at a time.
///
/// The fixed arena is a single mapping. The grow arena is a chain of
/// `SLAB_SIZE` mappings; `brk..end` is the unused tail of the newest one.
pub struct Arena {
    kind: ArenaKind,
    /// Start of the fixed mapping. Null for the grow arena.
    base: *mut u8,
    brk: *mut u8,
    end: *mut u8,
    size: usize,
    used: usize,
    slabs: SlabList<ArenaSlabs>,
    free_slabs: SlabList<ArenaFreeSlabs>,
}

impl Arena {
    /// Reserve a fixed arena of at least two slabs. Aborts if the mapping fails.
    pub fn fixed(capacity: usize) -> Self {
        let size = align_down(capacity, SLAB_SIZE).max(2 * SLAB_SIZE);
        let base = unsafe { platform::map_aligned(size, SLAB_SIZE) };
        if base.is_null() {
            abort_with_message("salloc: cannot reserve the fixed arena\n");
        }
        debug!("reserved fixed arena at {:p}, {} bytes", base, size);

        Arena {
            kind: ArenaKind::Fixed,
            base,
            brk: base,
            end: unsafe { base.add(size) },
            size,
            used: 0,
            slabs: SlabList::new(),
            free_slabs: SlabList::new(),
        }
    }

    /// An empty grow arena. Nothing is mapped until the first slab is carved.
    pub const fn grow() -> Self {
        Arena {
            kind: ArenaKind::Grow,
            base: ptr::null_mut(),
            brk: ptr::null_mut(),
            end: ptr::null_mut(),
            size: 0,
            used: 0,
            slabs: SlabList::new(),
            free_slabs: SlabList::new(),
        }
    }

    #[inline]
    pub fn kind(&self) -> ArenaKind {
        self.kind
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    #[inline]
    pub fn free_slab_count(&self) -> usize {
        self.free_slabs.len()
    }

    fn remaining(&self) -> usize {
        self.end as usize - self.brk as usize
    }

    /// Map one more slab for the grow arena. Aborts if the kernel refuses.
    fn extend(&mut self) {
        debug_assert_eq!(self.kind, ArenaKind::Grow);
        let slab = unsafe { platform::map_aligned(SLAB_SIZE, SLAB_SIZE) };
        if slab.is_null() {
            abort_with_message("salloc: cannot enlarge the grow arena\n");
        }
        self.brk = slab;
        self.end = unsafe { slab.add(SLAB_SIZE) };
        self.size += SLAB_SIZE;
        debug!(
            "grow arena extended to {} bytes, new slab at {:p}",
            self.size, slab
        );
    }

    /// Bump-allocate a fresh slab and register it with the arena.
    /// `None` means the fixed arena is exhausted; the grow arena never fails.
    pub fn carve_slab(&mut self) -> Option<NonNull<Slab>> {
        if self.remaining() < SLAB_SIZE {
            match self.kind {
                ArenaKind::Fixed => return None,
                ArenaKind::Grow => self.extend(),
            }
        }

        let base = self.brk;
        unsafe {
            self.brk = base.add(SLAB_SIZE);
            self.used += SLAB_SIZE;
            let slab = Slab::init(base, self.kind);
            self.slabs.push_front(slab);
            Some(slab)
        }
    }

    /// Take an emptied slab back out of the pool.
    pub fn recycle_slab(&mut self) -> Option<NonNull<Slab>> {
        let slab = unsafe { self.free_slabs.pop_front()? };
        trace!("{} arena: recycled slab {:p}", self.kind.name(), slab);
        Some(slab)
    }

    /// Put an emptied slab into the pool.
    ///
    /// # Safety
    /// `slab` must belong to this arena and be detached from every cache.
    pub unsafe fn release_slab(&mut self, slab: NonNull<Slab>) {
        debug_assert!(!self.free_slabs.contains(slab));
        self.free_slabs.push_front(slab);
    }

    /// Drop a slab from the all-slabs list. The caller unmaps it.
    ///
    /// # Safety
    /// `slab` must be registered with this arena.
    pub unsafe fn forget_slab(&mut self, slab: NonNull<Slab>) {
        self.slabs.remove(slab);
    }

    /// Dispose of a slab whose last item was just freed.
    ///
    /// Only a slab that filled up since its last release goes through
    /// `policy`; any other slab is pooled as is, still owned by its class.
    ///
    /// # Safety
    /// `slab` must belong to this arena, hold no live items and be detached
    /// from every cache list. Under `Unmap` a grow-arena slab may be gone on
    /// return.
    pub unsafe fn retire_slab(&mut self, slab: NonNull<Slab>, policy: ReleasePolicy) {
        let s = &mut *slab.as_ptr();
        if !s.take_need_release() {
            self.release_slab(slab);
            return;
        }

        match (policy, self.kind) {
            (ReleasePolicy::Unmap, ArenaKind::Grow) => {
                self.forget_slab(slab);
                platform::unmap(slab.as_ptr() as *mut u8, SLAB_SIZE);
                trace!("grow arena: unmapped slab {:p}", slab);
            }
            (ReleasePolicy::Advise, _) => {
                s.reset();
                let page = page_size();
                platform::advise_free((slab.as_ptr() as *mut u8).add(page), SLAB_SIZE - page);
                trace!("{} arena: released pages of slab {:p}", self.kind.name(), slab);
                self.release_slab(slab);
            }
            _ => self.release_slab(slab),
        }
    }

    /// Iterate every slab this arena still maps.
    ///
    /// # Safety
    /// No slab may be unmapped while the iterator is alive.
    pub unsafe fn slabs(&self) -> list::Iter<'_, ArenaSlabs> {
        self.slabs.iter()
    }

    pub fn stats(&self) -> ArenaStats {
        let used_fraction = if self.size == 0 {
            0.0
        } else {
            self.used as f64 / self.size as f64
        };
        ArenaStats {
            kind: self.kind,
            used_fraction,
            total_size: self.size,
            used: self.used,
            slab_count: self.slabs.len(),
            free_slab_count: self.free_slabs.len(),
        }
    }

    /// Unmap everything. Safe to call more than once.
    pub fn teardown(&mut self) {
        match self.kind {
            ArenaKind::Fixed => {
                if !self.base.is_null() {
                    unsafe { platform::unmap(self.base, self.size) };
                }
            }
            ArenaKind::Grow => unsafe {
                while let Some(slab) = self.slabs.pop_front() {
                    platform::unmap(slab.as_ptr() as *mut u8, SLAB_SIZE);
                }
            },
        }

        self.slabs.clear();
        self.free_slabs.clear();
        self.base = ptr::null_mut();
        self.brk = ptr::null_mut();
        self.end = ptr::null_mut();
        self.size = 0;
        self.used = 0;
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::is_aligned;

    #[test]
    fn fixed_arena_rounds_capacity() {
        let arena = Arena::fixed(1);
        assert_eq!(arena.size(), 2 * SLAB_SIZE);

        let arena = Arena::fixed(3 * SLAB_SIZE + 17);
        assert_eq!(arena.size(), 3 * SLAB_SIZE);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn fixed_arena_exhausts() {
        let mut arena = Arena::fixed(2 * SLAB_SIZE);
        let a = arena.carve_slab().unwrap();
        let b = arena.carve_slab().unwrap();
        assert!(arena.carve_slab().is_none());
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, SLAB_SIZE);
        assert_eq!(arena.used(), arena.size());
        assert_eq!(arena.stats().used_fraction, 1.0);
    }

    #[test]
    fn grow_arena_extends_one_slab_at_a_time() {
        let mut arena = Arena::grow();
        assert_eq!(arena.size(), 0);
        for n in 1..=3 {
            let slab = arena.carve_slab().unwrap();
            assert!(is_aligned(slab.as_ptr() as usize, SLAB_SIZE));
            assert_eq!(arena.size(), n * SLAB_SIZE);
            assert_eq!(arena.used(), n * SLAB_SIZE);
            assert_eq!(unsafe { slab.as_ref() }.arena(), ArenaKind::Grow);
        }
        assert_eq!(arena.slab_count(), 3);
    }

    #[test]
    fn pool_is_lifo() {
        let mut arena = Arena::grow();
        let a = arena.carve_slab().unwrap();
        let b = arena.carve_slab().unwrap();
        unsafe {
            arena.retire_slab(a, ReleasePolicy::Retain);
            arena.retire_slab(b, ReleasePolicy::Retain);
        }
        assert_eq!(arena.free_slab_count(), 2);
        assert_eq!(arena.recycle_slab(), Some(b));
        assert_eq!(arena.recycle_slab(), Some(a));
        assert_eq!(arena.recycle_slab(), None);
    }

    fn filled(slab: NonNull<Slab>) -> NonNull<Slab> {
        unsafe { (*slab.as_ptr()).mark_needs_release() };
        slab
    }

    #[test]
    fn unmap_policy_forgets_grow_slab() {
        let mut arena = Arena::grow();
        let a = filled(arena.carve_slab().unwrap());
        let _b = arena.carve_slab().unwrap();
        unsafe { arena.retire_slab(a, ReleasePolicy::Unmap) };
        assert_eq!(arena.slab_count(), 1);
        assert_eq!(arena.free_slab_count(), 0);
        assert_eq!(arena.size(), 2 * SLAB_SIZE);
    }

    #[test]
    fn unmap_policy_pools_fixed_slab() {
        let mut arena = Arena::fixed(2 * SLAB_SIZE);
        let a = filled(arena.carve_slab().unwrap());
        unsafe { arena.retire_slab(a, ReleasePolicy::Unmap) };
        assert_eq!(arena.slab_count(), 1);
        assert_eq!(arena.recycle_slab(), Some(a));
        assert!(!unsafe { a.as_ref() }.needs_release());
    }

    #[test]
    fn advised_slab_keeps_header() {
        let mut arena = Arena::grow();
        let a = filled(arena.carve_slab().unwrap());
        unsafe { arena.retire_slab(a, ReleasePolicy::Advise) };
        let slab = arena.recycle_slab().unwrap();
        assert_eq!(unsafe { slab.as_ref() }.magic(), crate::util::SLAB_MAGIC);
        assert_eq!(unsafe { slab.as_ref() }.owner(), None);
    }

    #[test]
    fn slab_that_never_filled_is_pooled_untouched() {
        let mut arena = Arena::grow();
        let a = arena.carve_slab().unwrap();
        let b = arena.carve_slab().unwrap();
        let far = 2 * page_size();
        unsafe {
            (a.as_ptr() as *mut u8).add(far).write(0xAB);
            arena.retire_slab(a, ReleasePolicy::Advise);
            arena.retire_slab(b, ReleasePolicy::Unmap);
        }
        assert_eq!(arena.slab_count(), 2);
        assert_eq!(arena.free_slab_count(), 2);
        assert_eq!(unsafe { (a.as_ptr() as *const u8).add(far).read() }, 0xAB);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn filled_slab_is_advised() {
        let mut arena = Arena::grow();
        let a = filled(arena.carve_slab().unwrap());
        let far = 2 * page_size();
        unsafe {
            (a.as_ptr() as *mut u8).add(far).write(0xAB);
            arena.retire_slab(a, ReleasePolicy::Advise);
            assert_eq!((a.as_ptr() as *const u8).add(far).read(), 0);
        }
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut arena = Arena::grow();
        arena.carve_slab().unwrap();
        arena.carve_slab().unwrap();
        arena.teardown();
        assert_eq!(arena.size(), 0);
        assert_eq!(arena.slab_count(), 0);
        arena.teardown();

        let mut fixed = Arena::fixed(0);
        fixed.teardown();
        fixed.teardown();
        assert_eq!(fixed.stats().used_fraction, 0.0);
    }
}
