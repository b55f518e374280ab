use crate::allocator::stats::ClassStats;
use crate::config::ReleasePolicy;
use crate::error::SallocError;
use crate::hardening::{abort_with_message, Instrument};
use crate::slab::arena::{Arena, ArenaKind};
use crate::slab::header::{Slab, FIRST_ITEM_OFFSET};
use crate::slab::list::{CachePartialSlabs, CacheSlabs, SlabList};
use crate::util::{FREED_MAGIC, SLAB_SIZE};
use core::ptr::NonNull;

/// Handle naming one slab cache of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassId {
    /// Index into the automatic size-class table.
    Table(usize),
    /// Index into the custom classes created with `create_class`.
    Custom(usize),
}

/// Per-item callbacks of a custom class.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassHooks {
    /// Runs on every item right before it is handed out.
    pub construct: Option<fn(NonNull<u8>)>,
    /// Runs on every item passed to `class_free`, before it is released.
    pub destruct: Option<fn(NonNull<u8>)>,
}

/// All slabs currently dedicated to one item size.
pub struct SlabCache {
    id: ClassId,
    item_size: usize,
    arena: ArenaKind,
    hooks: ClassHooks,
    name: Option<&'static str>,
    slabs: SlabList<CacheSlabs>,
    /// Slabs with a free or uncarved slot. Allocation takes the tail.
    partial: SlabList<CachePartialSlabs>,
}

impl SlabCache {
    pub fn new(
        id: ClassId,
        item_size: usize,
        arena: ArenaKind,
        hooks: ClassHooks,
        name: Option<&'static str>,
    ) -> Self {
        SlabCache {
            id,
            item_size,
            arena,
            hooks,
            name,
            slabs: SlabList::new(),
            partial: SlabList::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ClassId {
        self.id
    }

    #[inline]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    #[inline]
    pub fn arena(&self) -> ArenaKind {
        self.arena
    }

    #[inline]
    pub fn hooks(&self) -> ClassHooks {
        self.hooks
    }

    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    #[inline]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    #[inline]
    pub fn partial_count(&self) -> usize {
        self.partial.len()
    }

    /// Get a slab from the arena (pool first) and make it ours. A pooled
    /// slab we still own comes back with its items and free list as they were.
    unsafe fn add_slab<I: Instrument>(
        &mut self,
        arena: &mut Arena,
        instrument: &I,
    ) -> Result<NonNull<Slab>, SallocError> {
        debug_assert_eq!(arena.kind(), self.arena);
        let slab = match arena.recycle_slab() {
            Some(slab) => slab,
            None => arena.carve_slab().ok_or(SallocError::ArenaExhausted)?,
        };

        if slab.as_ref().owner() != Some(self.id) {
            Slab::format(slab, self.id, self.item_size, instrument);
        }
        self.slabs.push_front(slab);
        self.partial.push_front(slab);
        Ok(slab)
    }

    /// Hand out one item. Nothing changes if the arena has no slab to give.
    ///
    /// # Safety
    /// `arena` must be the arena this cache was created for, and every slab
    /// on the cache lists must be live.
    pub unsafe fn alloc<I: Instrument>(
        &mut self,
        arena: &mut Arena,
        instrument: &I,
    ) -> Result<NonNull<u8>, SallocError> {
        let slab = match self.partial.last() {
            Some(slab) => slab,
            None => self.add_slab(arena, instrument)?,
        };

        let (item, full) = {
            let s = &mut *slab.as_ptr();
            let item = match s.pop_free(instrument) {
                Some(item) => item,
                None => s.carve(instrument),
            };
            s.note_allocated();
            let full = s.is_fully_populated();
            if full {
                s.mark_needs_release();
            }
            (item, full)
        };
        if full {
            self.partial.remove(slab);
        }

        if let Some(construct) = self.hooks.construct {
            construct(item);
        }
        Ok(item)
    }

    /// Take an item back. When its slab empties, the slab leaves the cache
    /// and is retired to `arena` under `policy`.
    ///
    /// # Safety
    /// `item` must be a live item handed out by this cache, and `arena` the
    /// arena this cache was created for.
    pub unsafe fn free<I: Instrument>(
        &mut self,
        arena: &mut Arena,
        policy: ReleasePolicy,
        instrument: &I,
        item: NonNull<u8>,
    ) {
        let slab = Slab::of_ptr(item.as_ptr());
        let remaining = {
            let s = &mut *slab.as_ptr();
            if s.owner() != Some(self.id) {
                abort_with_message("salloc: pointer freed to a class that does not own it\n");
            }
            let was_full = s.is_fully_populated();
            s.push_free(item);
            let remaining = s.note_freed();
            instrument.mark_freed(item.as_ptr(), self.item_size, FREED_MAGIC);
            if was_full {
                self.partial.push_back(slab);
            }
            remaining
        };

        if remaining == 0 {
            self.partial.remove(slab);
            self.slabs.remove(slab);
            arena.retire_slab(slab, policy);
        }
    }

    /// # Safety
    /// Every slab on the cache lists must be live.
    pub unsafe fn stats(&self) -> ClassStats {
        let mut stats = ClassStats {
            name: self.name,
            item_size: self.item_size,
            slab_count: self.slabs.len(),
            ..ClassStats::default()
        };
        for slab in self.slabs.iter() {
            let s = slab.as_ref();
            stats.item_count += s.items();
            stats.bytes_used += FIRST_ITEM_OFFSET + s.used();
            stats.bytes_free += SLAB_SIZE - FIRST_ITEM_OFFSET - s.used();
        }
        stats
    }

    /// Forget every slab. Used after the arenas have been unmapped.
    pub fn reset(&mut self) {
        self.slabs.clear();
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardening::instrument::recording::{Event, Recorder};
    use crate::hardening::{NoInstrument, RED_ZONE_SIZE};
    use crate::slab::header::{capacity, LEADING_RED_ZONE_OFFSET};
    use crate::util::INACCESSIBLE_MAGIC;
    use std::cell::Cell;

    fn cache(item_size: usize) -> SlabCache {
        SlabCache::new(
            ClassId::Custom(0),
            item_size,
            ArenaKind::Grow,
            ClassHooks::default(),
            Some("test"),
        )
    }

    #[test]
    fn fills_a_slab_before_taking_another() {
        let mut arena = Arena::grow();
        let mut c = cache(1 << 18);
        let per_slab = capacity(1 << 18);
        let items: Vec<_> = (0..per_slab)
            .map(|_| unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() })
            .collect();
        assert_eq!(c.slab_count(), 1);
        assert_eq!(c.partial_count(), 0);
        assert_eq!(arena.slab_count(), 1);

        unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        assert_eq!(c.slab_count(), 2);
        assert_eq!(c.partial_count(), 1);

        unsafe { c.free(&mut arena, ReleasePolicy::Retain, &NoInstrument, items[0]) };
        assert_eq!(c.partial_count(), 2);
        let stats = unsafe { c.stats() };
        assert_eq!(stats.item_count, per_slab);
        assert_eq!(stats.name, Some("test"));
    }

    #[test]
    fn freed_item_is_reused_first() {
        let mut arena = Arena::grow();
        let mut c = cache(64);
        let a = unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        let _b = unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        unsafe { c.free(&mut arena, ReleasePolicy::Retain, &NoInstrument, a) };
        let again = unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        assert_eq!(again, a);
    }

    #[test]
    fn empty_slab_returns_to_pool() {
        let mut arena = Arena::grow();
        let mut c = cache(128);
        let a = unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        unsafe { c.free(&mut arena, ReleasePolicy::Retain, &NoInstrument, a) };
        assert_eq!(c.slab_count(), 0);
        assert_eq!(arena.free_slab_count(), 1);

        let b = unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        assert_eq!(b, a);
        assert_eq!(arena.size(), SLAB_SIZE);
        assert_eq!(arena.free_slab_count(), 0);
    }

    #[test]
    fn oscillating_class_keeps_its_slab_formatted() {
        let mut arena = Arena::grow();
        let mut c = cache(64);
        let rec = Recorder::default();
        let first = unsafe { c.alloc(&mut arena, &rec).unwrap() };
        unsafe { c.free(&mut arena, ReleasePolicy::Advise, &rec, first) };
        rec.take();

        for _ in 0..100 {
            let p = unsafe { c.alloc(&mut arena, &rec).unwrap() };
            assert_eq!(p, first);
            unsafe { c.free(&mut arena, ReleasePolicy::Advise, &rec, p) };
        }
        let formats = rec
            .take()
            .into_iter()
            .filter(|e| matches!(e, Event::Inaccessible(_, len, _) if *len == SLAB_SIZE - LEADING_RED_ZONE_OFFSET))
            .count();
        assert_eq!(formats, 0);
        assert_eq!(arena.slab_count(), 1);
        assert_eq!(arena.free_slab_count(), 1);
    }

    #[test]
    fn filled_slab_is_released_and_reformatted() {
        let mut arena = Arena::grow();
        let mut c = cache(1 << 18);
        let items: Vec<_> = (0..capacity(1 << 18))
            .map(|_| unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() })
            .collect();
        let slab = unsafe { Slab::of_ptr(items[0].as_ptr()) };
        assert!(unsafe { slab.as_ref() }.needs_release());

        for &p in &items {
            unsafe { c.free(&mut arena, ReleasePolicy::Advise, &NoInstrument, p) };
        }
        assert_eq!(unsafe { slab.as_ref() }.owner(), None);
        assert!(!unsafe { slab.as_ref() }.needs_release());

        let again = unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        assert_eq!(again, items[0]);
        assert_eq!(unsafe { slab.as_ref() }.owner(), Some(c.id()));
    }

    #[test]
    fn exhaustion_leaves_state_untouched() {
        let mut arena = Arena::fixed(2 * SLAB_SIZE);
        let mut c = SlabCache::new(
            ClassId::Table(0),
            SLAB_SIZE / 4 - RED_ZONE_SIZE,
            ArenaKind::Fixed,
            ClassHooks::default(),
            None,
        );
        let per_slab = capacity(c.item_size());
        for _ in 0..2 * per_slab {
            unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        }
        let before = unsafe { c.stats() };
        let err = unsafe { c.alloc(&mut arena, &NoInstrument) };
        assert_eq!(err, Err(SallocError::ArenaExhausted));
        assert_eq!(unsafe { c.stats() }, before);
        assert_eq!(arena.used(), arena.size());
    }

    thread_local! {
        static CONSTRUCTED: Cell<usize> = const { Cell::new(0) };
    }

    fn count_construct(_: NonNull<u8>) {
        CONSTRUCTED.with(|c| c.set(c.get() + 1));
    }

    #[test]
    fn construct_hook_runs_on_every_allocation() {
        let mut arena = Arena::grow();
        let mut c = SlabCache::new(
            ClassId::Custom(3),
            48,
            ArenaKind::Grow,
            ClassHooks {
                construct: Some(count_construct),
                destruct: None,
            },
            None,
        );
        let a = unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        unsafe { c.free(&mut arena, ReleasePolicy::Retain, &NoInstrument, a) };
        unsafe { c.alloc(&mut arena, &NoInstrument).unwrap() };
        assert_eq!(CONSTRUCTED.with(Cell::get), 2);
    }

    #[test]
    fn instrumentation_order() {
        let mut arena = Arena::grow();
        let mut c = cache(32);
        let rec = Recorder::default();

        let a = unsafe { c.alloc(&mut arena, &rec).unwrap() };
        let a_addr = a.as_ptr() as usize;
        let base = a_addr & !(SLAB_SIZE - 1);
        let leading = base + LEADING_RED_ZONE_OFFSET;
        assert_eq!(
            rec.take(),
            vec![
                Event::Accessible(leading, RED_ZONE_SIZE),
                Event::Inaccessible(leading, SLAB_SIZE - LEADING_RED_ZONE_OFFSET, INACCESSIBLE_MAGIC),
                Event::Accessible(a_addr, 32 + RED_ZONE_SIZE),
                Event::Inaccessible(a_addr + 32, RED_ZONE_SIZE, INACCESSIBLE_MAGIC),
                Event::Allocated(a_addr, 32),
            ]
        );

        let _keep = unsafe { c.alloc(&mut arena, &rec).unwrap() };
        rec.take();

        unsafe { c.free(&mut arena, ReleasePolicy::Retain, &rec, a) };
        assert_eq!(rec.take(), vec![Event::Freed(a_addr, 32, FREED_MAGIC)]);

        let again = unsafe { c.alloc(&mut arena, &rec).unwrap() };
        assert_eq!(again, a);
        assert_eq!(
            rec.take(),
            vec![
                Event::Accessible(a_addr, crate::util::PTR_SIZE),
                Event::Allocated(a_addr, 32),
            ]
        );
    }
}
