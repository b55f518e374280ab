use crate::allocator::stats::{ClassStats, Stats};
use crate::config::{Config, ReleasePolicy};
use crate::error::SallocError;
use crate::hardening::{abort_with_message, Instrument, NoInstrument, ValidationReport};
use crate::slab::arena::{Arena, ArenaKind};
use crate::slab::cache::{ClassHooks, ClassId, SlabCache};
use crate::slab::header::Slab;
use crate::slab::size_class::{SizeClassTable, MAX_ITEM_SIZE};
use crate::util::{align_up, init_page_size, PTR_SIZE, SLAB_SIZE};
use core::ptr::NonNull;
use log::info;

/// One slab allocator instance: two arenas, the automatic size classes and
/// any custom classes. Owned by a single thread; it is neither `Send` nor
/// `Sync`.
///
/// Dropping the allocator unmaps every slab, invalidating all pointers it
/// handed out.
pub struct SlabAllocator<I: Instrument = NoInstrument> {
    fixed: Option<Arena>,
    grow: Arena,
    table: SizeClassTable,
    custom: Vec<SlabCache>,
    policy: ReleasePolicy,
    instrument: I,
    last_error: Option<SallocError>,
}

impl SlabAllocator<NoInstrument> {
    pub fn new(config: Config) -> Self {
        Self::with_instrument(config, NoInstrument)
    }
}

impl<I: Instrument> SlabAllocator<I> {
    /// Reserve the fixed arena (when `config.fixed_arena_size > 0`) and build
    /// the size-class table on top of it, or on the grow arena otherwise.
    pub fn with_instrument(config: Config, instrument: I) -> Self {
        init_page_size();

        let fixed = match config.fixed_arena_size {
            0 => None,
            size => Some(Arena::fixed(size)),
        };
        let table_arena = if fixed.is_some() {
            ArenaKind::Fixed
        } else {
            ArenaKind::Grow
        };
        let table = SizeClassTable::build(
            config.minimum_item_size,
            config.growth_factor,
            table_arena,
        );

        info!(
            "slab allocator configured: fixed arena {} bytes, {} size classes up to {} bytes, release policy {:?}",
            fixed.as_ref().map_or(0, Arena::size),
            table.len(),
            table.max_item_size(),
            config.release_policy
        );

        SlabAllocator {
            fixed,
            grow: Arena::grow(),
            table,
            custom: Vec::new(),
            policy: config.release_policy,
            instrument,
            last_error: None,
        }
    }

    /// Allocate `size` bytes from the smallest class that fits.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, SallocError> {
        let result = match self.table.lookup(size) {
            Some(index) => self.alloc_from(ClassId::Table(index)),
            None => Err(SallocError::NoMatchingClass),
        };
        self.record(result)
    }

    /// Return an item to its class.
    ///
    /// # Safety
    /// `ptr` must have been returned by `allocate` or `class_allocate` of this
    /// allocator and not freed since.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let class = match Slab::of_ptr(ptr.as_ptr()).as_ref().owner() {
            Some(class) => class,
            None => abort_with_message("salloc: pointer into a slab no class owns\n"),
        };
        self.free_to(class, ptr);
    }

    /// Bytes the caller may use at `ptr`: the item size of its class.
    ///
    /// # Safety
    /// `ptr` must point into a live item of this allocator.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        Slab::of_ptr(ptr.as_ptr()).as_ref().item_size()
    }

    /// Register a class of `item_size` objects, rounded up to a word.
    pub fn create_class(
        &mut self,
        item_size: usize,
        arena: ArenaKind,
        hooks: ClassHooks,
        name: Option<&'static str>,
    ) -> Result<ClassId, SallocError> {
        if item_size > MAX_ITEM_SIZE {
            return Err(SallocError::InvalidItemSize(item_size));
        }
        if arena == ArenaKind::Fixed && self.fixed.is_none() {
            return Err(SallocError::ArenaUnavailable);
        }

        let id = ClassId::Custom(self.custom.len());
        let item_size = align_up(item_size.max(PTR_SIZE), PTR_SIZE);
        self.custom
            .push(SlabCache::new(id, item_size, arena, hooks, name));
        Ok(id)
    }

    /// Allocate one item of a class. The construct hook runs before return.
    pub fn class_allocate(&mut self, class: ClassId) -> Result<NonNull<u8>, SallocError> {
        let result = self.alloc_from(class);
        self.record(result)
    }

    /// Run the destruct hook on `ptr`, then return it to `class`.
    ///
    /// # Safety
    /// `ptr` must have come from `class_allocate(class)` of this allocator and
    /// not been freed since.
    pub unsafe fn class_free(&mut self, class: ClassId, ptr: NonNull<u8>) {
        if let Some(destruct) = self.cache(class).hooks().destruct {
            destruct(ptr);
        }
        self.free_to(class, ptr);
    }

    pub fn stats(&self) -> Stats {
        let arenas: Vec<_> = self
            .fixed
            .iter()
            .chain(core::iter::once(&self.grow))
            .map(Arena::stats)
            .collect();

        let mut classes = Vec::new();
        let mut fixed_bytes = 0;
        for cache in self.table.iter().chain(self.custom.iter()) {
            // SAFETY: cache lists only hold slabs of our live arenas.
            let stats: ClassStats = unsafe { cache.stats() };
            if cache.arena() == ArenaKind::Fixed {
                fixed_bytes += stats.bytes_used;
            }
            if stats.slab_count > 0 || stats.name.is_some() {
                classes.push(stats);
            }
        }

        let (items_used_percent, arena_used_percent) = match &self.fixed {
            Some(fixed) if fixed.size() > 0 => {
                let pooled = fixed.free_slab_count() * SLAB_SIZE;
                let size = fixed.size() as f64;
                (
                    fixed_bytes as f64 / size * 100.0,
                    (fixed.used() - pooled) as f64 / size * 100.0,
                )
            }
            _ => (0.0, 0.0),
        };

        Stats {
            bytes_used: classes.iter().map(|c| c.bytes_used).sum(),
            items: classes.iter().map(|c| c.item_count).sum(),
            arenas,
            classes,
            items_used_percent,
            arena_used_percent,
        }
    }

    /// Walk every slab of both arenas and re-check its redzones.
    pub fn check_redzones(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for arena in self.fixed.iter().chain(core::iter::once(&self.grow)) {
            // SAFETY: nothing is unmapped while we hold `&self`.
            unsafe {
                for slab in arena.slabs() {
                    slab.as_ref().check_red_zones(&self.instrument, &mut report);
                }
            }
        }
        report
    }

    /// Abort if any redzone has been overwritten.
    pub fn validate(&self) {
        let report = self.check_redzones();
        if !report.is_ok() {
            abort_with_message("salloc: redzone corrupted, heap overflow detected\n");
        }
    }

    /// The most recent allocation failure, if any. Success does not clear it.
    #[inline]
    pub fn last_error(&self) -> Option<SallocError> {
        self.last_error
    }

    /// Unmap everything. Every pointer this allocator returned dangles after.
    pub fn teardown(self) {
        drop(self);
    }

    #[inline]
    pub fn release_policy(&self) -> ReleasePolicy {
        self.policy
    }

    #[inline]
    pub fn size_classes(&self) -> &SizeClassTable {
        &self.table
    }

    #[inline]
    pub fn fixed_arena(&self) -> Option<&Arena> {
        self.fixed.as_ref()
    }

    #[inline]
    pub fn grow_arena(&self) -> &Arena {
        &self.grow
    }

    #[inline]
    pub fn instrument(&self) -> &I {
        &self.instrument
    }

    /// Class descriptor of `class`. Aborts on a handle this allocator never issued.
    pub fn cache(&self, class: ClassId) -> &SlabCache {
        let cache = match class {
            ClassId::Table(i) => self.table.get(i),
            ClassId::Custom(i) => self.custom.get(i),
        };
        match cache {
            Some(cache) => cache,
            None => abort_with_message("salloc: unknown slab class\n"),
        }
    }

    fn record(
        &mut self,
        result: Result<NonNull<u8>, SallocError>,
    ) -> Result<NonNull<u8>, SallocError> {
        match result {
            Err(err) if err.is_allocation_failure() => self.last_error = Some(err),
            _ => {}
        }
        result
    }

    fn alloc_from(&mut self, class: ClassId) -> Result<NonNull<u8>, SallocError> {
        let (cache, arena) = parts(
            &mut self.table,
            &mut self.custom,
            &mut self.fixed,
            &mut self.grow,
            class,
        );
        // SAFETY: `parts` pairs the cache with the arena it was created for.
        unsafe { cache.alloc(arena, &self.instrument) }
    }

    unsafe fn free_to(&mut self, class: ClassId, ptr: NonNull<u8>) {
        let (cache, arena) = parts(
            &mut self.table,
            &mut self.custom,
            &mut self.fixed,
            &mut self.grow,
            class,
        );
        cache.free(arena, self.policy, &self.instrument, ptr);
    }
}

/// The cache for `class` and the arena backing it.
fn parts<'a>(
    table: &'a mut SizeClassTable,
    custom: &'a mut [SlabCache],
    fixed: &'a mut Option<Arena>,
    grow: &'a mut Arena,
    class: ClassId,
) -> (&'a mut SlabCache, &'a mut Arena) {
    let cache = match class {
        ClassId::Table(i) => table.get_mut(i),
        ClassId::Custom(i) => custom.get_mut(i),
    };
    let cache = match cache {
        Some(cache) => cache,
        None => abort_with_message("salloc: unknown slab class\n"),
    };
    let arena = match (cache.arena(), fixed.as_mut()) {
        (ArenaKind::Fixed, Some(fixed)) => fixed,
        (ArenaKind::Fixed, None) => abort_with_message("salloc: fixed arena is not configured\n"),
        (ArenaKind::Grow, _) => grow,
    };
    (cache, arena)
}

impl<I: Instrument> Drop for SlabAllocator<I> {
    fn drop(&mut self) {
        for cache in self.table.iter_mut().chain(self.custom.iter_mut()) {
            cache.reset();
        }
        if let Some(fixed) = self.fixed.as_mut() {
            fixed.teardown();
        }
        self.grow.teardown();
        info!("slab allocator torn down");
    }
}
