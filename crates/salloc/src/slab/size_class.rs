use crate::hardening::RED_ZONE_SIZE;
use crate::slab::arena::ArenaKind;
use crate::slab::cache::{ClassHooks, ClassId, SlabCache};
use crate::util::{align_down, MAX_SIZE_CLASSES, MAX_SLAB_ITEM, PTR_SIZE};

/// Largest item served by the automatic table. An item plus its trailing
/// redzone always fits in a quarter slab.
pub const MAX_ITEM_SIZE: usize = MAX_SLAB_ITEM - RED_ZONE_SIZE;

/// Item sizes of a geometric series of classes.
///
/// Starts at `minimum` (at least one word), multiplies by `factor` with a
/// step of at least one word, stops before reaching `maximum`, and always
/// ends with one class of exactly `maximum`. Every size but the last is a
/// multiple of the word size. At most `MAX_SIZE_CLASSES` entries.
pub fn class_sizes(minimum: usize, factor: f64, maximum: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut size = align_down(minimum.max(PTR_SIZE), PTR_SIZE);

    while size < maximum && sizes.len() < MAX_SIZE_CLASSES - 1 {
        sizes.push(size);
        let scaled = align_down((size as f64 * factor) as usize, PTR_SIZE);
        size = scaled.max(align_down(size + PTR_SIZE, PTR_SIZE));
    }
    sizes.push(maximum);
    sizes
}

/// The automatic size classes of a context, smallest first.
pub struct SizeClassTable {
    caches: Vec<SlabCache>,
}

impl SizeClassTable {
    pub fn build(minimum: usize, factor: f64, arena: ArenaKind) -> Self {
        let caches = class_sizes(minimum, factor, MAX_ITEM_SIZE)
            .into_iter()
            .enumerate()
            .map(|(i, size)| {
                SlabCache::new(ClassId::Table(i), size, arena, ClassHooks::default(), None)
            })
            .collect();
        SizeClassTable { caches }
    }

    /// Index of the smallest class whose items hold `size` bytes.
    #[inline]
    pub fn lookup(&self, size: usize) -> Option<usize> {
        // Binary search for the smallest class >= size
        let mut lo = 0usize;
        let mut hi = self.caches.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.caches[mid].item_size() < size {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        if lo < self.caches.len() {
            Some(lo)
        } else {
            None
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&SlabCache> {
        self.caches.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut SlabCache> {
        self.caches.get_mut(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn max_item_size(&self) -> usize {
        self.caches.last().map_or(0, SlabCache::item_size)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, SlabCache> {
        self.caches.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, SlabCache> {
        self.caches.iter_mut()
    }
}
