//! Intrusive doubly linked lists of slabs.
//!
//! A slab sits on up to four lists at once (arena all-slabs, arena free pool,
//! cache all-slabs, cache partial). Each list owns one `Links` pair inside
//! the slab header, picked by a `Membership` marker type, so insertion and
//! removal never allocate and removal is O(1).

use super::header::Slab;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};

pub(crate) type Pointer<T> = Option<NonNull<T>>;

/// Neighbour pointers for one list a slab can belong to.
#[derive(Debug, Clone, Copy)]
pub struct Links {
    pub prev: Pointer<Slab>,
    pub next: Pointer<Slab>,
}

impl Links {
    pub const fn new() -> Self {
        Links {
            prev: None,
            next: None,
        }
    }
}

/// Selects which `Links` of a slab header a list threads through.
pub trait Membership {
    /// # Safety
    /// `slab` must point to a live slab header.
    unsafe fn links(slab: NonNull<Slab>) -> *mut Links;
}

macro_rules! membership {
    ($(#[$doc:meta])* $name:ident => $field:ident) => {
        $(#[$doc])*
        pub enum $name {}

        impl Membership for $name {
            #[inline(always)]
            unsafe fn links(slab: NonNull<Slab>) -> *mut Links {
                ptr::addr_of_mut!((*slab.as_ptr()).$field)
            }
        }
    };
}

membership!(
    /// Every slab an arena has carved and still maps.
    ArenaSlabs => arena_link
);
membership!(
    /// Empty slabs waiting in an arena for reuse by any cache.
    ArenaFreeSlabs => free_link
);
membership!(
    /// Every slab currently assigned to a cache.
    CacheSlabs => cache_link
);
membership!(
    /// Cache slabs that still have a free or uncarved slot.
    CachePartialSlabs => partial_link
);

pub struct SlabList<M> {
    head: Pointer<Slab>,
    tail: Pointer<Slab>,
    len: usize,
    marker: PhantomData<M>,
}

impl<M: Membership> SlabList<M> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn first(&self) -> Pointer<Slab> {
        self.head
    }

    #[inline]
    pub fn last(&self) -> Pointer<Slab> {
        self.tail
    }

    /// # Safety
    /// `slab` must be a live slab header that is not on this list.
    pub unsafe fn push_front(&mut self, slab: NonNull<Slab>) {
        let links = M::links(slab);
        (*links).prev = None;
        (*links).next = self.head;

        match self.head {
            Some(head) => (*M::links(head)).prev = Some(slab),
            None => self.tail = Some(slab),
        }

        self.head = Some(slab);
        self.len += 1;
    }

    /// # Safety
    /// `slab` must be a live slab header that is not on this list.
    pub unsafe fn push_back(&mut self, slab: NonNull<Slab>) {
        let links = M::links(slab);
        (*links).prev = self.tail;
        (*links).next = None;

        match self.tail {
            Some(tail) => (*M::links(tail)).next = Some(slab),
            None => self.head = Some(slab),
        }

        self.tail = Some(slab);
        self.len += 1;
    }

    /// Unlink `slab`.
    ///
    /// # Safety
    /// `slab` must currently be on this list.
    pub unsafe fn remove(&mut self, slab: NonNull<Slab>) {
        debug_assert!(self.len > 0, "remove from an empty slab list");
        let links = M::links(slab);
        let Links { prev, next } = *links;

        match prev {
            Some(prev) => (*M::links(prev)).next = next,
            None => {
                debug_assert!(self.head == Some(slab), "slab is not on this list");
                self.head = next;
            }
        }
        match next {
            Some(next) => (*M::links(next)).prev = prev,
            None => self.tail = prev,
        }

        *links = Links::new();
        self.len -= 1;
    }

    /// # Safety
    /// Every slab on the list must be live.
    pub unsafe fn pop_front(&mut self) -> Pointer<Slab> {
        let head = self.head?;
        self.remove(head);
        Some(head)
    }

    /// Forget every element without touching the slabs. Used once the
    /// memory behind them has been unmapped.
    pub fn clear(&mut self) {
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Iterate from head to tail.
    ///
    /// # Safety
    /// Every slab on the list must stay live while the iterator is used.
    pub unsafe fn iter(&self) -> Iter<'_, M> {
        Iter {
            next: self.head,
            marker: PhantomData,
        }
    }

    /// Linear membership test, for assertions.
    ///
    /// # Safety
    /// Every slab on the list must be live.
    pub unsafe fn contains(&self, slab: NonNull<Slab>) -> bool {
        self.iter().any(|s| s == slab)
    }
}

impl<M: Membership> Default for SlabList<M> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, M> {
    next: Pointer<Slab>,
    marker: PhantomData<&'a SlabList<M>>,
}

impl<M: Membership> Iterator for Iter<'_, M> {
    type Item = NonNull<Slab>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        // SAFETY: guaranteed by the contract of `SlabList::iter`.
        self.next = unsafe { (*M::links(current)).next };
        Some(current)
    }
}
