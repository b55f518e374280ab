//! Accessibility notifications for an attached memory checker.
//!
//! The allocator reports four transitions, always in the same order relative
//! to its own bookkeeping, so a checker can mirror which bytes a client may
//! touch. Every method defaults to a no-op.

/// Strategy receiving accessibility transitions.
pub trait Instrument {
    /// Region becomes accessible and defined (guard setup, free-list reads).
    #[inline(always)]
    fn mark_accessible(&self, _addr: *const u8, _len: usize) {}

    /// Region becomes inaccessible (format-time blanking, guards).
    #[inline(always)]
    fn mark_inaccessible(&self, _addr: *const u8, _len: usize, _magic: u8) {}

    /// Region becomes a live allocation with undefined content.
    #[inline(always)]
    fn mark_allocated(&self, _addr: *const u8, _len: usize) {}

    /// Region stops being a live allocation.
    #[inline(always)]
    fn mark_freed(&self, _addr: *const u8, _len: usize, _magic: u8) {}
}

/// Production strategy: reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInstrument;

impl Instrument for NoInstrument {}

#[cfg(feature = "asan")]
mod asan {
    use super::Instrument;
    use core::ffi::c_void;

    extern "C" {
        fn __asan_poison_memory_region(addr: *const c_void, size: usize);
        fn __asan_unpoison_memory_region(addr: *const c_void, size: usize);
    }

    /// Forwards transitions to AddressSanitizer's manual poisoning interface.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct AsanInstrument;

    impl Instrument for AsanInstrument {
        #[inline]
        fn mark_accessible(&self, addr: *const u8, len: usize) {
            unsafe { __asan_unpoison_memory_region(addr as *const c_void, len) }
        }

        #[inline]
        fn mark_inaccessible(&self, addr: *const u8, len: usize, _magic: u8) {
            unsafe { __asan_poison_memory_region(addr as *const c_void, len) }
        }

        #[inline]
        fn mark_allocated(&self, addr: *const u8, len: usize) {
            unsafe { __asan_unpoison_memory_region(addr as *const c_void, len) }
        }

        #[inline]
        fn mark_freed(&self, addr: *const u8, len: usize, _magic: u8) {
            unsafe { __asan_poison_memory_region(addr as *const c_void, len) }
        }
    }
}

#[cfg(feature = "asan")]
pub use asan::AsanInstrument;

/// Strategy used by the thread-local context.
#[cfg(feature = "asan")]
pub type ActiveInstrument = AsanInstrument;
#[cfg(not(feature = "asan"))]
pub type ActiveInstrument = NoInstrument;

#[cfg(test)]
pub mod recording {
    use super::Instrument;
    use std::cell::RefCell;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Event {
        Accessible(usize, usize),
        Inaccessible(usize, usize, u8),
        Allocated(usize, usize),
        Freed(usize, usize, u8),
    }

    /// Test strategy that keeps every transition it sees.
    #[derive(Debug, Default)]
    pub struct Recorder {
        pub events: RefCell<Vec<Event>>,
    }

    impl Recorder {
        pub fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.borrow_mut())
        }
    }

    impl Instrument for Recorder {
        fn mark_accessible(&self, addr: *const u8, len: usize) {
            self.events
                .borrow_mut()
                .push(Event::Accessible(addr as usize, len));
        }

        fn mark_inaccessible(&self, addr: *const u8, len: usize, magic: u8) {
            self.events
                .borrow_mut()
                .push(Event::Inaccessible(addr as usize, len, magic));
        }

        fn mark_allocated(&self, addr: *const u8, len: usize) {
            self.events
                .borrow_mut()
                .push(Event::Allocated(addr as usize, len));
        }

        fn mark_freed(&self, addr: *const u8, len: usize, magic: u8) {
            self.events
                .borrow_mut()
                .push(Event::Freed(addr as usize, len, magic));
        }
    }
}
