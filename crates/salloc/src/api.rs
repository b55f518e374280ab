//! Thread-local entry points. Each thread gets its own allocator, created on
//! first use from the environment or explicitly with `initialize`.

use crate::allocator::Stats;
use crate::config::Config;
use crate::error::SallocError;
use crate::hardening::ValidationReport;
use crate::init::{self, with_allocator};
use crate::slab::{ArenaKind, ClassHooks, ClassId};
use core::ptr::NonNull;

/// Configure this thread's allocator. Does nothing if it already exists.
pub fn initialize(fixed_arena_size: usize, minimum_item_size: usize, growth_factor: f64) {
    let config = Config::from_env();
    initialize_with(Config {
        fixed_arena_size,
        minimum_item_size,
        growth_factor,
        ..config
    });
}

/// Configure this thread's allocator. Returns `false` if it already existed.
pub fn initialize_with(config: Config) -> bool {
    init::initialize_with(config)
}

/// Unmap this thread's allocator. The next call starts a fresh one.
pub fn teardown() {
    init::teardown();
}

pub fn allocate(size: usize) -> Result<NonNull<u8>, SallocError> {
    with_allocator(|a| a.allocate(size))
}

/// # Safety
/// `ptr` must come from `allocate` or `class_allocate` on this thread and
/// not have been freed, nor the allocator torn down, since.
pub unsafe fn free(ptr: NonNull<u8>) {
    with_allocator(|a| a.free(ptr));
}

/// # Safety
/// `ptr` must point into a live item of this thread's allocator.
pub unsafe fn usable_size(ptr: NonNull<u8>) -> usize {
    with_allocator(|a| a.usable_size(ptr))
}

pub fn create_class(
    item_size: usize,
    arena: ArenaKind,
    hooks: ClassHooks,
    name: Option<&'static str>,
) -> Result<ClassId, SallocError> {
    with_allocator(|a| a.create_class(item_size, arena, hooks, name))
}

/// Hooks run while this thread's allocator is borrowed; calling back into
/// this module from one aborts.
pub fn class_allocate(class: ClassId) -> Result<NonNull<u8>, SallocError> {
    with_allocator(|a| a.class_allocate(class))
}

/// # Safety
/// `ptr` must come from `class_allocate(class)` on this thread and not have
/// been freed since.
pub unsafe fn class_free(class: ClassId, ptr: NonNull<u8>) {
    with_allocator(|a| a.class_free(class, ptr));
}

pub fn stats() -> Stats {
    with_allocator(|a| a.stats())
}

pub fn check_redzones() -> ValidationReport {
    with_allocator(|a| a.check_redzones())
}

/// Abort if any redzone of this thread's slabs was overwritten.
pub fn validate() {
    with_allocator(|a| a.validate());
}

pub fn last_error() -> Option<SallocError> {
    with_allocator(|a| a.last_error())
}
