//! Thread-local slab allocator.
//!
//! Objects up to a quarter slab are served from size classes carved out of
//! 4 MiB slab-aligned slabs. Freeing masks the pointer down to its slab
//! header, so no per-object metadata exists outside the slab. Redzones
//! guard every item in debug builds (or with the `redzone` feature).
//!
//! Use [`SlabAllocator`] directly, or the per-thread functions in [`api`].

extern crate libc;

pub mod allocator;
pub mod api;
pub mod config;
pub mod error;
pub mod hardening;
pub mod init;
pub mod platform;
pub mod slab;
pub mod util;

pub use allocator::{ArenaStats, ClassStats, SlabAllocator, Stats};
pub use config::{Config, ReleasePolicy};
pub use error::SallocError;
pub use hardening::{Instrument, NoInstrument, ValidationReport};
pub use slab::{ArenaKind, ClassHooks, ClassId};
