pub mod context;
pub mod stats;

pub use context::SlabAllocator;
pub use stats::{ArenaStats, ClassStats, Stats};
