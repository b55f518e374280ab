pub mod arena;
pub mod cache;
pub mod header;
pub mod list;
pub mod size_class;

pub use arena::{Arena, ArenaKind};
pub use cache::{ClassHooks, ClassId, SlabCache};
pub use header::Slab;
pub use size_class::{SizeClassTable, MAX_ITEM_SIZE};
