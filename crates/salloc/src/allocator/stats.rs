//! Point-in-time numbers about a context. Rendering them is left to the host.

use crate::slab::arena::ArenaKind;

#[derive(Debug, Clone, PartialEq)]
pub struct ArenaStats {
    pub kind: ArenaKind,
    /// `used / total_size`, zero for an arena that maps nothing.
    pub used_fraction: f64,
    pub total_size: usize,
    pub used: usize,
    pub slab_count: usize,
    pub free_slab_count: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassStats {
    pub name: Option<&'static str>,
    pub item_size: usize,
    pub slab_count: usize,
    pub item_count: usize,
    /// Header overhead plus live items and their redzones.
    pub bytes_used: usize,
    pub bytes_free: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    pub arenas: Vec<ArenaStats>,
    /// Classes holding at least one slab, plus every named class.
    pub classes: Vec<ClassStats>,
    pub bytes_used: usize,
    pub items: usize,
    /// Bytes used by fixed-arena classes, in percent of the fixed arena.
    pub items_used_percent: f64,
    /// Fixed-arena slabs not sitting in the pool, in percent of the arena.
    pub arena_used_percent: f64,
}

impl Stats {
    pub fn arena(&self, kind: ArenaKind) -> Option<&ArenaStats> {
        self.arenas.iter().find(|a| a.kind == kind)
    }

    pub fn class(&self, item_size: usize) -> Option<&ClassStats> {
        self.classes.iter().find(|c| c.item_size == item_size)
    }
}
