/// Result of a redzone scan across both arenas.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub slabs_checked: usize,
    pub redzones_checked: usize,
    pub corrupted: usize,
    /// Address of the first damaged redzone, if any.
    pub first_corruption: Option<usize>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.corrupted == 0
    }

    pub fn record_corruption(&mut self, addr: usize) {
        self.corrupted += 1;
        if self.first_corruption.is_none() {
            self.first_corruption = Some(addr);
        }
    }
}
