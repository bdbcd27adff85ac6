/// The unit ordinal considered "currently being read".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    current: usize,
    unit_count: usize,
}

impl PlaybackCursor {
    pub fn new(unit_count: usize) -> Self {
        Self {
            current: 0,
            unit_count,
        }
    }

    pub fn get(&self) -> usize {
        if self.unit_count == 0 { 0 } else { self.current }
    }

    /// Store `ordinal`, clamped into the loaded document. Returns the stored value.
    pub fn set(&mut self, ordinal: usize) -> usize {
        self.current = self.clamp(ordinal);
        self.current
    }

    /// Re-bind the cursor to a document of `unit_count` units, keeping the
    /// position when it is still valid.
    pub fn set_unit_count(&mut self, unit_count: usize) {
        self.unit_count = unit_count;
        self.current = self.clamp(self.current);
    }

    pub fn clamp(&self, ordinal: usize) -> usize {
        ordinal.min(self.unit_count.saturating_sub(1))
    }
}
