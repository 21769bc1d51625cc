/// Picks which free entry `draw` hands out next. Receives the index of the
/// last occupied position in the backing array and must return a position in
/// `0..=last`; out-of-range picks are clamped. The default always picks the
/// front, which keeps allocation deterministic. A randomized selector spreads
/// write wear across the slot store instead.
pub type SelectFn = fn(last: u64) -> u64;

fn pick_front(_last: u64) -> u64 {
    0
}

/// Pool of slot indices available for allocation.
///
/// RAM-only; the queue rebuilds it at open by walking the live chains in the
/// backing file. `draw` and `put_back` are O(1). There is no double-free
/// guard: callers must return each drawn index exactly once.
pub struct FreeList {
    avail: Vec<u64>,
    select: SelectFn,
}

impl FreeList {
    /// Creates a pool holding the indices `0..elements`.
    pub fn new(elements: u64) -> Self {
        Self::with_selector(elements, pick_front)
    }

    pub fn with_selector(elements: u64, select: SelectFn) -> Self {
        Self {
            avail: (0..elements).collect(),
            select,
        }
    }

    /// Number of indices currently available.
    pub fn free(&self) -> usize {
        self.avail.len()
    }

    /// Takes the next index out of the pool, or `None` when exhausted.
    pub fn draw(&mut self) -> Option<u64> {
        if self.avail.is_empty() {
            return None;
        }
        let last = self.avail.len() - 1;
        let pick = ((self.select)(last as u64) as usize).min(last);
        Some(self.avail.swap_remove(pick))
    }

    /// Returns a previously drawn index to the pool.
    pub fn put_back(&mut self, index: u64) {
        self.avail.push(index);
    }

    /// Removes a specific index from the pool, used when rebuilding the pool
    /// around chains recovered from a reopened file. Returns false if the
    /// index was not available (already claimed by another chain).
    pub fn claim(&mut self, index: u64) -> bool {
        match self.avail.iter().position(|&v| v == index) {
            Some(pos) => {
                self.avail.swap_remove(pos);
                true
            }
            None => false,
        }
    }
}
