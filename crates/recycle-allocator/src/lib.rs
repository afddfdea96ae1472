#![no_std]

extern crate alloc;
use alloc::collections::BinaryHeap;
use core::cmp::Reverse;

/// Hands out small integer ids, recycling the lowest freed id first.
///
/// Used for slot numbers of the fixed-region page store, so the id space may
/// be bounded.
pub struct RecycleAllocator {
    /// First id ever handed out.
    start: usize,
    /// Next never-used id.
    current: usize,
    /// Ids are always below this bound.
    limit: usize,
    /// Hold deallocated id, will be recycled first when alloc happen
    recycled: BinaryHeap<Reverse<usize>>,
}

impl RecycleAllocator {
    /// Create an unbounded `RecycleAllocator` starting at `init_val`.
    pub fn new(init_val: usize) -> Self {
        Self {
            start: init_val,
            current: init_val,
            limit: usize::MAX,
            recycled: BinaryHeap::new(),
        }
    }

    /// Create an allocator whose ids stay in `0..limit`.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            start: 0,
            current: 0,
            limit,
            recycled: BinaryHeap::new(),
        }
    }

    /// Allocate an id, or `None` once every id below the limit is in use.
    pub fn alloc(&mut self) -> Option<usize> {
        if let Some(Reverse(id)) = self.recycled.pop() {
            Some(id)
        } else if self.current < self.limit {
            self.current += 1;
            Some(self.current - 1)
        } else {
            None
        }
    }

    /// Recycle an id.
    pub fn dealloc(&mut self, id: usize) {
        assert!(self.start <= id && id < self.current);
        debug_assert!(
            !self.recycled.iter().any(|iid| iid.0 == id),
            "id {} has been deallocated!",
            id
        );
        self.recycled.push(Reverse(id));
    }

    /// Number of ids currently handed out.
    pub fn in_use(&self) -> usize {
        self.current - self.start - self.recycled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_ids_run_out_and_recycle_lowest_first() {
        let mut ids = RecycleAllocator::with_limit(3);
        assert_eq!(ids.alloc(), Some(0));
        assert_eq!(ids.alloc(), Some(1));
        assert_eq!(ids.alloc(), Some(2));
        assert_eq!(ids.alloc(), None);
        assert_eq!(ids.in_use(), 3);

        ids.dealloc(2);
        ids.dealloc(0);
        assert_eq!(ids.in_use(), 1);
        assert_eq!(ids.alloc(), Some(0));
        assert_eq!(ids.alloc(), Some(2));
        assert_eq!(ids.alloc(), None);
    }

    #[test]
    fn unbounded_allocator_starts_at_init_val() {
        let mut ids = RecycleAllocator::new(5);
        assert_eq!(ids.in_use(), 0);
        assert_eq!(ids.alloc(), Some(5));
        assert_eq!(ids.alloc(), Some(6));
        assert_eq!(ids.in_use(), 2);
    }
}
