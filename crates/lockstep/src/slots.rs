//! Barrier-synchronized shared slot storage
//!
//! A fixed array of `Copy` cells shared by all cores. There is no per-cell
//! locking: the runtime's write discipline is that a slot has exactly one
//! writer between two barriers, and readers only touch slots that were
//! published before the barrier they crossed. The barrier provides the
//! ordering; this type only provides the storage.

use std::cell::UnsafeCell;

/// Fixed shared array with barrier-ordered access
///
/// Concurrency contract: between any two barriers, each index is written by
/// at most one core, and no core reads an index another core is writing in
/// the same barrier interval. The registration table (one column per pid) and
/// the message descriptor tables (one slot per reserved index) both satisfy
/// this by construction.
pub struct SharedSlots<T: Copy> {
    cells: Box<[UnsafeCell<T>]>,
}

// Safe under the struct-level write discipline.
unsafe impl<T: Copy + Send> Sync for SharedSlots<T> {}
unsafe impl<T: Copy + Send> Send for SharedSlots<T> {}

impl<T: Copy> SharedSlots<T> {
    /// Create `len` slots, all holding `initial`
    pub fn new(initial: T, len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| UnsafeCell::new(initial)).collect(),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if the array has no slots
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read slot `index`
    ///
    /// The caller must know (via the barrier protocol) that no other core is
    /// writing this slot in the current barrier interval.
    #[inline]
    pub fn get(&self, index: usize) -> T {
        assert!(index < self.cells.len());
        unsafe { *self.cells[index].get() }
    }

    /// Write slot `index`
    ///
    /// The caller must be the slot's unique writer for the current barrier
    /// interval.
    #[inline]
    pub fn set(&self, index: usize, value: T) {
        assert!(index < self.cells.len());
        unsafe {
            *self.cells[index].get() = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_value() {
        let slots = SharedSlots::new(7u32, 4);
        assert_eq!(slots.len(), 4);
        for i in 0..4 {
            assert_eq!(slots.get(i), 7);
        }
    }

    #[test]
    fn test_set_get() {
        let slots = SharedSlots::new(0u8, 3);
        slots.set(1, 42);
        assert_eq!(slots.get(0), 0);
        assert_eq!(slots.get(1), 42);
    }

    #[test]
    #[should_panic]
    fn test_out_of_bounds_panics() {
        let slots = SharedSlots::new(0u8, 2);
        slots.get(2);
    }

    #[test]
    fn test_disjoint_writers() {
        let slots = Arc::new(SharedSlots::new(0usize, 8));
        let mut handles = vec![];
        for i in 0..8 {
            let slots = Arc::clone(&slots);
            handles.push(thread::spawn(move || slots.set(i, i + 1)));
        }
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..8 {
            assert_eq!(slots.get(i), i + 1);
        }
    }
}
