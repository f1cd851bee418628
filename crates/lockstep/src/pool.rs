//! Shared payload pool: a per-superstep bump arena
//!
//! One fixed-size byte buffer shared by all cores. Admission is a
//! mutex-guarded watermark advance; the bulk copy into a reserved range
//! happens outside the lock, which is safe because reservation hands out
//! non-overlapping ranges. The only deallocation event is the whole-buffer
//! reset performed once per superstep by the sync protocol. There is no
//! per-object free, so the arena is trivially free of fragmentation and
//! use-after-free at the cost of capacity being a hard per-superstep ceiling
//! across all puts and sent messages combined.

use parking_lot::Mutex;
use std::cell::UnsafeCell;

/// A reserved byte range in the shared payload pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSlice {
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

impl PoolSlice {
    /// Byte offset of the range within the pool
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the range in bytes
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-byte reservation
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bump allocator over a fixed shared byte buffer
///
/// Concurrency contract: `reserve` is the only admission point and is
/// serialized by the internal mutex; `write`/`read` touch only ranges the
/// caller has reserved (writers) or ranges published before a barrier
/// (readers), so they run lock-free on disjoint bytes. `reset` is called by
/// the sync protocol while every core is inside the barrier sequence.
pub struct PayloadPool {
    watermark: Mutex<usize>,
    capacity: usize,
    data: UnsafeCell<Box<[u8]>>,
}

// Range disjointness is guaranteed by the reservation protocol; see the
// struct-level contract.
unsafe impl Sync for PayloadPool {}

impl PayloadPool {
    /// Create a pool with `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            watermark: Mutex::new(0),
            capacity,
            data: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
        }
    }

    /// Pool capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current watermark (bytes reserved this superstep)
    pub fn watermark(&self) -> usize {
        *self.watermark.lock()
    }

    /// Reserve `len` bytes, advancing the watermark
    ///
    /// Returns the prior watermark as the range offset, or `None` if the
    /// reservation would exceed capacity, in which case nothing is mutated.
    pub fn reserve(&self, len: usize) -> Option<PoolSlice> {
        let mut watermark = self.watermark.lock();
        if *watermark + len > self.capacity {
            return None;
        }
        let offset = *watermark;
        *watermark += len;
        Some(PoolSlice { offset, len })
    }

    /// Bytes still available this superstep
    pub fn available(&self) -> usize {
        self.capacity - *self.watermark.lock()
    }

    /// Copy `src` into a reserved range
    ///
    /// Lock-free: the caller must own the reservation, which guarantees the
    /// range overlaps no other writer.
    pub fn write(&self, slice: PoolSlice, src: &[u8]) {
        debug_assert!(src.len() <= slice.len);
        debug_assert!(slice.offset + slice.len <= self.capacity);
        if src.is_empty() {
            return;
        }
        unsafe {
            let base = (*self.data.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(slice.offset), src.len());
        }
    }

    /// Copy from a reserved range into `dst`
    pub fn read(&self, slice: PoolSlice, dst: &mut [u8]) {
        debug_assert!(dst.len() <= slice.len);
        debug_assert!(slice.offset + slice.len <= self.capacity);
        if dst.is_empty() {
            return;
        }
        unsafe {
            let base = (*self.data.get()).as_ptr();
            std::ptr::copy_nonoverlapping(base.add(slice.offset), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Borrow a reserved range in place
    ///
    /// The returned slice stays valid only until the next
    /// [`reset`](PayloadPool::reset); callers tie its lifetime to a borrow
    /// that prevents syncing while it is held.
    pub fn slice(&self, slice: PoolSlice) -> &[u8] {
        debug_assert!(slice.offset + slice.len <= self.capacity);
        unsafe {
            let base = (*self.data.get()).as_ptr();
            std::slice::from_raw_parts(base.add(slice.offset), slice.len)
        }
    }

    /// Reset the watermark to zero
    ///
    /// Called once per superstep by the sync protocol, between barriers.
    /// Data is not cleared; prior reservations simply become reusable.
    pub fn reset(&self) {
        *self.watermark.lock() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_reserve_advances_watermark() {
        let pool = PayloadPool::new(64);
        let a = pool.reserve(16).unwrap();
        let b = pool.reserve(8).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 16);
        assert_eq!(pool.watermark(), 24);
    }

    #[test]
    fn test_reserve_overflow_leaves_state() {
        let pool = PayloadPool::new(32);
        pool.reserve(30).unwrap();
        assert!(pool.reserve(3).is_none());
        assert_eq!(pool.watermark(), 30);
        // An exact fit still succeeds.
        assert!(pool.reserve(2).is_some());
    }

    #[test]
    fn test_zero_byte_reservation() {
        let pool = PayloadPool::new(4);
        let slice = pool.reserve(0).unwrap();
        assert!(slice.is_empty());
        assert_eq!(pool.watermark(), 0);
    }

    #[test]
    fn test_write_read_round() {
        let pool = PayloadPool::new(64);
        let slice = pool.reserve(5).unwrap();
        pool.write(slice, b"hello");
        let mut out = [0u8; 5];
        pool.read(slice, &mut out);
        assert_eq!(&out, b"hello");
        assert_eq!(pool.slice(slice), b"hello");
    }

    #[test]
    fn test_reset_reclaims_capacity() {
        let pool = PayloadPool::new(16);
        pool.reserve(16).unwrap();
        assert!(pool.reserve(1).is_none());
        pool.reset();
        assert_eq!(pool.watermark(), 0);
        assert!(pool.reserve(16).is_some());
    }

    #[test]
    fn test_concurrent_reservations_disjoint() {
        let pool = Arc::new(PayloadPool::new(4096));
        let mut handles = vec![];
        for byte in 0..8u8 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                let slice = pool.reserve(64).unwrap();
                pool.write(slice, &[byte; 64]);
                slice
            }));
        }
        let slices: Vec<PoolSlice> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(pool.watermark(), 8 * 64);
        for (i, slice) in slices.iter().enumerate() {
            let mut out = [0u8; 64];
            pool.read(*slice, &mut out);
            assert!(out.iter().all(|&b| b == out[0]), "slice {i} was torn");
        }
    }
}
