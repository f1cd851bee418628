//! Pending remote-memory transfer requests
//!
//! Each buffered `put`/`get` enqueues one [`DataRequest`] owned by the
//! issuing core. Requests are consumed exactly once by the sync protocol
//! (gets first, then puts) and never persist across supersteps.

use crate::grid::{GlobalAddr, LocalAddr};
use crate::pool::PoolSlice;

/// One pending remote-memory transfer
///
/// A tagged variant rather than a size field with a stolen discriminator
/// bit: the request kind carries no silent length cap and no sentinel
/// encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRequest {
    /// Copy from a resolved remote source into this core's arena.
    /// The copy is deferred to the sync protocol's get phase; no staging.
    Get {
        src: GlobalAddr,
        dst: LocalAddr,
        len: usize,
    },
    /// Copy a staged payload from the shared pool into a resolved remote
    /// destination during the sync protocol's put phase.
    Put { payload: PoolSlice, dst: GlobalAddr },
}

/// Fixed-capacity per-core request list
///
/// Bounds the number of outstanding requests per superstep; the capacity
/// check is explicit and overflow is reported by the caller with the
/// operation-specific error.
#[derive(Debug)]
pub struct RequestTable {
    entries: Vec<DataRequest>,
    capacity: usize,
}

impl RequestTable {
    /// Create a table admitting up to `capacity` requests per superstep
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Request capacity per superstep
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of requests pending
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no further request can be admitted this superstep
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Append a request; the caller has already checked
    /// [`is_full`](RequestTable::is_full)
    pub fn push(&mut self, request: DataRequest) {
        debug_assert!(!self.is_full());
        self.entries.push(request);
    }

    /// Pending requests in issue order
    pub fn iter(&self) -> impl Iterator<Item = &DataRequest> {
        self.entries.iter()
    }

    /// Drop all pending requests (end of superstep)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
