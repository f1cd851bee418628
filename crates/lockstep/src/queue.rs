//! Double-buffered tagged message queue
//!
//! Two queue buffers alternate roles each superstep: sends append to the
//! *outgoing* buffer while receives drain the *incoming* buffer, which holds
//! the messages sent during the previous superstep. The rotation at each
//! sync swaps the roles and resets the recycled buffer, so a message sent in
//! superstep `K` is visible for consumption exactly during `K + 1` and
//! unreachable afterwards. Double buffering exists precisely so draining
//! never races against cores appending messages for the following superstep.
//!
//! Messages are append-only and never physically removed: consumption is a
//! per-core cursor that linearly skips messages addressed to other cores.

use crate::error::{LockstepError, Result};
use crate::pool::{PayloadPool, PoolSlice};
use crate::slots::SharedSlots;
use parking_lot::Mutex;

/// One queued message descriptor
///
/// Tag and payload bytes live in the shared payload pool; the descriptor
/// only records where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Destination core
    pub(crate) dest: usize,
    /// Tag bytes (length = the sending superstep's tag size)
    pub(crate) tag: PoolSlice,
    /// Payload bytes
    pub(crate) payload: PoolSlice,
}

const EMPTY_MESSAGE: Message = Message {
    dest: 0,
    tag: PoolSlice { offset: 0, len: 0 },
    payload: PoolSlice { offset: 0, len: 0 },
};

/// Append-only message buffer, valid for exactly one superstep as the
/// outgoing side and one as the incoming side
pub struct MessageQueue {
    /// Admission count; guarded together with the pool watermark so a send
    /// either reserves both a slot and its bytes or nothing
    count: Mutex<usize>,
    slots: SharedSlots<Message>,
}

impl MessageQueue {
    /// Create a queue with room for `max_messages` descriptors
    pub fn new(max_messages: usize) -> Self {
        Self {
            count: Mutex::new(0),
            slots: SharedSlots::new(EMPTY_MESSAGE, max_messages),
        }
    }

    /// Descriptor capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Messages appended so far this superstep
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Append a message for `dest`
    ///
    /// Under the admission lock, reserves one descriptor slot and
    /// `tag_size + payload.len()` bytes from the shared pool; on either limit
    /// being exceeded fails with `SendOverflow` leaving no partial state.
    /// Tag and payload bytes are copied outside the lock. A caller tag
    /// shorter than `tag_size` is zero-padded; a longer one is truncated.
    pub fn push(
        &self,
        pool: &PayloadPool,
        dest: usize,
        tag: &[u8],
        tag_size: usize,
        payload: &[u8],
    ) -> Result<()> {
        let requested = tag_size + payload.len();
        let index;
        let reserved;
        {
            let mut count = self.count.lock();
            if *count == self.slots.len() {
                return Err(LockstepError::SendOverflow {
                    messages: *count,
                    requested,
                    available: pool.available(),
                });
            }
            match pool.reserve(requested) {
                Some(slice) => {
                    index = *count;
                    *count += 1;
                    reserved = slice;
                }
                None => {
                    return Err(LockstepError::SendOverflow {
                        messages: *count,
                        requested,
                        available: pool.available(),
                    });
                }
            }
        }

        let tag_slice = PoolSlice {
            offset: reserved.offset(),
            len: tag_size,
        };
        let payload_slice = PoolSlice {
            offset: reserved.offset() + tag_size,
            len: payload.len(),
        };

        let copied = tag.len().min(tag_size);
        pool.write(
            PoolSlice {
                offset: tag_slice.offset(),
                len: copied,
            },
            &tag[..copied],
        );
        if copied < tag_size {
            let pad = vec![0u8; tag_size - copied];
            pool.write(
                PoolSlice {
                    offset: tag_slice.offset() + copied,
                    len: pad.len(),
                },
                &pad,
            );
        }
        pool.write(payload_slice, payload);

        self.slots.set(
            index,
            Message {
                dest,
                tag: tag_slice,
                payload: payload_slice,
            },
        );
        Ok(())
    }

    /// Descriptor at `index` (must be below [`count`](MessageQueue::count))
    pub fn message(&self, index: usize) -> Message {
        self.slots.get(index)
    }

    /// Discard all descriptors, making the buffer the next outgoing side
    ///
    /// Called by the sync protocol during rotation, between barriers.
    pub fn reset(&self) {
        *self.count.lock() = 0;
    }
}

/// Explicit two-slot ring phase: which buffer is outgoing this superstep
///
/// The one-superstep delivery delay is an invariant of this phase indicator,
/// not an accident of a toggling index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePhase {
    outgoing: usize,
}

impl QueuePhase {
    /// Initial phase: buffer 0 outgoing, buffer 1 (empty) incoming
    pub const fn new() -> Self {
        Self { outgoing: 0 }
    }

    /// Buffer receiving this superstep's sends
    pub const fn outgoing(&self) -> usize {
        self.outgoing
    }

    /// Buffer holding last superstep's sends
    pub const fn incoming(&self) -> usize {
        1 - self.outgoing
    }

    /// Swap roles at a superstep boundary
    pub fn rotate(&mut self) {
        self.outgoing = 1 - self.outgoing;
    }
}

impl Default for QueuePhase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_records_descriptor() {
        let pool = PayloadPool::new(64);
        let queue = MessageQueue::new(4);
        queue.push(&pool, 2, b"ab", 2, &[7, 8, 9]).unwrap();

        assert_eq!(queue.count(), 1);
        let message = queue.message(0);
        assert_eq!(message.dest, 2);
        assert_eq!(pool.slice(message.tag), b"ab");
        assert_eq!(pool.slice(message.payload), &[7, 8, 9]);
    }

    #[test]
    fn test_tag_zero_padding_and_truncation() {
        let pool = PayloadPool::new(64);
        let queue = MessageQueue::new(4);

        queue.push(&pool, 0, b"a", 3, &[]).unwrap();
        assert_eq!(pool.slice(queue.message(0).tag), &[b'a', 0, 0]);

        queue.push(&pool, 0, b"abcd", 2, &[]).unwrap();
        assert_eq!(pool.slice(queue.message(1).tag), b"ab");
    }

    #[test]
    fn test_slot_overflow() {
        let pool = PayloadPool::new(64);
        let queue = MessageQueue::new(1);
        queue.push(&pool, 0, &[], 0, &[1]).unwrap();
        let err = queue.push(&pool, 0, &[], 0, &[2]).unwrap_err();
        assert!(matches!(err, LockstepError::SendOverflow { messages: 1, .. }));
        // The failed send reserved nothing.
        assert_eq!(pool.watermark(), 1);
    }

    #[test]
    fn test_payload_overflow_leaves_no_partial_state() {
        let pool = PayloadPool::new(8);
        let queue = MessageQueue::new(4);
        let err = queue.push(&pool, 0, b"tag", 4, &[0; 8]).unwrap_err();
        assert!(matches!(err, LockstepError::SendOverflow { .. }));
        assert_eq!(queue.count(), 0);
        assert_eq!(pool.watermark(), 0);
    }

    #[test]
    fn test_reset_recycles_buffer() {
        let pool = PayloadPool::new(64);
        let queue = MessageQueue::new(2);
        queue.push(&pool, 0, &[], 0, &[1]).unwrap();
        queue.push(&pool, 0, &[], 0, &[2]).unwrap();
        queue.reset();
        assert_eq!(queue.count(), 0);
        queue.push(&pool, 0, &[], 0, &[3]).unwrap();
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn test_phase_rotation() {
        let mut phase = QueuePhase::new();
        assert_eq!(phase.outgoing(), 0);
        assert_eq!(phase.incoming(), 1);
        phase.rotate();
        assert_eq!(phase.outgoing(), 1);
        assert_eq!(phase.incoming(), 0);
        phase.rotate();
        assert_eq!(phase.outgoing(), 0);
    }
}
