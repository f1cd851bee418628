//! Blocking diagnostics relay to the host controller
//!
//! A single-slot mailbox shared by all cores. A core renders its message
//! into a fixed-size buffer (truncating, never overflowing), deposits it
//! under mutual exclusion, and blocks until the host side takes it. The
//! channel is synchronous and core-serializing by design: at most one
//! message is in flight to the host at a time.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Fixed render buffer size; longer messages are truncated
pub const DIAG_BUFFER_LEN: usize = 128;

/// One relayed diagnostic message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRecord {
    /// Originating core
    pub pid: usize,
    /// Rendered text, at most [`DIAG_BUFFER_LEN`] bytes
    pub text: String,
}

/// Single-slot mailbox with host acknowledgement
pub struct DiagChannel {
    slot: Mutex<Option<DiagRecord>>,
    /// Signalled when a record is deposited
    posted: Condvar,
    /// Signalled when the host takes a record
    cleared: Condvar,
}

impl DiagChannel {
    /// Create an empty mailbox
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            posted: Condvar::new(),
            cleared: Condvar::new(),
        }
    }

    /// Relay a message and block until the host acknowledges it
    ///
    /// The message is truncated to [`DIAG_BUFFER_LEN`] bytes (at a character
    /// boundary) before entering the mailbox. Waits first for the slot to be
    /// free, then for the deposited record to be taken. Under contention a
    /// core may additionally wait out another core's in-flight record; its
    /// own record is acknowledged either way before this returns.
    pub fn post(&self, pid: usize, text: &str) {
        let record = DiagRecord {
            pid,
            text: truncate_utf8(text, DIAG_BUFFER_LEN).to_string(),
        };
        let mut slot = self.slot.lock();
        while slot.is_some() {
            self.cleared.wait(&mut slot);
        }
        *slot = Some(record);
        self.posted.notify_all();
        while slot.is_some() {
            self.cleared.wait(&mut slot);
        }
    }

    /// Host side: take the in-flight record if one is present
    pub fn try_take(&self) -> Option<DiagRecord> {
        let mut slot = self.slot.lock();
        let record = slot.take();
        if record.is_some() {
            self.cleared.notify_all();
        }
        record
    }

    /// Host side: wait up to `timeout` for a record
    pub fn recv(&self, timeout: Duration) -> Option<DiagRecord> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.is_none() {
            if self.posted.wait_until(&mut slot, deadline).timed_out() {
                return None;
            }
        }
        let record = slot.take();
        self.cleared.notify_all();
        record
    }
}

impl Default for DiagChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncate to at most `max` bytes without splitting a character
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "x".repeat(200);
        assert_eq!(truncate_utf8(&long, DIAG_BUFFER_LEN).len(), DIAG_BUFFER_LEN);

        // 'é' is two bytes; a cut inside it must back off.
        let s = "aé";
        assert_eq!(truncate_utf8(s, 2), "a");
        assert_eq!(truncate_utf8(s, 3), "aé");
    }

    #[test]
    fn test_post_blocks_until_taken() {
        let channel = Arc::new(DiagChannel::new());
        let poster = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.post(5, "overflow on core 5"))
        };

        let record = channel.recv(Duration::from_secs(5)).expect("record");
        assert_eq!(record.pid, 5);
        assert_eq!(record.text, "overflow on core 5");
        poster.join().unwrap();
    }

    #[test]
    fn test_channel_serializes_posters() {
        let channel = Arc::new(DiagChannel::new());
        let mut posters = vec![];
        for pid in 0..4 {
            let channel = Arc::clone(&channel);
            posters.push(thread::spawn(move || channel.post(pid, "msg")));
        }

        let mut seen = vec![];
        for _ in 0..4 {
            seen.push(channel.recv(Duration::from_secs(5)).expect("record").pid);
        }
        for p in posters {
            p.join().unwrap();
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(channel.try_take().is_none());
    }

    #[test]
    fn test_recv_times_out_when_idle() {
        let channel = DiagChannel::new();
        assert!(channel.recv(Duration::from_millis(10)).is_none());
    }
}
