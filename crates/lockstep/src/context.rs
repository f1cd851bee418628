//! Per-core runtime context and the superstep sync protocol
//!
//! One [`CoreContext`] exists per core and is owned exclusively by that
//! core's thread of execution; every operation takes it by reference, so
//! there is no ambient per-core global state. The context carries the
//! per-superstep bookkeeping (request table, registration flag, message
//! cursor, queue phase, tag sizes) and orchestrates the multi-phase barrier
//! sequence at each superstep boundary.
//!
//! # Superstep ordering
//!
//! `sync` runs a strict staged sequence, each stage separated by a full
//! barrier so every core observes prior stages' writes before the next
//! begins:
//!
//! ```text
//! barrier -> apply gets -> barrier -> apply puts -> bookkeeping -> barrier
//! ```
//!
//! Gets complete globally before any put begins: a put from another core
//! must never be observable by a get issued in the same superstep.

use crate::error::{LockstepError, Result};
use crate::grid::{GlobalAddr, LocalAddr};
use crate::platform::{CoreState, CountdownTimer, CycleTimer};
use crate::pool::PoolSlice;
use crate::queue::{Message, QueuePhase};
use crate::region::SharedRegion;
use crate::request::{DataRequest, RequestTable};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Borrowed view of a received message still resident in the shared pool
///
/// Zero-copy receive: the slices point into the payload pool and are valid
/// only until the next pool reset. The borrow of the core context enforces
/// that statically: `sync` cannot be called while a `MessageRef` is alive.
pub struct MessageRef<'a> {
    tag: &'a [u8],
    payload: &'a [u8],
}

impl<'a> MessageRef<'a> {
    /// Tag bytes (length = the sending superstep's tag size)
    pub fn tag(&self) -> &'a [u8] {
        self.tag
    }

    /// Payload bytes
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for an empty payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Per-core BSP runtime state
///
/// Invariants: the request table and message cursor reset exactly once per
/// superstep, only inside [`sync`](CoreContext::sync); the tag size changes
/// only at superstep boundaries.
pub struct CoreContext {
    region: Arc<SharedRegion>,
    pid: usize,
    nprocs: usize,
    /// Tag size negotiated for the current superstep
    tag_size: usize,
    /// Tag size taking effect at the next superstep boundary
    tag_size_next: usize,
    requests: RequestTable,
    /// Whether this core registered a variable this superstep
    var_pushed: bool,
    queue_phase: QueuePhase,
    /// Consumption cursor into the incoming queue buffer
    message_cursor: usize,
    timer: Box<dyn CycleTimer>,
    time_passed: f64,
    last_timer_value: u32,
}

impl CoreContext {
    /// Start the runtime on the core at mesh position `(row, col)`
    ///
    /// Derives the pid from the position, reads the core count and initial
    /// tag size from the shared region, zeroes all per-superstep counters,
    /// publishes the RUN state to the host, and starts the local timer.
    pub fn begin(region: Arc<SharedRegion>, row: usize, col: usize) -> Result<Self> {
        Self::begin_with_timer(region, row, col, Box::new(CountdownTimer::new()))
    }

    /// Start the runtime with an explicit timer device
    pub fn begin_with_timer(
        region: Arc<SharedRegion>,
        row: usize,
        col: usize,
        mut timer: Box<dyn CycleTimer>,
    ) -> Result<Self> {
        let pid = region.grid().pid_of(row, col)?;
        let nprocs = region.nprocs();
        let tag_size = region.config().initial_tag_size;
        let max_requests = region.config().max_requests;

        region.set_core_state(pid, CoreState::Run);
        debug!(pid, nprocs, "core entering BSP run state");

        timer.reload();
        let last_timer_value = timer.read();

        Ok(Self {
            region,
            pid,
            nprocs,
            tag_size,
            tag_size_next: tag_size,
            requests: RequestTable::new(max_requests),
            var_pushed: false,
            queue_phase: QueuePhase::new(),
            message_cursor: 0,
            timer,
            time_passed: 0.0,
            last_timer_value,
        })
    }

    /// This core's pid
    pub fn pid(&self) -> usize {
        self.pid
    }

    /// Number of cores participating in the program
    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    /// Tag size in effect for the current superstep
    pub fn tag_size(&self) -> usize {
        self.tag_size
    }

    /// Shared region this core participates in
    pub fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }

    /// Log a rejected operation and hand the error back to the caller
    ///
    /// Every rejection is non-fatal and leaves no partial shared state; the
    /// event makes the failure observable to the host even when the caller
    /// discards the error.
    fn reject(&self, err: LockstepError) -> LockstepError {
        warn!(pid = self.pid, %err, "operation rejected");
        err
    }

    // ---- local arena access ------------------------------------------------

    /// Write bytes into this core's own arena
    pub fn local_write(&mut self, addr: LocalAddr, src: &[u8]) -> Result<()> {
        self.region.arena_write(self.pid, addr.offset(), src)
    }

    /// Read bytes from this core's own arena
    pub fn local_read(&self, addr: LocalAddr, dst: &mut [u8]) -> Result<()> {
        self.region.arena_read(self.pid, addr.offset(), dst)
    }

    /// Store a plain value into this core's own arena
    pub fn local_store<T: bytemuck::Pod>(&mut self, addr: LocalAddr, value: T) -> Result<()> {
        self.local_write(addr, bytemuck::bytes_of(&value))
    }

    /// Load a plain value from this core's own arena
    pub fn local_load<T: bytemuck::Pod>(&self, addr: LocalAddr) -> Result<T> {
        let mut value = T::zeroed();
        self.region
            .arena_read(self.pid, addr.offset(), bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    // ---- registration ------------------------------------------------------

    /// Register a local variable so other cores can address it by slot
    ///
    /// All cores must register the same number of variables in the same
    /// order; the registration becomes resolvable after the next `sync`.
    /// Fails with `MultipleRegistration` on a second registration in one
    /// superstep and `RegistrationOverflow` at the lifetime ceiling.
    pub fn register(&mut self, addr: LocalAddr, len: usize) -> Result<()> {
        if self.var_pushed {
            return Err(self.reject(LockstepError::MultipleRegistration { pid: self.pid }));
        }
        let arena = self.region.grid().arena_size();
        if addr.offset() + len > arena {
            return Err(self.reject(LockstepError::AddressOutOfBounds {
                pid: self.pid,
                offset: addr.offset(),
                len,
                arena,
            }));
        }
        self.region
            .variables()
            .register(self.pid, addr)
            .map_err(|err| self.reject(err))?;
        self.var_pushed = true;
        Ok(())
    }

    fn resolve(&self, pid: usize, addr: LocalAddr, byte_offset: usize, len: usize) -> Result<GlobalAddr> {
        let remote = self
            .region
            .variables()
            .resolve(self.region.grid(), self.pid, pid, addr, byte_offset)?;
        let arena = self.region.grid().arena_size();
        if remote.offset() + len > arena {
            return Err(LockstepError::AddressOutOfBounds {
                pid: remote.pid(),
                offset: remote.offset(),
                len,
                arena,
            });
        }
        Ok(remote)
    }

    // ---- buffered remote access --------------------------------------------

    /// Stage a buffered put of `src` into core `pid`'s variable `dst`
    ///
    /// The payload is copied into the shared pool now; the write to the
    /// remote arena happens during the next `sync`, after all gets. A
    /// zero-byte put is a legal no-op and consumes no request slot.
    pub fn put(&mut self, pid: usize, src: &[u8], dst: LocalAddr, offset: usize) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        if self.requests.is_full() {
            return Err(self.reject(LockstepError::PutRequestOverflow {
                capacity: self.requests.capacity(),
            }));
        }
        let dst_remote = self
            .resolve(pid, dst, offset, src.len())
            .map_err(|err| self.reject(err))?;
        let pool = self.region.pool();
        let payload = pool.reserve(src.len()).ok_or_else(|| {
            self.reject(LockstepError::PutPayloadOverflow {
                requested: src.len(),
                available: pool.available(),
            })
        })?;
        // Admission is done; the copy itself runs outside the pool lock.
        pool.write(payload, src);
        self.requests.push(DataRequest::Put {
            payload,
            dst: dst_remote,
        });
        Ok(())
    }

    /// Stage a buffered get from core `pid`'s variable `src` into `dst`
    ///
    /// No staging copy: the transfer reads the remote arena during the next
    /// `sync`'s get phase, before any put of that superstep is applied.
    pub fn get(
        &mut self,
        pid: usize,
        src: LocalAddr,
        offset: usize,
        dst: LocalAddr,
        len: usize,
    ) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        if self.requests.is_full() {
            return Err(self.reject(LockstepError::GetRequestOverflow {
                capacity: self.requests.capacity(),
            }));
        }
        let src_remote = self
            .resolve(pid, src, offset, len)
            .map_err(|err| self.reject(err))?;
        let arena = self.region.grid().arena_size();
        if dst.offset() + len > arena {
            return Err(self.reject(LockstepError::AddressOutOfBounds {
                pid: self.pid,
                offset: dst.offset(),
                len,
                arena,
            }));
        }
        self.requests.push(DataRequest::Get {
            src: src_remote,
            dst,
            len,
        });
        Ok(())
    }

    /// Unbuffered put: resolve and copy immediately
    ///
    /// No ordering guarantee relative to other cores' operations this
    /// superstep; the caller must know the destination is not touched by
    /// anyone else until the next barrier.
    pub fn hp_put(&mut self, pid: usize, src: &[u8], dst: LocalAddr, offset: usize) -> Result<()> {
        let dst_remote = self
            .resolve(pid, dst, offset, src.len())
            .map_err(|err| self.reject(err))?;
        self.region
            .arena_write(dst_remote.pid(), dst_remote.offset(), src)
    }

    /// Unbuffered get: resolve and copy immediately
    pub fn hp_get(&mut self, pid: usize, src: LocalAddr, offset: usize, dst: &mut [u8]) -> Result<()> {
        let src_remote = self
            .resolve(pid, src, offset, dst.len())
            .map_err(|err| self.reject(err))?;
        self.region
            .arena_read(src_remote.pid(), src_remote.offset(), dst)
    }

    // ---- tagged messaging --------------------------------------------------

    /// Request a new tag size starting next superstep; returns the active one
    ///
    /// Message tag width is fixed for the duration of a superstep so all
    /// cores parse queues consistently; the change takes effect at the next
    /// boundary, where every core commits the same requested value.
    pub fn set_tag_size(&mut self, next: usize) -> usize {
        self.tag_size_next = next;
        self.tag_size
    }

    /// Send a tagged message to core `pid`, deliverable next superstep
    ///
    /// Reserves a descriptor slot and `tag_size + payload.len()` pool bytes
    /// atomically; fails with `SendOverflow` on either limit, leaving no
    /// partial state. Fails with `InvalidPid` for a destination outside the
    /// mesh. Uses the tag size of the *current* superstep.
    pub fn send(&mut self, pid: usize, tag: &[u8], payload: &[u8]) -> Result<()> {
        if pid >= self.nprocs {
            return Err(self.reject(LockstepError::InvalidPid {
                pid,
                nprocs: self.nprocs,
            }));
        }
        self.region
            .queue(self.queue_phase.outgoing())
            .push(self.region.pool(), pid, tag, self.tag_size, payload)
            .map_err(|err| self.reject(err))
    }

    /// Messages and total payload bytes awaiting this core
    ///
    /// Scans the incoming buffer from the current cursor to completion
    /// without consuming anything.
    pub fn queue_size(&self) -> (usize, usize) {
        let queue = self.region.queue(self.queue_phase.incoming());
        let count = queue.count();
        let mut packets = 0;
        let mut bytes = 0;
        for index in self.message_cursor..count {
            let message = queue.message(index);
            if message.dest != self.pid {
                continue;
            }
            packets += 1;
            bytes += message.payload.len();
        }
        (packets, bytes)
    }

    /// Advance the cursor to the next message addressed to this core
    fn next_own_message(&mut self) -> Option<Message> {
        let queue = self.region.queue(self.queue_phase.incoming());
        let count = queue.count();
        while self.message_cursor < count {
            let message = queue.message(self.message_cursor);
            if message.dest == self.pid {
                return Some(message);
            }
            self.message_cursor += 1;
        }
        None
    }

    /// Peek the tag of the next message for this core without consuming it
    ///
    /// Copies at most `tag_buf.len()` tag bytes and returns the message's
    /// payload length, or `None` when no message remains this superstep.
    pub fn peek_tag(&mut self, tag_buf: &mut [u8]) -> Option<usize> {
        let message = self.next_own_message()?;
        let copied = tag_buf.len().min(message.tag.len());
        if copied > 0 {
            self.region.pool().read(
                PoolSlice {
                    offset: message.tag.offset(),
                    len: copied,
                },
                &mut tag_buf[..copied],
            );
        }
        Some(message.payload.len())
    }

    /// Consume the next message for this core, copying its payload
    ///
    /// The copy is truncated to the smaller of `buf.len()` and the message
    /// size; a zero-length buffer pops without copying. Returns the full
    /// message size. The message is only skipped, never physically removed.
    pub fn move_message(&mut self, buf: &mut [u8]) -> Option<usize> {
        let message = self.next_own_message()?;
        self.message_cursor += 1;
        let copied = buf.len().min(message.payload.len());
        if copied > 0 {
            self.region.pool().read(
                PoolSlice {
                    offset: message.payload.offset(),
                    len: copied,
                },
                &mut buf[..copied],
            );
        }
        Some(message.payload.len())
    }

    /// Consume the next message for this core without copying
    ///
    /// Returns borrowed tag and payload slices still resident in the shared
    /// pool; they remain valid until the next pool reset, which the borrow
    /// of `self` rules out for as long as the reference is held.
    pub fn hp_move(&mut self) -> Option<MessageRef<'_>> {
        let message = self.next_own_message()?;
        self.message_cursor += 1;
        let pool = self.region.pool();
        Some(MessageRef {
            tag: pool.slice(message.tag),
            payload: pool.slice(message.payload),
        })
    }

    // ---- diagnostics -------------------------------------------------------

    /// Relay a message to the host controller, blocking until acknowledged
    pub fn report(&self, text: &str) {
        self.region.diag().post(self.pid, text);
    }

    // ---- superstep boundary ------------------------------------------------

    /// Execute the superstep barrier protocol
    ///
    /// On return, every get issued this superstep has observed pre-put
    /// values, every put is visible everywhere, the payload pool watermark
    /// is zero, the message queues have rotated, and a requested tag size
    /// is in effect.
    pub fn sync(&mut self) {
        // Stage 1: freeze. No core may still be appending requests.
        self.region.barrier().arrive_and_wait();

        // Stage 2: gets, globally before any put.
        for request in self.requests.iter() {
            if let DataRequest::Get { src, dst, len } = request {
                if let Err(err) = self.region.arena_copy(*src, self.pid, dst.offset(), *len) {
                    // Requests are validated at issue time; surface anyway.
                    error!(pid = self.pid, %err, "get application failed");
                }
            }
        }

        // Stage 3: puts.
        self.region.barrier().arrive_and_wait();
        for request in self.requests.iter() {
            if let DataRequest::Put { payload, dst } = request {
                if let Err(err) = self.region.apply_payload(*payload, *dst) {
                    error!(pid = self.pid, %err, "put application failed");
                }
            }
        }
        self.requests.clear();

        // Stage 4: bookkeeping. The pool reset only rewinds the watermark,
        // so cores still copying staged payloads are unaffected; every core
        // performing it redundantly is idempotent.
        self.region.pool().reset();

        if self.var_pushed {
            self.var_pushed = false;
            // Exactly one increment per registration round.
            if self.pid == 0 {
                self.region.variables().commit();
            }
        }

        self.queue_phase.rotate();
        // The buffer drained this superstep becomes the new outgoing side;
        // recycle it before anyone can append.
        self.region.queue(self.queue_phase.outgoing()).reset();

        self.tag_size = self.tag_size_next;
        self.message_cursor = 0;

        self.region.barrier().arrive_and_wait();
    }

    // ---- lifecycle ---------------------------------------------------------

    /// Halt this core permanently
    ///
    /// Publishes the FINISH state to the host and consumes the context; no
    /// further BSP calls are possible.
    pub fn end(self) {
        debug!(pid = self.pid, "core finished");
        self.region.set_core_state(self.pid, CoreState::Finish);
    }

    // ---- timing ------------------------------------------------------------

    /// Elapsed core time in seconds since `begin`
    ///
    /// Reads the decrementing cycle counter, accumulates the delta, and
    /// reloads the counter so a wrap between calls is the only loss.
    pub fn time(&mut self) -> f64 {
        let current = self.timer.read();
        self.time_passed +=
            f64::from(self.last_timer_value.wrapping_sub(current)) / self.timer.hz();
        self.timer.reload();
        self.last_timer_value = self.timer.read();
        self.time_passed
    }

    /// Elapsed time as published by the host controller
    pub fn remote_time(&self) -> f32 {
        self.region.remote_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionConfig;

    fn single_core() -> CoreContext {
        let region = SharedRegion::new(RegionConfig {
            rows: 1,
            cols: 1,
            arena_size: 256,
            payload_capacity: 128,
            max_requests: 4,
            max_messages: 4,
            ..RegionConfig::default()
        });
        CoreContext::begin(region, 0, 0).unwrap()
    }

    #[test]
    fn test_begin_publishes_run_state() {
        let ctx = single_core();
        assert_eq!(ctx.pid(), 0);
        assert_eq!(ctx.nprocs(), 1);
        assert_eq!(ctx.region().core_state(0), CoreState::Run);
    }

    #[test]
    fn test_local_typed_round_trip() {
        let mut ctx = single_core();
        ctx.local_store(LocalAddr::new(16), 42u32).unwrap();
        assert_eq!(ctx.local_load::<u32>(LocalAddr::new(16)).unwrap(), 42);
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut ctx = single_core();
        ctx.register(LocalAddr::new(0), 4).unwrap();
        let err = ctx.register(LocalAddr::new(8), 4).unwrap_err();
        assert_eq!(err, LockstepError::MultipleRegistration { pid: 0 });
        // A new superstep allows registering again.
        ctx.sync();
        ctx.register(LocalAddr::new(8), 4).unwrap();
    }

    #[test]
    fn test_registration_bounds_checked() {
        let mut ctx = single_core();
        let err = ctx.register(LocalAddr::new(250), 16).unwrap_err();
        assert!(matches!(err, LockstepError::AddressOutOfBounds { .. }));
    }

    #[test]
    fn test_unregistered_put_fails_and_core_continues() {
        let mut ctx = single_core();
        let err = ctx.put(0, &[1, 2], LocalAddr::new(0), 0).unwrap_err();
        assert_eq!(
            err,
            LockstepError::VariableNotFound {
                pid: 0,
                addr: LocalAddr::new(0)
            }
        );
        // The failed call left no partial state behind.
        assert_eq!(ctx.region().pool().watermark(), 0);
        ctx.sync();
    }

    #[test]
    fn test_out_of_mesh_pid_is_rejected() {
        let mut ctx = single_core();
        let var = LocalAddr::new(0);
        ctx.register(var, 4).unwrap();
        ctx.sync();

        let expected = LockstepError::InvalidPid { pid: 999, nprocs: 1 };
        assert_eq!(ctx.put(999, &[1, 2, 3, 4], var, 0).unwrap_err(), expected);
        assert_eq!(ctx.get(999, var, 0, var, 4).unwrap_err(), expected);
        assert_eq!(ctx.hp_put(999, &[1], var, 0).unwrap_err(), expected);
        let mut buf = [0u8; 1];
        assert_eq!(ctx.hp_get(999, var, 0, &mut buf).unwrap_err(), expected);
        assert_eq!(ctx.send(999, &[], &[1]).unwrap_err(), expected);

        // The rejected calls staged nothing and the core continues.
        assert_eq!(ctx.region().pool().watermark(), 0);
        ctx.sync();
    }

    #[test]
    fn test_rejected_operation_emits_warning() {
        use std::io::Write;

        #[derive(Clone, Default)]
        struct CaptureWriter(Arc<parking_lot::Mutex<Vec<u8>>>);

        impl Write for CaptureWriter {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CaptureWriter {
            type Writer = CaptureWriter;

            fn make_writer(&'a self) -> Self::Writer {
                self.clone()
            }
        }

        let writer = CaptureWriter::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let mut ctx = single_core();
            assert!(ctx.put(0, &[1], LocalAddr::new(0), 0).is_err());
        });

        let output = String::from_utf8(writer.0.lock().clone()).unwrap();
        assert!(output.contains("operation rejected"));
        assert!(output.contains("no registered variable"));
    }

    #[test]
    fn test_zero_byte_transfers_are_noops() {
        let mut ctx = single_core();
        ctx.register(LocalAddr::new(0), 8).unwrap();
        ctx.sync();
        ctx.put(0, &[], LocalAddr::new(0), 0).unwrap();
        ctx.get(0, LocalAddr::new(0), 0, LocalAddr::new(8), 0).unwrap();
        assert_eq!(ctx.region().pool().watermark(), 0);
    }

    #[test]
    fn test_set_tag_size_is_deferred() {
        let mut ctx = single_core();
        assert_eq!(ctx.set_tag_size(4), 0);
        assert_eq!(ctx.tag_size(), 0);
        ctx.sync();
        assert_eq!(ctx.tag_size(), 4);
    }

    #[test]
    fn test_self_message_round_trip() {
        let mut ctx = single_core();
        ctx.set_tag_size(1);
        ctx.sync();
        ctx.send(0, b"t", &[5, 6, 7]).unwrap();
        assert_eq!(ctx.queue_size(), (0, 0));
        ctx.sync();
        assert_eq!(ctx.queue_size(), (1, 3));

        let mut tag = [0u8; 1];
        assert_eq!(ctx.peek_tag(&mut tag), Some(3));
        assert_eq!(&tag, b"t");

        let mut buf = [0u8; 8];
        assert_eq!(ctx.move_message(&mut buf), Some(3));
        assert_eq!(&buf[..3], &[5, 6, 7]);
        assert_eq!(ctx.queue_size(), (0, 0));
        assert!(ctx.move_message(&mut buf).is_none());
    }

    #[test]
    fn test_hp_move_zero_copy() {
        let mut ctx = single_core();
        ctx.set_tag_size(2);
        ctx.sync();
        ctx.send(0, b"ab", &[9]).unwrap();
        ctx.sync();

        let message = ctx.hp_move().expect("message");
        assert_eq!(message.tag(), b"ab");
        assert_eq!(message.payload(), &[9]);
        assert_eq!(message.len(), 1);
    }

    #[test]
    fn test_end_publishes_finish() {
        let ctx = single_core();
        let region = Arc::clone(ctx.region());
        ctx.end();
        assert_eq!(region.core_state(0), CoreState::Finish);
    }

    #[test]
    fn test_time_accumulates() {
        let mut ctx = single_core();
        let first = ctx.time();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ctx.time();
        assert!(second > first);
    }
}
