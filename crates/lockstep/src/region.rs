//! The shared communication region
//!
//! One memory region accessed by every core, with no exclusive owner. It
//! holds each core's local arena, the shared payload pool, the two message
//! queue buffers, the registered-variable table, per-core host-visible state
//! flags, the host-published remote timer, and the diagnostics mailbox.
//!
//! There is no cache coherency story beyond what the protocol provides:
//! ordering between cores is established solely by the barrier, and all
//! admission metadata (watermarks, counts) is mutated under a mutex, while
//! bulk copies run lock-free over ranges the protocol guarantees disjoint.

use crate::diag::DiagChannel;
use crate::error::{LockstepError, Result};
use crate::grid::{GlobalAddr, Grid};
use crate::platform::{CoreState, ProcessBarrier, SyncBarrier};
use crate::pool::PayloadPool;
use crate::queue::MessageQueue;
use crate::registry::VariableTable;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

/// Sizing and topology of a shared region
#[derive(Debug, Clone, Copy)]
pub struct RegionConfig {
    /// Mesh rows
    pub rows: usize,
    /// Mesh columns
    pub cols: usize,
    /// Bytes of local arena per core
    pub arena_size: usize,
    /// Tag size in effect for the first superstep
    pub initial_tag_size: usize,
    /// Lifetime maximum registered variables
    pub max_vars: usize,
    /// Per-core, per-superstep request ceiling
    pub max_requests: usize,
    /// Per-superstep message ceiling per queue buffer
    pub max_messages: usize,
    /// Shared payload pool capacity in bytes
    pub payload_capacity: usize,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            rows: 4,
            cols: 4,
            arena_size: 0x8000,
            initial_tag_size: 0,
            max_vars: 64,
            max_requests: 128,
            max_messages: 256,
            payload_capacity: 4096,
        }
    }
}

/// One core's local byte arena
///
/// Owned logically by one core: during a superstep only the owner touches
/// it, except for explicit high-performance transfers (whose races are the
/// caller's contract) and for the sync protocol's copy phases, where the
/// barrier sequence keeps readers and writers apart.
struct CoreArena {
    data: UnsafeCell<Box<[u8]>>,
}

unsafe impl Sync for CoreArena {}

impl CoreArena {
    fn new(size: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![0u8; size].into_boxed_slice()),
        }
    }
}

/// The memory-mapped communication region shared by all cores
pub struct SharedRegion {
    grid: Grid,
    config: RegionConfig,
    arenas: Vec<CoreArena>,
    pool: PayloadPool,
    queues: [MessageQueue; 2],
    variables: VariableTable,
    /// Host-visible per-core state flags
    core_states: Vec<AtomicU8>,
    /// Host-published elapsed time (f32 bit pattern)
    remote_time_bits: AtomicU32,
    diag: DiagChannel,
    barrier: Box<dyn SyncBarrier>,
}

impl SharedRegion {
    /// Create a region with a process-backed barrier for all cores
    pub fn new(config: RegionConfig) -> Arc<Self> {
        let nprocs = config.rows * config.cols;
        Self::with_barrier(config, Box::new(ProcessBarrier::new(nprocs)))
    }

    /// Create a region around an externally provided barrier primitive
    pub fn with_barrier(config: RegionConfig, barrier: Box<dyn SyncBarrier>) -> Arc<Self> {
        let nprocs = config.rows * config.cols;
        Arc::new(Self {
            grid: Grid::new(config.rows, config.cols, config.arena_size),
            config,
            arenas: (0..nprocs).map(|_| CoreArena::new(config.arena_size)).collect(),
            pool: PayloadPool::new(config.payload_capacity),
            queues: [
                MessageQueue::new(config.max_messages),
                MessageQueue::new(config.max_messages),
            ],
            variables: VariableTable::new(config.max_vars, nprocs),
            core_states: (0..nprocs)
                .map(|_| AtomicU8::new(CoreState::Init as u8))
                .collect(),
            remote_time_bits: AtomicU32::new(0f32.to_bits()),
            diag: DiagChannel::new(),
            barrier,
        })
    }

    /// Mesh topology
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Sizing configuration
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Number of participating cores
    pub fn nprocs(&self) -> usize {
        self.grid.nprocs()
    }

    /// Shared payload pool
    pub fn pool(&self) -> &PayloadPool {
        &self.pool
    }

    /// Registered-variable table
    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    /// Diagnostics mailbox (host side consumes from here)
    pub fn diag(&self) -> &DiagChannel {
        &self.diag
    }

    pub(crate) fn queue(&self, index: usize) -> &MessageQueue {
        &self.queues[index]
    }

    pub(crate) fn barrier(&self) -> &dyn SyncBarrier {
        &*self.barrier
    }

    /// Host-visible state of a core
    pub fn core_state(&self, pid: usize) -> CoreState {
        CoreState::from_raw(self.core_states[pid].load(Ordering::Acquire))
    }

    pub(crate) fn set_core_state(&self, pid: usize, state: CoreState) {
        self.core_states[pid].store(state as u8, Ordering::Release);
    }

    /// Host-published elapsed wall clock in seconds
    pub fn remote_time(&self) -> f32 {
        f32::from_bits(self.remote_time_bits.load(Ordering::Acquire))
    }

    /// Host side: publish the controller's elapsed time
    pub fn publish_remote_time(&self, seconds: f32) {
        self.remote_time_bits.store(seconds.to_bits(), Ordering::Release);
    }

    fn check_range(&self, pid: usize, offset: usize, len: usize) -> Result<()> {
        if offset + len > self.config.arena_size {
            return Err(LockstepError::AddressOutOfBounds {
                pid,
                offset,
                len,
                arena: self.config.arena_size,
            });
        }
        Ok(())
    }

    /// Copy out of a core's arena
    ///
    /// Race discipline is the caller's: the owner may read at any time;
    /// other cores only during the sync copy phases or hp transfers.
    pub(crate) fn arena_read(&self, pid: usize, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check_range(pid, offset, dst.len())?;
        if dst.is_empty() {
            return Ok(());
        }
        unsafe {
            let base = (*self.arenas[pid].data.get()).as_ptr();
            std::ptr::copy_nonoverlapping(base.add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    /// Copy into a core's arena
    pub(crate) fn arena_write(&self, pid: usize, offset: usize, src: &[u8]) -> Result<()> {
        self.check_range(pid, offset, src.len())?;
        if src.is_empty() {
            return Ok(());
        }
        unsafe {
            let base = (*self.arenas[pid].data.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(offset), src.len());
        }
        Ok(())
    }

    /// Copy between arenas (sync protocol get phase)
    ///
    /// Uses overlapping-safe copy semantics: source and destination may
    /// alias when a core addresses its own arena.
    pub(crate) fn arena_copy(
        &self,
        src: GlobalAddr,
        dst_pid: usize,
        dst_offset: usize,
        len: usize,
    ) -> Result<()> {
        self.check_range(src.pid(), src.offset(), len)?;
        self.check_range(dst_pid, dst_offset, len)?;
        if len == 0 {
            return Ok(());
        }
        unsafe {
            let src_base = (*self.arenas[src.pid()].data.get()).as_ptr();
            let dst_base = (*self.arenas[dst_pid].data.get()).as_mut_ptr();
            std::ptr::copy(src_base.add(src.offset()), dst_base.add(dst_offset), len);
        }
        Ok(())
    }

    /// Copy a staged pool payload into an arena (sync protocol put phase)
    pub(crate) fn apply_payload(&self, payload: crate::pool::PoolSlice, dst: GlobalAddr) -> Result<()> {
        self.check_range(dst.pid(), dst.offset(), payload.len())?;
        if payload.is_empty() {
            return Ok(());
        }
        unsafe {
            let dst_base = (*self.arenas[dst.pid()].data.get()).as_mut_ptr();
            let src = self.pool.slice(payload);
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst_base.add(dst.offset()), payload.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::LocalAddr;

    fn small_region() -> Arc<SharedRegion> {
        SharedRegion::new(RegionConfig {
            rows: 1,
            cols: 2,
            arena_size: 64,
            payload_capacity: 64,
            ..RegionConfig::default()
        })
    }

    #[test]
    fn test_arena_round_trip() {
        let region = small_region();
        region.arena_write(1, 8, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        region.arena_read(1, 8, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        // The other arena is untouched.
        region.arena_read(0, 8, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 0]);
    }

    #[test]
    fn test_arena_bounds_checked() {
        let region = small_region();
        let err = region.arena_write(0, 62, &[0; 4]).unwrap_err();
        assert!(matches!(err, LockstepError::AddressOutOfBounds { pid: 0, .. }));
    }

    #[test]
    fn test_cross_arena_copy() {
        let region = small_region();
        region.arena_write(0, 0, &[9, 9]).unwrap();
        let src = region.grid().translate(0, 0, LocalAddr::new(0), 0).unwrap();
        region.arena_copy(src, 1, 16, 2).unwrap();
        let mut out = [0u8; 2];
        region.arena_read(1, 16, &mut out).unwrap();
        assert_eq!(out, [9, 9]);
    }

    #[test]
    fn test_core_state_flags() {
        let region = small_region();
        assert_eq!(region.core_state(0), CoreState::Init);
        region.set_core_state(0, CoreState::Run);
        assert_eq!(region.core_state(0), CoreState::Run);
        assert_eq!(region.core_state(1), CoreState::Init);
    }

    #[test]
    fn test_remote_time_publication() {
        let region = small_region();
        assert_eq!(region.remote_time(), 0.0);
        region.publish_remote_time(1.25);
        assert_eq!(region.remote_time(), 1.25);
    }
}
