//! Registered-variable table and cross-core address resolution
//!
//! Registration slots are positional: every core must register the same
//! number of variables, in the same order, for slot `k` on one core to pair
//! with slot `k` on every other. Each core publishes the local address it
//! chose for a slot under its own pid; resolving a remote variable means
//! finding the slot this core registered under the given address and reading
//! the peer core's entry for the same slot.
//!
//! A registration made in superstep `K` becomes resolvable in superstep
//! `K + 1`, when the sync protocol commits the slot counter.

use crate::error::{LockstepError, Result};
use crate::grid::{GlobalAddr, Grid, LocalAddr};
use crate::slots::SharedSlots;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared table of registered variable addresses, indexed `[slot][pid]`
pub struct VariableTable {
    /// `max_vars × nprocs` entries, row-major by slot
    entries: SharedSlots<Option<LocalAddr>>,
    /// Slots committed by the sync protocol; registrations above this index
    /// are not yet visible to resolution
    committed: AtomicUsize,
    max_vars: usize,
    nprocs: usize,
}

impl VariableTable {
    /// Create an empty table with `max_vars` slots for `nprocs` cores
    pub fn new(max_vars: usize, nprocs: usize) -> Self {
        Self {
            entries: SharedSlots::new(None, max_vars * nprocs),
            committed: AtomicUsize::new(0),
            max_vars,
            nprocs,
        }
    }

    /// Lifetime maximum number of registrations
    pub fn max_vars(&self) -> usize {
        self.max_vars
    }

    /// Number of slots visible to resolution
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    /// Publish `addr` as this core's entry for the next uncommitted slot
    ///
    /// The per-superstep single-registration rule is enforced by the caller
    /// (the core context tracks whether it already registered); this only
    /// checks the lifetime ceiling.
    pub fn register(&self, pid: usize, addr: LocalAddr) -> Result<()> {
        let slot = self.committed();
        if slot == self.max_vars {
            return Err(LockstepError::RegistrationOverflow { max: self.max_vars });
        }
        self.entries.set(slot * self.nprocs + pid, Some(addr));
        Ok(())
    }

    /// Commit the pending slot, making this superstep's registrations visible
    ///
    /// Called by core 0 only, inside the sync protocol between barriers, and
    /// only when a registration actually happened this superstep.
    pub fn commit(&self) {
        self.committed.fetch_add(1, Ordering::AcqRel);
    }

    /// Entry a core published for a committed slot
    pub fn entry(&self, slot: usize, pid: usize) -> Option<LocalAddr> {
        self.entries.get(slot * self.nprocs + pid)
    }

    /// Resolve a remote variable to a global address
    ///
    /// Scans this core's committed slots for one registered under `addr`; on
    /// a match, translates the peer core's address for the same slot, shifted
    /// by `byte_offset`. Fails with `InvalidPid` for a target outside the
    /// mesh and `VariableNotFound` when no slot matches or the peer never
    /// registered the matching slot.
    pub fn resolve(
        &self,
        grid: &Grid,
        own_pid: usize,
        target_pid: usize,
        addr: LocalAddr,
        byte_offset: usize,
    ) -> Result<GlobalAddr> {
        if target_pid >= self.nprocs {
            return Err(LockstepError::InvalidPid {
                pid: target_pid,
                nprocs: self.nprocs,
            });
        }
        let not_found = LockstepError::VariableNotFound {
            pid: target_pid,
            addr,
        };
        for slot in 0..self.committed() {
            if self.entry(slot, own_pid) != Some(addr) {
                continue;
            }
            let peer = self.entry(slot, target_pid).ok_or(not_found)?;
            return grid.translate(
                grid.row_of(target_pid),
                grid.col_of(target_pid),
                peer,
                byte_offset,
            );
        }
        Err(not_found)
    }
}
