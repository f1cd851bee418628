//! Mesh topology and cross-core address translation
//!
//! Cores are arranged in a logical `rows × cols` mesh; a core's pid is its
//! row-major position. A core never holds a raw pointer into another core's
//! memory: remote locations are described by a [`LocalAddr`] (an offset into
//! the owning core's arena) and turned into a [`GlobalAddr`] by the pure
//! translation function [`Grid::translate`], which validates the offset
//! against the arena size at resolution time.

use crate::error::{LockstepError, Result};

/// An offset into the owning core's local arena
///
/// Opaque handle standing in for a local address. It is meaningful only
/// relative to a specific core's arena and carries no authority by itself;
/// all cross-core use goes through [`Grid::translate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalAddr(u32);

impl LocalAddr {
    /// Create a local address from a byte offset
    pub const fn new(offset: u32) -> Self {
        Self(offset)
    }

    /// Byte offset into the owning core's arena
    pub const fn offset(&self) -> usize {
        self.0 as usize
    }
}

/// A validated reference to a byte range origin in a specific core's arena
///
/// Only produced by [`Grid::translate`]; the length of any transfer through
/// this address is bounds-checked again by the shared region at copy time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalAddr {
    pub(crate) pid: usize,
    pub(crate) offset: usize,
}

impl GlobalAddr {
    /// Core that owns the addressed arena
    pub const fn pid(&self) -> usize {
        self.pid
    }

    /// Byte offset within the owning core's arena
    pub const fn offset(&self) -> usize {
        self.offset
    }
}

/// Logical mesh of cores sharing one communication region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    /// Size in bytes of each core's local arena
    arena_size: usize,
}

impl Grid {
    /// Create a mesh of `rows × cols` cores with `arena_size`-byte arenas
    pub const fn new(rows: usize, cols: usize, arena_size: usize) -> Self {
        Self {
            rows,
            cols,
            arena_size,
        }
    }

    /// Total number of cores in the mesh
    pub const fn nprocs(&self) -> usize {
        self.rows * self.cols
    }

    /// Mesh rows
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Mesh columns
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Bytes per core arena
    pub const fn arena_size(&self) -> usize {
        self.arena_size
    }

    /// Row of a pid (row-major layout)
    #[inline]
    pub const fn row_of(&self, pid: usize) -> usize {
        pid / self.cols
    }

    /// Column of a pid (row-major layout)
    #[inline]
    pub const fn col_of(&self, pid: usize) -> usize {
        pid % self.cols
    }

    /// Pid of a mesh position
    pub fn pid_of(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.rows || col >= self.cols {
            return Err(LockstepError::InvalidGridPosition {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(col + self.cols * row)
    }

    /// Translate a mesh position plus local address into a global address
    ///
    /// Pure function with no side effects. The resulting offset
    /// (`local + byte_offset`) is validated against the arena size; transfers
    /// of a concrete length are re-checked at copy time.
    pub fn translate(
        &self,
        row: usize,
        col: usize,
        local: LocalAddr,
        byte_offset: usize,
    ) -> Result<GlobalAddr> {
        let pid = self.pid_of(row, col)?;
        let offset = local.offset() + byte_offset;
        if offset > self.arena_size {
            return Err(LockstepError::AddressOutOfBounds {
                pid,
                offset,
                len: 0,
                arena: self.arena_size,
            });
        }
        Ok(GlobalAddr { pid, offset })
    }
}
