//! Error types for the lockstep runtime
//!
//! Every condition here is locally detected and non-fatal: the offending
//! operation is abandoned with no partial writes to shared state, and the
//! calling core continues past the failed call. Overflow conditions are
//! capacity-planning errors for the caller, not transient faults; nothing
//! in this layer retries.

use crate::grid::LocalAddr;
use thiserror::Error;

/// Result type for lockstep runtime operations
pub type Result<T> = std::result::Result<T, LockstepError>;

/// Errors surfaced by the per-core BSP runtime
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockstepError {
    /// A core may register at most one variable per superstep
    #[error("core {pid} already registered a variable this superstep")]
    MultipleRegistration { pid: usize },

    /// The global registration table is full
    #[error("registration table full: {max} slots in use")]
    RegistrationOverflow { max: usize },

    /// No registration slot of this core matches the given local address
    #[error("no registered variable at {addr:?} targeting core {pid}")]
    VariableNotFound { pid: usize, addr: LocalAddr },

    /// Target core id outside the mesh
    #[error("core id {pid} outside mesh of {nprocs} cores")]
    InvalidPid { pid: usize, nprocs: usize },

    /// The per-superstep request table is full (get side)
    #[error("too many get requests this superstep: capacity {capacity}")]
    GetRequestOverflow { capacity: usize },

    /// The per-superstep request table is full (put side)
    #[error("too many put requests this superstep: capacity {capacity}")]
    PutRequestOverflow { capacity: usize },

    /// The shared payload pool cannot admit the put payload
    #[error("put payload overflow: requested {requested} bytes, {available} available")]
    PutPayloadOverflow { requested: usize, available: usize },

    /// The active message queue cannot admit the message
    #[error("send overflow: {messages} messages queued, {requested} payload bytes requested, {available} pool bytes available")]
    SendOverflow {
        messages: usize,
        requested: usize,
        available: usize,
    },

    /// A resolved or translated address falls outside the target core's arena
    #[error("address out of bounds on core {pid}: offset {offset} + len {len} > arena size {arena}")]
    AddressOutOfBounds {
        pid: usize,
        offset: usize,
        len: usize,
        arena: usize,
    },

    /// Grid coordinates outside the configured mesh
    #[error("grid position ({row}, {col}) outside {rows}x{cols} mesh")]
    InvalidGridPosition {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = LockstepError::VariableNotFound {
            pid: 3,
            addr: LocalAddr::new(0x40),
        };
        assert!(err.to_string().contains('3'));

        let err = LockstepError::PutPayloadOverflow {
            requested: 512,
            available: 16,
        };
        assert!(err.to_string().contains("512"));
        assert!(err.to_string().contains("16"));

        let err = LockstepError::SendOverflow {
            messages: 8,
            requested: 64,
            available: 0,
        };
        assert!(err.to_string().contains("64"));
    }
}
