//! # Lockstep - Per-Core BSP Runtime
//!
//! This crate implements the per-processor runtime of a Bulk-Synchronous-
//! Parallel (BSP) machine: many independent cores sharing one memory-mapped
//! communication region, with no cache coherency and no implicit consistency.
//! Every core runs the same program; progress is divided into **supersteps**:
//! local computation plus communication requests, then a global barrier,
//! after which all requested data movement is visible to every core.
//!
//! ## Architecture
//!
//! Ordering between cores is established *solely* by barriers. All admission
//! metadata (pool watermark, queue counts) is mutated under a mutex; bulk
//! copies into reserved ranges run lock-free because reservation guarantees
//! disjoint ranges.
//!
//! ```text
//! superstep K:      compute + register/put/get/send   (per-core, concurrent)
//!   sync:           barrier -> gets -> barrier -> puts -> bookkeeping -> barrier
//! superstep K + 1:  puts visible, K's messages drainable, pool rewound
//! ```
//!
//! - **Registered variables** pair positionally across cores: slot `k` on
//!   one core resolves to slot `k` on every other ([`registry`]).
//! - **Buffered puts** stage their payload in a shared bump arena that is
//!   rewound wholesale once per superstep ([`pool`]); **buffered gets** copy
//!   during sync, before any put, so a get never observes a same-superstep
//!   put.
//! - **Tagged messages** travel through a two-buffer ring with a
//!   one-superstep delivery delay ([`queue`]).
//! - **Diagnostics** relay through a single-slot blocking mailbox to the
//!   host controller ([`diag`]).
//!
//! ## Example
//!
//! ```no_run
//! use lockstep::{CoreContext, LocalAddr, RegionConfig, SharedRegion};
//! use std::thread;
//!
//! let region = SharedRegion::new(RegionConfig { rows: 1, cols: 2, ..RegionConfig::default() });
//! let handles: Vec<_> = (0..2)
//!     .map(|col| {
//!         let region = region.clone();
//!         thread::spawn(move || -> lockstep::Result<()> {
//!             let mut core = CoreContext::begin(region, 0, col)?;
//!             let var = LocalAddr::new(0);
//!             core.register(var, 4)?;
//!             core.sync();
//!
//!             // Each core hands its pid to its right neighbour.
//!             let next = (core.pid() + 1) % core.nprocs();
//!             core.put(next, &(core.pid() as u32).to_le_bytes(), var, 0)?;
//!             core.sync();
//!
//!             let left: u32 = core.local_load(var)?;
//!             println!("core {} received {}", core.pid(), left);
//!             core.end();
//!             Ok(())
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap().unwrap();
//! }
//! ```

pub mod context;
pub mod diag;
pub mod error;
pub mod grid;
pub mod platform;
pub mod pool;
pub mod queue;
pub mod region;
pub mod registry;
pub mod request;
pub mod slots;

pub use context::{CoreContext, MessageRef};
pub use diag::{DiagChannel, DiagRecord, DIAG_BUFFER_LEN};
pub use error::{LockstepError, Result};
pub use grid::{GlobalAddr, Grid, LocalAddr};
pub use platform::{CoreState, CountdownTimer, CycleTimer, ProcessBarrier, SyncBarrier};
pub use pool::{PayloadPool, PoolSlice};
pub use queue::{MessageQueue, QueuePhase};
pub use region::{RegionConfig, SharedRegion};
pub use registry::VariableTable;
pub use request::{DataRequest, RequestTable};
