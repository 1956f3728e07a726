//! Sync subsystem: checkpoints, planner, executor, and the conflict ledger.
//!
//! `checkpoint` defines the monotonic positions and idempotency key math,
//! `plan` the deterministic run planner, `executor` the checkpoint-advancing
//! run loop, and `conflict` the policy-hooked conflict ledger. The planner,
//! executor, and ledger operations hang off the [`Service`](crate::flows::Service)
//! façade as impl blocks.

pub mod checkpoint;
pub mod conflict;
pub mod executor;
pub mod plan;

pub use checkpoint::*;
pub use conflict::*;
pub use executor::*;
pub use plan::*;
