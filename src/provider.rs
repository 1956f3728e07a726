//! Provider-facing descriptors (data), auth strategies (behavior), and the registry.
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering the
//! provider's default auth kind, capability grant requirements, and
//! inheritance participation. `strategy` defines [`AuthStrategy`], the
//! transport-agnostic hook the lifecycle engine drives to begin, complete,
//! refresh, and revoke credentials. `registry` holds the sorted provider
//! lookup and the strategy resolution order.

pub mod descriptor;
pub mod registry;
pub mod strategy;

pub use descriptor::*;
pub use registry::*;
pub use strategy::*;
