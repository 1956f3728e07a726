//! Domain entities and state machines shared across every subsystem.
//!
//! `id` defines the strongly typed identifiers, `scope` the internal actor
//! coordinates, `grant` the negotiated permission sets with delta math,
//! `connection`/`credential` the core lifecycle state machines, `sync` the
//! installation/subscription/job machines, and `event` the lifecycle event
//! payload delivered through the outbox.

pub mod connection;
pub mod credential;
pub mod event;
pub mod grant;
pub mod id;
pub mod scope;
pub mod sync;

pub use connection::*;
pub use credential::*;
pub use event::*;
pub use grant::*;
pub use id::*;
pub use scope::*;
pub use sync::*;
