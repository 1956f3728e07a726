//! Single-use token ledgers backing the auth lifecycle.
//!
//! `oauth_state` holds the callback-state ledger consumed exactly once per
//! authorization round-trip; `replay` holds the generic replay ledger used to
//! fence webhook and callback replays. Both in-memory implementations are
//! bounded maps guarded by a single mutex, evicting the entry with the
//! earliest expiry when capacity is reached.

pub mod oauth_state;
pub mod replay;

pub use oauth_state::*;
pub use replay::*;
