//! Optional observability helpers plus the sensitive-metadata redaction chokepoint.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `integration_hub.op` with the `op`
//!   (operation) and `stage` (call site) fields.
//! - Enable `metrics` to increment the `integration_hub_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.
//!
//! Redaction is always available: [`redact_sensitive_map`] must be applied to any
//! metadata map before it reaches logs, events, or error envelopes.

mod metrics;
mod redact;
mod tracing;

pub use metrics::*;
pub use redact::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operation kinds observed by the service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Connect flow (authorization begin).
	Connect,
	/// OAuth callback completion.
	Callback,
	/// Reconsent begin/completion.
	Reconsent,
	/// Credential refresh.
	Refresh,
	/// Connection revocation.
	Revoke,
	/// Outbound provider operation.
	ProviderOperation,
	/// Mapping compile or preview.
	MappingCompile,
	/// Sync plan/run.
	SyncRun,
	/// Conflict ledger mutation.
	SyncConflict,
	/// Outbox dispatch batch.
	OutboxDispatch,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Connect => "connect",
			OpKind::Callback => "callback",
			OpKind::Reconsent => "reconsent",
			OpKind::Refresh => "refresh",
			OpKind::Revoke => "revoke",
			OpKind::ProviderOperation => "provider_operation",
			OpKind::MappingCompile => "mapping_compile",
			OpKind::SyncRun => "sync_run",
			OpKind::SyncConflict => "sync_conflict",
			OpKind::OutboxDispatch => "outbox_dispatch",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to a service operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
