//! Persistence contracts and built-in in-memory implementations.
//!
//! Every contract returns boxed [`StoreFuture`] values so backends are free to
//! be truly asynchronous; the bundled [`memory`] implementations back local
//! development and the test suites. Concrete relational backends live outside
//! this crate.

pub mod memory;

pub use memory::*;

// self
use crate::{
	_prelude::*,
	domain::{
		CheckpointId, ConflictId, Connection, ConnectionId, ConnectionIdentity, Credential,
		CredentialId, EventId, GrantEvent, GrantSnapshot, LifecycleEvent, ProviderId, Scope,
		SyncBindingId, SyncDirection,
	},
	error::ErrorCategory,
	mapping::MappingSpec,
	sync::{SyncCheckpoint, SyncChangeLogEntry, SyncConflict},
};

/// Boxed future returned by store contracts.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Error type produced by store implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A unique index rejected the write.
	#[error("Constraint violation: {message}.")]
	Constraint {
		/// Human-readable error payload.
		message: String,
	},
}
impl From<StoreError> for ServiceError {
	fn from(value: StoreError) -> Self {
		let category = match &value {
			StoreError::Constraint { .. } => ErrorCategory::Conflict,
			_ => ErrorCategory::Internal,
		};

		ServiceError::new(category, value.to_string()).with_location("store")
	}
}

/// Persistence contract for connections.
///
/// Implementations enforce the (provider, scope, external account) unique
/// index; a save whose identity collides with a different connection id fails
/// with [`StoreError::Constraint`].
pub trait ConnectionStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces a connection.
	fn save(&self, connection: Connection) -> StoreFuture<'_, ()>;

	/// Fetches a connection by id.
	fn get<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>>;

	/// Fetches a connection by its unique identity tuple.
	fn find_by_identity<'a>(
		&'a self,
		identity: &'a ConnectionIdentity,
	) -> StoreFuture<'a, Option<Connection>>;

	/// Lists connections for a (provider, scope) pair.
	fn list<'a>(
		&'a self,
		provider_id: &'a ProviderId,
		scope: &'a Scope,
	) -> StoreFuture<'a, Vec<Connection>>;
}

/// Persistence contract for credential versions.
///
/// Implementations enforce at most one active credential per connection:
/// persisting a new active version revokes the previous one in the same write.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists a new credential version, superseding any active one.
	fn save_new_version(&self, credential: Credential) -> StoreFuture<'_, ()>;

	/// Replaces an existing credential row (status changes).
	fn update(&self, credential: Credential) -> StoreFuture<'_, ()>;

	/// Fetches a credential by id.
	fn get<'a>(&'a self, id: &'a CredentialId) -> StoreFuture<'a, Option<Credential>>;

	/// Fetches the active credential for a connection, if any.
	fn active_for<'a>(
		&'a self,
		connection_id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<Credential>>;

	/// Returns the highest persisted version for a connection (0 when none).
	fn latest_version<'a>(&'a self, connection_id: &'a ConnectionId) -> StoreFuture<'a, u32>;
}

/// Persistence contract for the grant journal.
pub trait GrantStore
where
	Self: Send + Sync,
{
	/// Appends a snapshot and its event in one transaction where possible.
	fn append(&self, snapshot: GrantSnapshot, event: GrantEvent) -> StoreFuture<'_, ()>;

	/// Fetches the latest snapshot for a connection.
	fn latest_snapshot<'a>(
		&'a self,
		connection_id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<GrantSnapshot>>;

	/// Returns the full journal for a connection, ordered by version.
	fn history<'a>(
		&'a self,
		connection_id: &'a ConnectionId,
	) -> StoreFuture<'a, (Vec<GrantSnapshot>, Vec<GrantEvent>)>;
}

/// Persistence contract for sync checkpoints.
pub trait CheckpointStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces a checkpoint.
	fn save(&self, checkpoint: SyncCheckpoint) -> StoreFuture<'_, ()>;

	/// Fetches a checkpoint by id.
	fn get<'a>(&'a self, id: &'a CheckpointId) -> StoreFuture<'a, Option<SyncCheckpoint>>;

	/// Fetches the latest checkpoint per (provider, scope, binding, direction).
	fn latest<'a>(
		&'a self,
		provider_id: &'a ProviderId,
		scope: &'a Scope,
		sync_binding_id: &'a SyncBindingId,
		direction: SyncDirection,
	) -> StoreFuture<'a, Option<SyncCheckpoint>>;
}

/// Persistence contract for the idempotent sync change log.
pub trait ChangeLogStore
where
	Self: Send + Sync,
{
	/// Appends an entry; returns false when the idempotency key already exists.
	fn append(&self, entry: SyncChangeLogEntry) -> StoreFuture<'_, bool>;

	/// Lists entries for a binding, in append order.
	fn entries<'a>(
		&'a self,
		sync_binding_id: &'a SyncBindingId,
	) -> StoreFuture<'a, Vec<SyncChangeLogEntry>>;
}

/// Persistence contract for the conflict ledger.
pub trait ConflictStore
where
	Self: Send + Sync,
{
	/// Appends a new conflict.
	fn append(&self, conflict: SyncConflict) -> StoreFuture<'_, ()>;

	/// Fetches a conflict by id.
	fn get<'a>(&'a self, id: &'a ConflictId) -> StoreFuture<'a, Option<SyncConflict>>;

	/// Replaces an existing conflict row.
	fn update(&self, conflict: SyncConflict) -> StoreFuture<'_, ()>;

	/// Lists conflicts for a binding, in append order.
	fn list<'a>(
		&'a self,
		sync_binding_id: &'a SyncBindingId,
	) -> StoreFuture<'a, Vec<SyncConflict>>;
}

/// Persistence contract for mapping specifications.
pub trait MappingSpecStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces a spec version. Published versions are immutable;
	/// attempting to overwrite one fails with [`StoreError::Constraint`].
	fn save(&self, spec: MappingSpec) -> StoreFuture<'_, ()>;

	/// Fetches a specific spec version.
	fn get<'a>(
		&'a self,
		spec_id: &'a crate::domain::MappingSpecId,
		version: u32,
	) -> StoreFuture<'a, Option<MappingSpec>>;

	/// Fetches the highest version of a spec.
	fn latest<'a>(
		&'a self,
		spec_id: &'a crate::domain::MappingSpecId,
	) -> StoreFuture<'a, Option<MappingSpec>>;
}

/// Persistence contract for the lifecycle outbox.
pub trait OutboxStore
where
	Self: Send + Sync,
{
	/// Enqueues an event for delivery.
	fn enqueue(&self, event: LifecycleEvent) -> StoreFuture<'_, ()>;

	/// Claims up to `limit` due events, marking them in flight.
	fn claim_batch(&self, limit: usize, now: OffsetDateTime)
	-> StoreFuture<'_, Vec<LifecycleEvent>>;

	/// Acknowledges a delivered event, removing it from the outbox.
	fn ack<'a>(&'a self, id: &'a EventId) -> StoreFuture<'a, ()>;

	/// Returns a claimed event to the queue.
	///
	/// `next_attempt_at = None` marks the event terminally failed; a concrete
	/// instant schedules the next delivery attempt.
	fn retry(
		&self,
		event: LifecycleEvent,
		next_attempt_at: Option<OffsetDateTime>,
	) -> StoreFuture<'_, ()>;
}

/// Guard representing exclusive ownership of a connection-scoped lock.
///
/// Dropping the guard releases the lock.
pub struct ConnectionLockGuard {
	release: Option<Box<dyn FnOnce() + Send>>,
}
impl ConnectionLockGuard {
	/// Creates a guard around a release closure.
	pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
		Self { release: Some(Box::new(release)) }
	}
}
impl Drop for ConnectionLockGuard {
	fn drop(&mut self) {
		if let Some(release) = self.release.take() {
			release();
		}
	}
}
impl Debug for ConnectionLockGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ConnectionLockGuard(..)")
	}
}

/// Per-connection exclusivity used by refresh and reconsent flows.
pub trait ConnectionLocker
where
	Self: Send + Sync,
{
	/// Attempts to acquire the lock; `None` when it is already held.
	fn try_lock<'a>(
		&'a self,
		connection_id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<ConnectionLockGuard>>;
}
