//! Thread-safe in-memory store implementations for local development and tests.

// std
use std::collections::HashSet;
// self
use crate::{
	_prelude::*,
	domain::{
		CheckpointId, ConflictId, Connection, ConnectionId, ConnectionIdentity, Credential,
		CredentialId, CredentialStatus, EventId, GrantEvent, GrantSnapshot, LifecycleEvent,
		MappingSpecId, ProviderId, Scope, SyncBindingId, SyncDirection,
	},
	mapping::{MappingSpec, MappingSpecStatus},
	store::{
		ChangeLogStore, CheckpointStore, ConflictStore, ConnectionLockGuard, ConnectionLocker,
		ConnectionStore, CredentialStore, GrantStore, MappingSpecStore, OutboxStore, StoreError,
		StoreFuture,
	},
	sync::{SyncCheckpoint, SyncChangeLogEntry, SyncConflict},
};

/// In-memory [`ConnectionStore`].
#[derive(Debug, Default)]
pub struct MemoryConnectionStore(RwLock<HashMap<ConnectionId, Connection>>);
impl MemoryConnectionStore {
	fn save_now(&self, connection: Connection) -> Result<(), StoreError> {
		let mut map = self.0.write();
		let identity = connection.identity();

		if map.values().any(|existing| {
			existing.id != connection.id && existing.identity() == identity
		}) {
			return Err(StoreError::Constraint {
				message: format!(
					"connection identity already exists: {}/{}/{}",
					identity.provider_id, identity.scope, identity.external_account_id,
				),
			});
		}

		map.insert(connection.id.clone(), connection);

		Ok(())
	}
}
impl ConnectionStore for MemoryConnectionStore {
	fn save(&self, connection: Connection) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.save_now(connection) })
	}

	fn get<'a>(&'a self, id: &'a ConnectionId) -> StoreFuture<'a, Option<Connection>> {
		Box::pin(async move { Ok(self.0.read().get(id).cloned()) })
	}

	fn find_by_identity<'a>(
		&'a self,
		identity: &'a ConnectionIdentity,
	) -> StoreFuture<'a, Option<Connection>> {
		Box::pin(async move {
			Ok(self.0.read().values().find(|conn| conn.identity() == *identity).cloned())
		})
	}

	fn list<'a>(
		&'a self,
		provider_id: &'a ProviderId,
		scope: &'a Scope,
	) -> StoreFuture<'a, Vec<Connection>> {
		Box::pin(async move {
			let mut matches: Vec<Connection> = self
				.0
				.read()
				.values()
				.filter(|conn| conn.provider_id.matches(provider_id) && conn.scope == *scope)
				.cloned()
				.collect();

			matches.sort_by(|lhs, rhs| lhs.id.cmp(&rhs.id));

			Ok(matches)
		})
	}
}

/// In-memory [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryCredentialStore(RwLock<HashMap<CredentialId, Credential>>);
impl MemoryCredentialStore {
	fn save_new_version_now(&self, credential: Credential) -> Result<(), StoreError> {
		let mut map = self.0.write();

		for existing in map.values_mut() {
			if existing.connection_id == credential.connection_id
				&& existing.status == CredentialStatus::Active
			{
				existing.status = CredentialStatus::Revoked;
			}
		}

		map.insert(credential.id.clone(), credential);

		Ok(())
	}
}
impl CredentialStore for MemoryCredentialStore {
	fn save_new_version(&self, credential: Credential) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.save_new_version_now(credential) })
	}

	fn update(&self, credential: Credential) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().insert(credential.id.clone(), credential);

			Ok(())
		})
	}

	fn get<'a>(&'a self, id: &'a CredentialId) -> StoreFuture<'a, Option<Credential>> {
		Box::pin(async move { Ok(self.0.read().get(id).cloned()) })
	}

	fn active_for<'a>(
		&'a self,
		connection_id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<Credential>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.values()
				.find(|cred| {
					cred.connection_id == *connection_id
						&& cred.status == CredentialStatus::Active
				})
				.cloned())
		})
	}

	fn latest_version<'a>(&'a self, connection_id: &'a ConnectionId) -> StoreFuture<'a, u32> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.values()
				.filter(|cred| cred.connection_id == *connection_id)
				.map(|cred| cred.version)
				.max()
				.unwrap_or(0))
		})
	}
}

type GrantJournal = (Vec<GrantSnapshot>, Vec<GrantEvent>);

/// In-memory [`GrantStore`].
#[derive(Debug, Default)]
pub struct MemoryGrantStore(RwLock<HashMap<ConnectionId, GrantJournal>>);
impl MemoryGrantStore {
	fn append_now(&self, snapshot: GrantSnapshot, event: GrantEvent) -> Result<(), StoreError> {
		let mut map = self.0.write();
		let journal = map.entry(snapshot.connection_id.clone()).or_default();

		if journal.0.iter().any(|existing| existing.version == snapshot.version) {
			return Err(StoreError::Constraint {
				message: format!(
					"grant snapshot version {} already exists for {}",
					snapshot.version, snapshot.connection_id,
				),
			});
		}

		journal.0.push(snapshot);
		journal.1.push(event);

		Ok(())
	}
}
impl GrantStore for MemoryGrantStore {
	fn append(&self, snapshot: GrantSnapshot, event: GrantEvent) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.append_now(snapshot, event) })
	}

	fn latest_snapshot<'a>(
		&'a self,
		connection_id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<GrantSnapshot>> {
		Box::pin(async move {
			Ok(self.0.read().get(connection_id).and_then(|journal| {
				journal.0.iter().max_by_key(|snapshot| snapshot.version).cloned()
			}))
		})
	}

	fn history<'a>(&'a self, connection_id: &'a ConnectionId) -> StoreFuture<'a, GrantJournal> {
		Box::pin(async move {
			let mut journal = self.0.read().get(connection_id).cloned().unwrap_or_default();

			journal.0.sort_by_key(|snapshot| snapshot.version);
			journal.1.sort_by_key(|event| event.version);

			Ok(journal)
		})
	}
}

/// In-memory [`CheckpointStore`].
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore(RwLock<HashMap<CheckpointId, SyncCheckpoint>>);
impl CheckpointStore for MemoryCheckpointStore {
	fn save(&self, checkpoint: SyncCheckpoint) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().insert(checkpoint.id.clone(), checkpoint);

			Ok(())
		})
	}

	fn get<'a>(&'a self, id: &'a CheckpointId) -> StoreFuture<'a, Option<SyncCheckpoint>> {
		Box::pin(async move { Ok(self.0.read().get(id).cloned()) })
	}

	fn latest<'a>(
		&'a self,
		provider_id: &'a ProviderId,
		scope: &'a Scope,
		sync_binding_id: &'a SyncBindingId,
		direction: SyncDirection,
	) -> StoreFuture<'a, Option<SyncCheckpoint>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.values()
				.filter(|checkpoint| {
					checkpoint.provider_id.matches(provider_id)
						&& checkpoint.scope == *scope
						&& checkpoint.sync_binding_id == *sync_binding_id
						&& checkpoint.direction == direction
				})
				.max_by_key(|checkpoint| checkpoint.sequence)
				.cloned())
		})
	}
}

#[derive(Debug, Default)]
struct ChangeLogInner {
	entries: Vec<SyncChangeLogEntry>,
	keys: HashSet<String>,
}

/// In-memory [`ChangeLogStore`].
#[derive(Debug, Default)]
pub struct MemoryChangeLogStore(RwLock<ChangeLogInner>);
impl MemoryChangeLogStore {
	/// Total number of persisted entries, across bindings.
	pub fn len(&self) -> usize {
		self.0.read().entries.len()
	}

	/// Returns true when the log is empty.
	pub fn is_empty(&self) -> bool {
		self.0.read().entries.is_empty()
	}
}
impl ChangeLogStore for MemoryChangeLogStore {
	fn append(&self, entry: SyncChangeLogEntry) -> StoreFuture<'_, bool> {
		Box::pin(async move {
			let mut inner = self.0.write();

			if !inner.keys.insert(entry.idempotency_key.clone()) {
				return Ok(false);
			}

			inner.entries.push(entry);

			Ok(true)
		})
	}

	fn entries<'a>(
		&'a self,
		sync_binding_id: &'a SyncBindingId,
	) -> StoreFuture<'a, Vec<SyncChangeLogEntry>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.entries
				.iter()
				.filter(|entry| entry.sync_binding_id == *sync_binding_id)
				.cloned()
				.collect())
		})
	}
}

/// In-memory [`ConflictStore`].
#[derive(Debug, Default)]
pub struct MemoryConflictStore(RwLock<Vec<SyncConflict>>);
impl ConflictStore for MemoryConflictStore {
	fn append(&self, conflict: SyncConflict) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().push(conflict);

			Ok(())
		})
	}

	fn get<'a>(&'a self, id: &'a ConflictId) -> StoreFuture<'a, Option<SyncConflict>> {
		Box::pin(async move {
			Ok(self.0.read().iter().find(|conflict| conflict.id == *id).cloned())
		})
	}

	fn update(&self, conflict: SyncConflict) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut conflicts = self.0.write();

			match conflicts.iter_mut().find(|existing| existing.id == conflict.id) {
				Some(existing) => {
					*existing = conflict;

					Ok(())
				},
				None => Err(StoreError::Backend {
					message: format!("conflict does not exist: {}", conflict.id),
				}),
			}
		})
	}

	fn list<'a>(
		&'a self,
		sync_binding_id: &'a SyncBindingId,
	) -> StoreFuture<'a, Vec<SyncConflict>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.iter()
				.filter(|conflict| conflict.sync_binding_id == *sync_binding_id)
				.cloned()
				.collect())
		})
	}
}

/// In-memory [`MappingSpecStore`].
#[derive(Debug, Default)]
pub struct MemoryMappingSpecStore(RwLock<HashMap<(MappingSpecId, u32), MappingSpec>>);
impl MappingSpecStore for MemoryMappingSpecStore {
	fn save(&self, spec: MappingSpec) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut map = self.0.write();
			let key = (spec.spec_id.clone(), spec.version);

			if let Some(existing) = map.get(&key) {
				if existing.status == MappingSpecStatus::Published {
					return Err(StoreError::Constraint {
						message: format!(
							"mapping spec {} v{} is published and immutable",
							spec.spec_id, spec.version,
						),
					});
				}
			}

			map.insert(key, spec);

			Ok(())
		})
	}

	fn get<'a>(
		&'a self,
		spec_id: &'a MappingSpecId,
		version: u32,
	) -> StoreFuture<'a, Option<MappingSpec>> {
		Box::pin(async move { Ok(self.0.read().get(&(spec_id.clone(), version)).cloned()) })
	}

	fn latest<'a>(&'a self, spec_id: &'a MappingSpecId) -> StoreFuture<'a, Option<MappingSpec>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.values()
				.filter(|spec| spec.spec_id == *spec_id)
				.max_by_key(|spec| spec.version)
				.cloned())
		})
	}
}

#[derive(Debug)]
struct OutboxRow {
	event: LifecycleEvent,
	next_attempt_at: OffsetDateTime,
	in_flight: bool,
	failed: bool,
}

/// In-memory [`OutboxStore`].
#[derive(Debug, Default)]
pub struct MemoryOutboxStore(Mutex<Vec<OutboxRow>>);
impl MemoryOutboxStore {
	/// Number of events still awaiting delivery (excluding terminal failures).
	pub fn pending_len(&self) -> usize {
		self.0.lock().iter().filter(|row| !row.failed).count()
	}

	/// Number of terminally failed events.
	pub fn failed_len(&self) -> usize {
		self.0.lock().iter().filter(|row| row.failed).count()
	}

	/// Returns the scheduled next attempt for an event, for test assertions.
	pub fn next_attempt_at(&self, id: &EventId) -> Option<OffsetDateTime> {
		self.0
			.lock()
			.iter()
			.find(|row| row.event.id == *id)
			.map(|row| row.next_attempt_at)
	}
}
impl OutboxStore for MemoryOutboxStore {
	fn enqueue(&self, event: LifecycleEvent) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let next_attempt_at = event.occurred_at;

			self.0.lock().push(OutboxRow { event, next_attempt_at, in_flight: false, failed: false });

			Ok(())
		})
	}

	fn claim_batch(
		&self,
		limit: usize,
		now: OffsetDateTime,
	) -> StoreFuture<'_, Vec<LifecycleEvent>> {
		Box::pin(async move {
			let mut rows = self.0.lock();
			let mut claimed = Vec::new();

			for row in rows.iter_mut() {
				if claimed.len() >= limit {
					break;
				}
				if !row.in_flight && !row.failed && row.next_attempt_at <= now {
					row.in_flight = true;
					claimed.push(row.event.clone());
				}
			}

			Ok(claimed)
		})
	}

	fn ack<'a>(&'a self, id: &'a EventId) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.0.lock().retain(|row| row.event.id != *id);

			Ok(())
		})
	}

	fn retry(
		&self,
		event: LifecycleEvent,
		next_attempt_at: Option<OffsetDateTime>,
	) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut rows = self.0.lock();

			match rows.iter_mut().find(|row| row.event.id == event.id) {
				Some(row) => {
					row.in_flight = false;

					match next_attempt_at {
						Some(instant) => {
							row.event = event;
							row.next_attempt_at = instant;
						},
						None => {
							row.event = event;
							row.failed = true;
						},
					}

					Ok(())
				},
				None => Err(StoreError::Backend {
					message: format!("outbox event does not exist: {}", event.id),
				}),
			}
		})
	}
}

/// In-memory [`ConnectionLocker`] backed by a held-lock set.
#[derive(Debug, Default)]
pub struct MemoryConnectionLocker(Arc<Mutex<HashSet<ConnectionId>>>);
impl ConnectionLocker for MemoryConnectionLocker {
	fn try_lock<'a>(
		&'a self,
		connection_id: &'a ConnectionId,
	) -> StoreFuture<'a, Option<ConnectionLockGuard>> {
		Box::pin(async move {
			let mut held = self.0.lock();

			if !held.insert(connection_id.clone()) {
				return Ok(None);
			}

			drop(held);

			let set = self.0.clone();
			let id = connection_id.clone();

			Ok(Some(ConnectionLockGuard::new(move || {
				set.lock().remove(&id);
			})))
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::domain::ExternalAccountId;

	fn connection(id: &str, account: &str) -> Connection {
		Connection::new(
			ConnectionId::new(id).expect("Connection fixture should be valid."),
			ProviderId::new("github").expect("Provider fixture should be valid."),
			Scope::user("u1").expect("Scope fixture should be valid."),
			ExternalAccountId::new(account).expect("Account fixture should be valid."),
			macros::datetime!(2026-01-01 00:00 UTC),
		)
	}

	#[tokio::test]
	async fn connection_identity_is_unique() {
		let store = MemoryConnectionStore::default();

		store.save(connection("c1", "acct-1")).await.expect("First save should succeed.");
		store.save(connection("c2", "acct-2")).await.expect("Distinct account should succeed.");

		let err = store
			.save(connection("c3", "acct-1"))
			.await
			.expect_err("Duplicate identity must be rejected.");

		assert!(matches!(err, StoreError::Constraint { .. }));
		// Re-saving the same row is an update, not a violation.
		store.save(connection("c1", "acct-1")).await.expect("Upsert should succeed.");
	}

	#[tokio::test]
	async fn at_most_one_credential_stays_active() {
		use crate::{
			domain::{AuthKind, GrantSet},
			secret::{AesGcmSecretProvider, CredentialPayload, SecretProvider, encode_credential_payload},
		};

		let provider =
			AesGcmSecretProvider::new(&[1_u8; 32]).expect("Key fixture should be accepted.");
		let store = MemoryCredentialStore::default();
		let connection_id = ConnectionId::new("c1").expect("Connection fixture should be valid.");
		let credential = |id: &str, version: u32| Credential {
			id: CredentialId::new(id).expect("Credential fixture should be valid."),
			connection_id: connection_id.clone(),
			version,
			envelope: encode_credential_payload(
				&provider as &dyn SecretProvider,
				&CredentialPayload::bearer("tok"),
			)
			.expect("Payload should seal."),
			auth_kind: AuthKind::Oauth2AuthCode,
			token_type: Some("bearer".into()),
			requested_grants: GrantSet::default(),
			granted_grants: GrantSet::default(),
			expires_at: None,
			refreshable: true,
			rotates_at: None,
			status: CredentialStatus::Active,
			created_at: macros::datetime!(2026-01-01 00:00 UTC),
		};

		store.save_new_version(credential("cred-1", 1)).await.expect("Save should succeed.");
		store.save_new_version(credential("cred-2", 2)).await.expect("Save should succeed.");

		let active = store
			.active_for(&connection_id)
			.await
			.expect("Lookup should succeed.")
			.expect("One credential should remain active.");

		assert_eq!(active.version, 2);
		assert_eq!(
			store
				.get(&CredentialId::new("cred-1").expect("Credential fixture should be valid."))
				.await
				.expect("Lookup should succeed.")
				.expect("Superseded credential should still exist.")
				.status,
			CredentialStatus::Revoked,
		);
		assert_eq!(store.latest_version(&connection_id).await.expect("Lookup should succeed."), 2);
	}

	#[tokio::test]
	async fn locker_is_exclusive_until_guard_drops() {
		let locker = MemoryConnectionLocker::default();
		let id = ConnectionId::new("c1").expect("Connection fixture should be valid.");
		let guard = locker
			.try_lock(&id)
			.await
			.expect("Lock attempt should succeed.")
			.expect("First lock should be granted.");

		assert!(locker.try_lock(&id).await.expect("Lock attempt should succeed.").is_none());

		drop(guard);

		assert!(locker.try_lock(&id).await.expect("Lock attempt should succeed.").is_some());
	}
}
