//! Sync checkpoints, the idempotent change log entry, and key derivation.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	domain::{CheckpointId, ConnectionId, ProviderId, Scope, SyncBindingId, SyncDirection},
};

/// Monotonic position in a sync stream per (binding, direction).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
	/// Checkpoint identifier.
	pub id: CheckpointId,
	/// Provider the stream belongs to.
	pub provider_id: ProviderId,
	/// Internal actor the stream is for.
	pub scope: Scope,
	/// Connection the stream rides on, when credentialed.
	pub connection_id: Option<ConnectionId>,
	/// Binding the stream belongs to.
	pub sync_binding_id: SyncBindingId,
	/// Stream direction.
	pub direction: SyncDirection,
	/// Opaque provider cursor.
	pub cursor: Option<String>,
	/// Strictly monotonic sequence per (binding, direction).
	pub sequence: u64,
	/// Source schema/data version last observed.
	pub source_version: Option<String>,
	/// Seed mixed into derived idempotency keys.
	pub idempotency_seed: String,
}
impl SyncCheckpoint {
	/// Synthesizes an empty checkpoint at sequence zero.
	pub fn empty(
		id: CheckpointId,
		provider_id: ProviderId,
		scope: Scope,
		sync_binding_id: SyncBindingId,
		direction: SyncDirection,
	) -> Self {
		let idempotency_seed =
			build_idempotency_seed(&sync_binding_id, direction, None, None);

		Self {
			id,
			provider_id,
			scope,
			connection_id: None,
			sync_binding_id,
			direction,
			cursor: None,
			sequence: 0,
			source_version: None,
			idempotency_seed,
		}
	}

	/// Latest-per key: (provider, scope, binding, direction).
	pub fn stream_key(&self) -> (ProviderId, Scope, SyncBindingId, SyncDirection) {
		(
			self.provider_id.clone(),
			self.scope.clone(),
			self.sync_binding_id.clone(),
			self.direction,
		)
	}
}

/// One idempotently applied change in a sync run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChangeLogEntry {
	/// Binding the change belongs to.
	pub sync_binding_id: SyncBindingId,
	/// Stream direction.
	pub direction: SyncDirection,
	/// Identifier of the external record.
	pub external_id: String,
	/// Source version the change was observed at.
	pub source_version: Option<String>,
	/// Unique deduplication key.
	pub idempotency_key: String,
	/// Redacted change payload.
	pub payload: Json,
	/// Redacted change metadata.
	pub metadata: BTreeMap<String, Json>,
	/// Instant the change occurred.
	pub occurred_at: OffsetDateTime,
}

/// Derives the deterministic idempotency key for one change.
///
/// The key is direction-sensitive and source-version-aware: import and export
/// of the same (binding, external id, version) produce different keys, and the
/// same payload under a new source version produces a new key. An absent
/// version contributes the `_` placeholder.
pub fn build_sync_idempotency_key(
	sync_binding_id: &SyncBindingId,
	direction: SyncDirection,
	external_id: &str,
	source_version: Option<&str>,
) -> String {
	let version = match source_version {
		Some(version) if !version.is_empty() => version,
		_ => "_",
	};
	let preimage =
		format!("{sync_binding_id}|{}|{external_id}|{version}", direction.as_str());

	hex::encode(Sha256::digest(preimage.as_bytes()))
}

/// Derives the plan-level idempotency seed from the checkpoint position.
pub fn build_idempotency_seed(
	sync_binding_id: &SyncBindingId,
	direction: SyncDirection,
	cursor: Option<&str>,
	source_version: Option<&str>,
) -> String {
	let preimage = format!(
		"{sync_binding_id}|{}|{}|{}",
		direction.as_str(),
		cursor.unwrap_or(""),
		source_version.unwrap_or(""),
	);

	hex::encode(Sha256::digest(preimage.as_bytes()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn binding() -> SyncBindingId {
		SyncBindingId::new("bind-1").expect("Binding fixture should be valid.")
	}

	#[test]
	fn idempotency_key_is_deterministic() {
		let lhs =
			build_sync_idempotency_key(&binding(), SyncDirection::Import, "ext_1", Some("v1"));
		let rhs =
			build_sync_idempotency_key(&binding(), SyncDirection::Import, "ext_1", Some("v1"));

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.len(), 64);
	}

	#[test]
	fn idempotency_key_is_direction_sensitive() {
		let import =
			build_sync_idempotency_key(&binding(), SyncDirection::Import, "ext_1", Some("v1"));
		let export =
			build_sync_idempotency_key(&binding(), SyncDirection::Export, "ext_1", Some("v1"));

		assert_ne!(import, export);
	}

	#[test]
	fn idempotency_key_is_source_version_aware() {
		let v1 = build_sync_idempotency_key(&binding(), SyncDirection::Import, "ext_1", Some("v1"));
		let v2 = build_sync_idempotency_key(&binding(), SyncDirection::Import, "ext_1", Some("v2"));
		let missing = build_sync_idempotency_key(&binding(), SyncDirection::Import, "ext_1", None);
		let empty =
			build_sync_idempotency_key(&binding(), SyncDirection::Import, "ext_1", Some(""));

		assert_ne!(v1, v2);
		assert_ne!(v1, missing);
		assert_eq!(missing, empty);
	}

	#[test]
	fn seed_tracks_checkpoint_position() {
		let at_start = build_idempotency_seed(&binding(), SyncDirection::Import, None, None);
		let advanced =
			build_idempotency_seed(&binding(), SyncDirection::Import, Some("c1"), Some("v2"));

		assert_ne!(at_start, advanced);
	}
}
