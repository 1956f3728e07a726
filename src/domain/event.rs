//! Lifecycle events delivered to subscribers through the outbox.

// self
use crate::{
	_prelude::*,
	domain::{ConnectionId, EventId, ProviderId, Scope},
	obs::redact_sensitive_map,
};

/// Well-known lifecycle event names.
pub mod names {
	/// A connection reached `active` after a callback completed.
	pub const CONNECTION_CONNECTED: &str = "connection.connected";
	/// A connection was disconnected.
	pub const CONNECTION_DISCONNECTED: &str = "connection.disconnected";
	/// A credential was refreshed.
	pub const CONNECTION_REFRESHED: &str = "connection.refreshed";
	/// A reconsent flow completed.
	pub const CONNECTION_RECONSENTED: &str = "connection.reconsented";
	/// A sync run started.
	pub const SYNC_RUN_STARTED: &str = "services.sync.run.started";
	/// A sync run finished successfully.
	pub const SYNC_RUN_SUCCEEDED: &str = "services.sync.run.succeeded";
	/// A sync run failed.
	pub const SYNC_RUN_FAILED: &str = "services.sync.run.failed";
	/// A checkpoint advanced during a sync run.
	pub const SYNC_RUN_CHECKPOINT: &str = "services.sync.run.checkpoint";
	/// A sync conflict was recorded.
	pub const SYNC_CONFLICT_RECORDED: &str = "services.sync.conflict.recorded";
	/// A sync conflict was resolved.
	pub const SYNC_CONFLICT_RESOLVED: &str = "services.sync.conflict.resolved";
	/// A sync conflict was ignored.
	pub const SYNC_CONFLICT_IGNORED: &str = "services.sync.conflict.ignored";
	/// A sync conflict was queued for retry.
	pub const SYNC_CONFLICT_RETRIED: &str = "services.sync.conflict.retried";
}

/// Persisted lifecycle notification delivered with at-least-once semantics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
	/// Event identifier.
	pub id: EventId,
	/// Event name (dotted, see [`names`]).
	pub name: String,
	/// Provider the event relates to.
	pub provider_id: ProviderId,
	/// Scope the event relates to.
	pub scope: Scope,
	/// Connection the event relates to, when applicable.
	pub connection_id: Option<ConnectionId>,
	/// Logical source subsystem (e.g. `auth`, `sync`, `outbox`).
	pub source: String,
	/// Instant the event occurred.
	pub occurred_at: OffsetDateTime,
	/// Structured payload. Redacted before persistence.
	pub payload: Json,
	/// Structured metadata. Redacted before persistence; the outbox keeps its
	/// delivery attempt counter under `_outbox_attempts`.
	pub metadata: BTreeMap<String, Json>,
}
impl LifecycleEvent {
	/// Creates an event, passing payload object fields and metadata through redaction.
	pub fn new(
		id: EventId,
		name: impl Into<String>,
		provider_id: ProviderId,
		scope: Scope,
		occurred_at: OffsetDateTime,
	) -> Self {
		Self {
			id,
			name: name.into(),
			provider_id,
			scope,
			connection_id: None,
			source: "service".into(),
			occurred_at,
			payload: Json::Null,
			metadata: BTreeMap::new(),
		}
	}

	/// Associates the event with a connection.
	pub fn with_connection(mut self, connection_id: ConnectionId) -> Self {
		self.connection_id = Some(connection_id);

		self
	}

	/// Overrides the logical source subsystem.
	pub fn with_source(mut self, source: impl Into<String>) -> Self {
		self.source = source.into();

		self
	}

	/// Attaches a payload, redacting sensitive keys in object payloads.
	pub fn with_payload(mut self, payload: Json) -> Self {
		self.payload = match payload {
			Json::Object(map) => {
				let tree: BTreeMap<String, Json> = map.into_iter().collect();

				Json::Object(redact_sensitive_map(&tree).into_iter().collect())
			},
			other => other,
		};

		self
	}

	/// Merges metadata entries after redaction.
	pub fn with_metadata(mut self, metadata: BTreeMap<String, Json>) -> Self {
		self.metadata.extend(redact_sensitive_map(&metadata));

		self
	}

	/// Returns the outbox delivery attempt counter, defaulting to zero.
	pub fn outbox_attempts(&self) -> u32 {
		self.metadata
			.get(crate::outbox::ATTEMPTS_KEY)
			.and_then(Json::as_u64)
			.and_then(|value| u32::try_from(value).ok())
			.unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	use time::macros;
	// self
	use super::*;

	fn event() -> LifecycleEvent {
		LifecycleEvent::new(
			EventId::new("evt-1").expect("Event fixture should be valid."),
			names::CONNECTION_CONNECTED,
			ProviderId::new("github").expect("Provider fixture should be valid."),
			Scope::user("u1").expect("Scope fixture should be valid."),
			macros::datetime!(2026-01-01 00:00 UTC),
		)
	}

	#[test]
	fn payload_objects_are_redacted() {
		let event = event().with_payload(json!({ "access_token": "tok", "account": "a1" }));

		assert_eq!(event.payload["access_token"], json!("<redacted>"));
		assert_eq!(event.payload["account"], json!("a1"));
	}

	#[test]
	fn attempts_counter_defaults_to_zero() {
		let mut event = event();

		assert_eq!(event.outbox_attempts(), 0);

		event.metadata.insert(crate::outbox::ATTEMPTS_KEY.into(), json!(3));

		assert_eq!(event.outbox_attempts(), 3);
	}
}
