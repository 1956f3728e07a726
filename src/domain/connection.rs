//! Connection entity and its lifecycle state machine.

// self
use crate::{
	_prelude::*,
	domain::{ConnectionId, ExternalAccountId, ProviderId, Scope},
	error::{ErrorCategory, TextCode},
};

/// Lifecycle status of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
	/// Credentialed and usable.
	Active,
	/// Explicitly disconnected by the user or the service.
	Disconnected,
	/// A provider operation or refresh failed.
	Errored,
	/// The credential must be refreshed interactively.
	PendingReauth,
	/// The user must re-approve the requested grants.
	NeedsReconsent,
}
impl ConnectionStatus {
	/// Returns the lowercase label for the status.
	pub const fn as_str(self) -> &'static str {
		match self {
			ConnectionStatus::Active => "active",
			ConnectionStatus::Disconnected => "disconnected",
			ConnectionStatus::Errored => "errored",
			ConnectionStatus::PendingReauth => "pending_reauth",
			ConnectionStatus::NeedsReconsent => "needs_reconsent",
		}
	}

	/// Checks whether a transition from `self` to `next` is allowed.
	pub fn can_transition(self, next: ConnectionStatus) -> bool {
		use ConnectionStatus::*;

		match self {
			Active => matches!(next, Disconnected | Errored | PendingReauth | NeedsReconsent),
			Errored => matches!(next, Active | PendingReauth | Disconnected),
			PendingReauth => matches!(next, Active | Disconnected),
			NeedsReconsent => matches!(next, Active | Disconnected | PendingReauth),
			Disconnected => matches!(next, Active),
		}
	}
}
impl Display for ConnectionStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Error raised on a disallowed connection status transition.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Invalid connection status transition: {from} -> {to}.")]
pub struct InvalidConnectionStatusTransition {
	/// Current status.
	pub from: ConnectionStatus,
	/// Rejected target status.
	pub to: ConnectionStatus,
}
impl From<InvalidConnectionStatusTransition> for ServiceError {
	fn from(value: InvalidConnectionStatusTransition) -> Self {
		ServiceError::new(ErrorCategory::Conflict, value.to_string())
			.with_text_code(TextCode::Conflict)
			.with_metadata("from", value.from.as_str())
			.with_metadata("to", value.to.as_str())
	}
}

/// Persistent binding between an internal scope and an external account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
	/// Connection identifier.
	pub id: ConnectionId,
	/// Provider the connection belongs to.
	pub provider_id: ProviderId,
	/// Internal actor owning the connection.
	pub scope: Scope,
	/// Account identifier assigned by the provider.
	pub external_account_id: ExternalAccountId,
	/// Current lifecycle status.
	pub status: ConnectionStatus,
	/// Connection this one inherits credentials from, if any.
	pub inherits_from: Option<ConnectionId>,
	/// Last error recorded against the connection; cleared on activation.
	pub last_error: Option<String>,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Last mutation instant.
	pub updated_at: OffsetDateTime,
}
impl Connection {
	/// Creates a new active connection.
	pub fn new(
		id: ConnectionId,
		provider_id: ProviderId,
		scope: Scope,
		external_account_id: ExternalAccountId,
		now: OffsetDateTime,
	) -> Self {
		Self {
			id,
			provider_id,
			scope,
			external_account_id,
			status: ConnectionStatus::Active,
			inherits_from: None,
			last_error: None,
			created_at: now,
			updated_at: now,
		}
	}

	/// Unique identity tuple enforced across the store.
	pub fn identity(&self) -> ConnectionIdentity {
		ConnectionIdentity {
			provider_id: self.provider_id.clone(),
			scope: self.scope.clone(),
			external_account_id: self.external_account_id.clone(),
		}
	}

	/// Applies a status transition, enforcing the allowed-transition table.
	///
	/// Reaching `active` clears `last_error`; any other target records the
	/// provided reason.
	pub fn transition(
		&mut self,
		next: ConnectionStatus,
		reason: Option<&str>,
		now: OffsetDateTime,
	) -> Result<(), InvalidConnectionStatusTransition> {
		if self.status == next {
			self.updated_at = now;

			return Ok(());
		}
		if !self.status.can_transition(next) {
			return Err(InvalidConnectionStatusTransition { from: self.status, to: next });
		}

		self.status = next;
		self.updated_at = now;

		if next == ConnectionStatus::Active {
			self.last_error = None;
		} else if let Some(reason) = reason {
			self.last_error = Some(reason.to_owned());
		}

		Ok(())
	}
}

/// Unique key (provider, scope, external account) identifying a connection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionIdentity {
	/// Provider component.
	pub provider_id: ProviderId,
	/// Scope component.
	pub scope: Scope,
	/// External account component.
	pub external_account_id: ExternalAccountId,
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn connection() -> Connection {
		Connection::new(
			ConnectionId::new("conn-1").expect("Connection fixture should be valid."),
			ProviderId::new("github").expect("Provider fixture should be valid."),
			Scope::user("u1").expect("Scope fixture should be valid."),
			ExternalAccountId::new("acct-1").expect("Account fixture should be valid."),
			macros::datetime!(2026-01-01 00:00 UTC),
		)
	}

	#[test]
	fn transition_table_matches_lifecycle() {
		use ConnectionStatus::*;

		assert!(Active.can_transition(Disconnected));
		assert!(Active.can_transition(NeedsReconsent));
		assert!(Errored.can_transition(Active));
		assert!(PendingReauth.can_transition(Active));
		assert!(NeedsReconsent.can_transition(PendingReauth));
		assert!(Disconnected.can_transition(Active));

		assert!(!Disconnected.can_transition(Errored));
		assert!(!PendingReauth.can_transition(NeedsReconsent));
		assert!(!Errored.can_transition(NeedsReconsent));
	}

	#[test]
	fn activation_clears_last_error() {
		let mut conn = connection();
		let now = macros::datetime!(2026-01-02 00:00 UTC);

		conn.transition(ConnectionStatus::Errored, Some("refresh failed"), now)
			.expect("Active to errored should be allowed.");

		assert_eq!(conn.last_error.as_deref(), Some("refresh failed"));

		conn.transition(ConnectionStatus::Active, None, now)
			.expect("Errored to active should be allowed.");

		assert_eq!(conn.last_error, None);
	}

	#[test]
	fn invalid_transition_is_rejected() {
		let mut conn = connection();
		let now = macros::datetime!(2026-01-02 00:00 UTC);

		conn.transition(ConnectionStatus::Disconnected, Some("bye"), now)
			.expect("Active to disconnected should be allowed.");

		let err = conn
			.transition(ConnectionStatus::Errored, None, now)
			.expect_err("Disconnected to errored must be rejected.");

		assert_eq!(err.from, ConnectionStatus::Disconnected);
		assert_eq!(err.to, ConnectionStatus::Errored);
	}

	#[test]
	fn self_transition_is_a_timestamp_touch() {
		let mut conn = connection();
		let now = macros::datetime!(2026-03-01 00:00 UTC);

		conn.transition(ConnectionStatus::Active, None, now)
			.expect("Self transition should be accepted.");

		assert_eq!(conn.updated_at, now);
	}
}
