//! Revocation: disconnect a connection and invalidate its credential.

// self
use crate::{
	_prelude::*,
	domain::{Connection, ConnectionId, ConnectionStatus, CredentialStatus, LifecycleEvent, names},
	flows::Service,
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	provider::RevokeAuthRequest,
	secret::decode_credential_payload,
};

impl Service {
	/// Disconnects a connection: revokes the active credential, asks the
	/// provider to revoke best-effort, and emits `connection.disconnected`.
	pub async fn revoke(
		&self,
		connection_id: &ConnectionId,
		reason: Option<&str>,
	) -> Result<Connection> {
		const KIND: OpKind = OpKind::Revoke;

		let span = OpSpan::new(KIND, "revoke");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let mut connection = self.get_connection(connection_id).await?;
				let now = self.clock.now();

				if let Some(mut credential) = self.credentials.active_for(&connection.id).await? {
					// Provider-side revocation is best effort; local state is
					// authoritative.
					if let Ok(strategy) = self.registry.resolve_strategy(&connection.provider_id) {
						let payload = decode_credential_payload(
							self.secret_provider.as_ref(),
							&credential.envelope,
						)
						.ok();
						let _ = strategy
							.revoke(RevokeAuthRequest {
								provider_id: connection.provider_id.clone(),
								connection_id: connection.id.clone(),
								current: payload,
							})
							.await;
					}

					credential.transition(CredentialStatus::Revoked)?;
					self.credentials.update(credential).await?;
				}

				connection.transition(
					ConnectionStatus::Disconnected,
					reason.or(Some("revoked")),
					now,
				)?;
				self.connections.save(connection.clone()).await?;
				self.emit_event(
					LifecycleEvent::new(
						self.new_event_id()?,
						names::CONNECTION_DISCONNECTED,
						connection.provider_id.clone(),
						connection.scope.clone(),
						now,
					)
					.with_connection(connection.id.clone())
					.with_source("auth"),
				)
				.await?;

				Ok(connection)
			})
			.await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}
}
