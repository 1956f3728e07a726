//! Credential refresh with per-connection exclusivity and failure backoff.

// self
use crate::{
	_prelude::*,
	domain::{
		ConnectionId, ConnectionStatus, Credential, CredentialId, CredentialStatus, GrantEvent,
		GrantEventKind, GrantDeltaKind, GrantSnapshot, LifecycleEvent, compute_grant_delta, names,
	},
	error::{ErrorCategory, TextCode},
	flows::Service,
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	provider::RefreshAuthRequest,
	secret::{CredentialPayload, decode_credential_payload, encode_credential_payload},
};

/// Inputs to [`Service::refresh`].
#[derive(Clone, Debug)]
pub struct RefreshRequest {
	/// Provider the caller believes owns the connection; must match.
	pub provider_id: String,
	/// Connection whose credential is refreshed.
	pub connection_id: ConnectionId,
	/// Explicit payload to refresh from; decrypted store state when omitted.
	pub credential: Option<CredentialPayload>,
	/// Caller metadata forwarded to the strategy.
	pub metadata: BTreeMap<String, Json>,
}
impl RefreshRequest {
	/// Creates a request for the provided provider and connection.
	pub fn new(provider_id: impl Into<String>, connection_id: ConnectionId) -> Self {
		Self {
			provider_id: provider_id.into(),
			connection_id,
			credential: None,
			metadata: BTreeMap::new(),
		}
	}
}

/// Outputs of [`Service::refresh`].
#[derive(Clone, Debug)]
pub struct RefreshResponse {
	/// Identifier of the new credential version.
	pub credential_id: CredentialId,
	/// Version of the new credential.
	pub credential_version: u32,
	/// Expiry instant, when the provider communicated one.
	pub expires_at: Option<OffsetDateTime>,
}

impl Service {
	/// Rotates a connection's credential through the provider strategy.
	///
	/// Per-connection exclusivity is enforced through the connection locker;
	/// an already-held lock surfaces as `SERVICE_REFRESH_LOCKED`.
	pub async fn refresh(&self, request: RefreshRequest) -> Result<RefreshResponse> {
		const KIND: OpKind = OpKind::Refresh;

		let span = OpSpan::new(KIND, "refresh");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let mut connection = self.get_connection(&request.connection_id).await?;

				if !connection.provider_id.matches(&request.provider_id) {
					return Err(ServiceError::bad_input(format!(
						"provider mismatch: refresh names {} but connection {} belongs to {}.",
						request.provider_id, connection.id, connection.provider_id,
					)));
				}

				let _guard = self
					.locker
					.try_lock(&connection.id)
					.await?
					.ok_or_else(|| {
						ServiceError::new(
							ErrorCategory::Conflict,
							format!("Refresh already in progress for {}.", connection.id),
						)
						.with_text_code(TextCode::RefreshLocked)
					})?;
				let strategy = self.registry.resolve_strategy(&connection.provider_id)?;
				let stored = self.credentials.active_for(&connection.id).await?;
				let current_payload = match &request.credential {
					Some(explicit) => Some(explicit.clone()),
					None => match &stored {
						Some(credential) => Some(decode_credential_payload(
							self.secret_provider.as_ref(),
							&credential.envelope,
						)?),
						None => None,
					},
				};
				let refreshed = match strategy
					.refresh(RefreshAuthRequest {
						provider_id: connection.provider_id.clone(),
						connection_id: connection.id.clone(),
						current: current_payload,
						metadata: request.metadata.clone(),
					})
					.await
				{
					Ok(refreshed) => refreshed,
					Err(err) => {
						let now = self.clock.now();
						let retry_in = self.refresh_backoff.next_delay(1);
						let next_status = match err.category {
							ErrorCategory::Auth | ErrorCategory::Authz =>
								ConnectionStatus::PendingReauth,
							_ => ConnectionStatus::Errored,
						};

						if connection.status.can_transition(next_status) {
							connection.transition(next_status, Some(&err.message), now)?;
							self.connections.save(connection.clone()).await?;
						}

						return Err(err
							.with_metadata("connection_id", connection.id.as_ref())
							.with_metadata(
								"retry_after_seconds",
								retry_in.whole_seconds(),
							));
					},
				};

				// Persist the rotated credential as a new version.
				let now = self.clock.now();
				let auth_kind = stored
					.as_ref()
					.map(|credential| credential.auth_kind)
					.unwrap_or_else(|| strategy.kind());
				let requested = stored
					.as_ref()
					.map(|credential| credential.requested_grants.clone())
					.unwrap_or_default();
				let prior_granted = stored.as_ref().map(|credential| credential.granted_grants.clone());
				let granted = refreshed
					.granted_grants
					.clone()
					.or(prior_granted.clone())
					.unwrap_or_default();
				let envelope =
					encode_credential_payload(self.secret_provider.as_ref(), &refreshed.payload)?;
				let version = self.credentials.latest_version(&connection.id).await? + 1;
				let credential_id = self.new_credential_id()?;

				self.credentials
					.save_new_version(Credential {
						id: credential_id.clone(),
						connection_id: connection.id.clone(),
						version,
						envelope,
						auth_kind,
						token_type: refreshed.payload.token_type.clone(),
						requested_grants: requested.clone(),
						granted_grants: granted.clone(),
						expires_at: refreshed.expires_at,
						refreshable: refreshed.refreshable,
						rotates_at: None,
						status: CredentialStatus::Active,
						created_at: now,
					})
					.await?;

				// Journal grant movement reported by the provider.
				if refreshed.granted_grants.is_some() {
					let prior = self.grants.latest_snapshot(&connection.id).await?;
					let delta = compute_grant_delta(
						prior.as_ref().map(|snapshot| &snapshot.granted),
						&granted,
					);
					let kind = match delta.kind {
						GrantDeltaKind::InitialGranted => Some(GrantEventKind::InitialGranted),
						GrantDeltaKind::Expanded => Some(GrantEventKind::Expanded),
						GrantDeltaKind::Downgraded => Some(GrantEventKind::Downgraded),
						GrantDeltaKind::Unchanged => None,
					};

					if let Some(kind) = kind {
						let snapshot_version =
							prior.as_ref().map(|snapshot| snapshot.version + 1).unwrap_or(1);

						self.grants
							.append(
								GrantSnapshot {
									connection_id: connection.id.clone(),
									version: snapshot_version,
									requested,
									granted: granted.clone(),
									created_at: now,
								},
								GrantEvent {
									connection_id: connection.id.clone(),
									kind,
									added: delta.added,
									removed: delta.removed,
									version: snapshot_version,
									occurred_at: now,
								},
							)
							.await?;
					}
				}

				connection.transition(ConnectionStatus::Active, None, now)?;
				self.connections.save(connection.clone()).await?;
				self.emit_event(
					LifecycleEvent::new(
						self.new_event_id()?,
						names::CONNECTION_REFRESHED,
						connection.provider_id.clone(),
						connection.scope.clone(),
						now,
					)
					.with_connection(connection.id.clone())
					.with_source("auth")
					.with_metadata(BTreeMap::from_iter([(
						"credential_version".to_owned(),
						Json::from(version),
					)])),
				)
				.await?;

				Ok(RefreshResponse {
					credential_id,
					credential_version: version,
					expires_at: refreshed.expires_at,
				})
			})
			.await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}
}
