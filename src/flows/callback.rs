//! Callback completion: state consumption, credential persistence, grant journaling.

// self
use crate::{
	_prelude::*,
	domain::{
		Connection, ConnectionIdentity, ConnectionStatus, Credential, CredentialId, GrantDelta,
		GrantDeltaKind, GrantEvent, GrantEventKind, GrantSet, GrantSnapshot, LifecycleEvent, Scope,
		compute_grant_delta, names,
	},
	error::{ErrorCategory, TextCode},
	flows::{Service, common},
	ledger::CallbackFlow,
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	provider::{CompleteAuthRequest, CompleteAuthResponse},
	secret::encode_credential_payload,
};

const CODE_REPLAY_TTL: Duration = Duration::minutes(10);

/// Inputs to [`Service::complete_callback`] and
/// [`Service::complete_reconsent`](crate::flows::Service::complete_reconsent).
#[derive(Clone, Debug)]
pub struct CallbackRequest {
	/// Provider the callback belongs to, matched case-insensitively.
	pub provider_id: String,
	/// Internal actor the callback is for.
	pub scope: Scope,
	/// Authorization code returned by the provider.
	pub code: Option<String>,
	/// State value returned by the provider.
	pub state: Option<String>,
	/// Redirect URI the callback landed on; restored from the state record
	/// when omitted.
	pub redirect_uri: Option<Url>,
	/// Requested grants; restored from the state record when empty.
	pub requested_grants: Vec<String>,
	/// Caller metadata.
	pub metadata: BTreeMap<String, Json>,
}
impl CallbackRequest {
	/// Creates a request for the provided provider and scope.
	pub fn new(provider_id: impl Into<String>, scope: Scope) -> Self {
		Self {
			provider_id: provider_id.into(),
			scope,
			code: None,
			state: None,
			redirect_uri: None,
			requested_grants: Vec::new(),
			metadata: BTreeMap::new(),
		}
	}

	/// Sets the authorization code.
	pub fn with_code(mut self, code: impl Into<String>) -> Self {
		self.code = Some(code.into());

		self
	}

	/// Sets the state value.
	pub fn with_state(mut self, state: impl Into<String>) -> Self {
		self.state = Some(state.into());

		self
	}

	/// Sets the redirect URI.
	pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.redirect_uri = Some(redirect_uri);

		self
	}

	/// Merges a metadata entry.
	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
		self.metadata.insert(key.into(), value.into());

		self
	}
}

/// Outputs of callback completion.
#[derive(Clone, Debug)]
pub struct CallbackResponse {
	/// Connection the credential was persisted for.
	pub connection: Connection,
	/// Identifier of the new credential version.
	pub credential_id: CredentialId,
	/// Version of the new credential.
	pub credential_version: u32,
	/// Grants the provider issued.
	pub granted_grants: GrantSet,
	/// Delta against the previously granted set.
	pub grant_delta: GrantDelta,
	/// Flow metadata, including the effective `requested_grants` echo.
	pub metadata: BTreeMap<String, Json>,
}

impl Service {
	/// Completes a connect-flow callback: consumes the state, exchanges the
	/// code, persists the credential, and journals the grant delta.
	pub async fn complete_callback(&self, request: CallbackRequest) -> Result<CallbackResponse> {
		const KIND: OpKind = OpKind::Callback;

		let span = OpSpan::new(KIND, "complete_callback");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.complete_flow(request, CallbackFlow::Connect)).await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	pub(crate) async fn complete_flow(
		&self,
		request: CallbackRequest,
		expected_flow: CallbackFlow,
	) -> Result<CallbackResponse> {
		request.scope.validate()?;

		let entry = self.registry.resolve(&request.provider_id)?;
		let provider_id = entry.descriptor.id.clone();
		let strategy = self.registry.resolve_strategy(&request.provider_id)?;
		let requires_state = strategy.kind().requires_callback_state();

		// 1. Consume the single-use state and cross-check it before any
		//    provider call.
		let state_record = if requires_state {
			let state = request.state.as_deref().ok_or_else(|| {
				ServiceError::bad_input("Callback state is required for this provider.")
					.with_text_code(TextCode::OauthStateInvalid)
			})?;
			let record = self
				.oauth_states
				.consume(state, self.clock.now())
				.await?
				.ok_or_else(|| {
					ServiceError::bad_input("oauth state not found")
						.with_text_code(TextCode::OauthStateInvalid)
				})?;

			if record.flow != expected_flow {
				return Err(ServiceError::bad_input("oauth state flow mismatch")
					.with_text_code(TextCode::OauthStateInvalid));
			}
			if !record.provider_id.matches(&request.provider_id) || record.scope != request.scope {
				return Err(ServiceError::bad_input("state scope mismatch")
					.with_text_code(TextCode::OauthStateInvalid)
					.with_metadata("provider_id", request.provider_id.clone())
					.with_metadata("scope_type", request.scope.scope_type.as_str())
					.with_metadata("scope_id", request.scope.scope_id.clone()));
			}

			Some(record)
		} else {
			None
		};

		// 2. Restore redirect/grants/metadata from the state record, then
		//    enforce the strict redirect policy.
		let redirect_uri = request
			.redirect_uri
			.clone()
			.or_else(|| state_record.as_ref().and_then(|record| record.redirect_uri.clone()));
		let requested_grants = if request.requested_grants.is_empty() {
			state_record
				.as_ref()
				.map(|record| record.requested_grants.clone())
				.unwrap_or_default()
		} else {
			GrantSet::new(request.requested_grants.clone())?
		};
		let mut metadata = state_record
			.as_ref()
			.map(|record| record.metadata.clone())
			.unwrap_or_default();

		metadata.extend(request.metadata.clone());
		metadata.insert(
			common::REQUESTED_GRANTS_KEY.into(),
			common::grants_metadata(&requested_grants),
		);

		if common::require_redirect(&self.config, &metadata) && redirect_uri.is_none() {
			return Err(ServiceError::bad_input(
				"Callback redirect URI is required by policy.",
			));
		}

		// 3. Fence authorization-code replays across states.
		if let Some(code) = &request.code {
			let key = format!("callback|{provider_id}|{code}");
			let fresh =
				self.replays.claim(&key, CODE_REPLAY_TTL, self.clock.now()).await?;

			if !fresh {
				return Err(ServiceError::new(
					ErrorCategory::Conflict,
					"Authorization code replay detected.",
				)
				.with_text_code(TextCode::ReplayDetected));
			}
		}

		// 4. Exchange with the provider.
		let completed = strategy
			.complete(CompleteAuthRequest {
				provider_id: provider_id.clone(),
				scope: request.scope.clone(),
				code: request.code.clone(),
				state: request.state.clone(),
				redirect_uri,
				requested_grants: requested_grants.clone(),
				metadata: metadata.clone(),
			})
			.await?;
		let external_account_id = completed.external_account_id.clone().ok_or_else(|| {
			ServiceError::bad_input("Provider response is missing the external account id.")
		})?;

		// 5. Recover or create the connection.
		let now = self.clock.now();
		let mut connection = match expected_flow {
			CallbackFlow::Reconsent => {
				let connection_id = state_record
					.as_ref()
					.and_then(|record| record.connection_id.clone())
					.ok_or_else(|| {
						ServiceError::bad_input(
							"Reconsent state record is missing the connection id.",
						)
						.with_text_code(TextCode::OauthStateInvalid)
					})?;

				self.connections.get(&connection_id).await?.ok_or_else(|| {
					ServiceError::not_found(format!("Connection not found: {connection_id}."))
				})?
			},
			CallbackFlow::Connect => {
				let identity = ConnectionIdentity {
					provider_id: provider_id.clone(),
					scope: request.scope.clone(),
					external_account_id: external_account_id.clone(),
				};

				match self.connections.find_by_identity(&identity).await? {
					Some(existing) => existing,
					None => Connection::new(
						self.new_connection_id()?,
						provider_id.clone(),
						request.scope.clone(),
						external_account_id.clone(),
						now,
					),
				}
			},
		};

		// 6. Seal and persist the new credential version.
		let (credential_id, credential_version) = self
			.persist_credential(&connection, &requested_grants, &completed, strategy.kind(), now)
			.await?;

		// 7. Journal the grant delta.
		let prior = self.grants.latest_snapshot(&connection.id).await?;
		let delta = compute_grant_delta(
			prior.as_ref().map(|snapshot| &snapshot.granted),
			&completed.granted_grants,
		);
		let version = prior.as_ref().map(|snapshot| snapshot.version + 1).unwrap_or(1);
		let event_kind = match expected_flow {
			CallbackFlow::Reconsent => Some(GrantEventKind::ReconsentCompleted),
			CallbackFlow::Connect => match delta.kind {
				GrantDeltaKind::InitialGranted => Some(GrantEventKind::InitialGranted),
				GrantDeltaKind::Expanded => Some(GrantEventKind::Expanded),
				GrantDeltaKind::Downgraded => Some(GrantEventKind::Downgraded),
				GrantDeltaKind::Unchanged => None,
			},
		};

		if let Some(kind) = event_kind {
			self.grants
				.append(
					GrantSnapshot {
						connection_id: connection.id.clone(),
						version,
						requested: requested_grants.clone(),
						granted: completed.granted_grants.clone(),
						created_at: now,
					},
					GrantEvent {
						connection_id: connection.id.clone(),
						kind,
						added: delta.added.clone(),
						removed: delta.removed.clone(),
						version,
						occurred_at: now,
					},
				)
				.await?;
		}

		// 8. Activate the connection and emit the lifecycle event.
		connection.transition(ConnectionStatus::Active, None, now)?;
		self.connections.save(connection.clone()).await?;

		let event_name = match expected_flow {
			CallbackFlow::Connect => names::CONNECTION_CONNECTED,
			CallbackFlow::Reconsent => names::CONNECTION_RECONSENTED,
		};
		let event = LifecycleEvent::new(
			self.new_event_id()?,
			event_name,
			provider_id,
			request.scope.clone(),
			now,
		)
		.with_connection(connection.id.clone())
		.with_source("auth")
		.with_metadata(BTreeMap::from_iter([
			(
				"external_id".to_owned(),
				Json::String(external_account_id.to_string()),
			),
			("grant_delta".to_owned(), Json::String(delta.kind.as_str().to_owned())),
		]));

		self.emit_event(event).await?;

		Ok(CallbackResponse {
			connection,
			credential_id,
			credential_version,
			granted_grants: completed.granted_grants,
			grant_delta: delta,
			metadata,
		})
	}

	async fn persist_credential(
		&self,
		connection: &Connection,
		requested_grants: &GrantSet,
		completed: &CompleteAuthResponse,
		auth_kind: crate::domain::AuthKind,
		now: OffsetDateTime,
	) -> Result<(CredentialId, u32)> {
		let envelope =
			encode_credential_payload(self.secret_provider.as_ref(), &completed.payload)?;
		let version = self.credentials.latest_version(&connection.id).await? + 1;
		let credential_id = self.new_credential_id()?;

		self.credentials
			.save_new_version(Credential {
				id: credential_id.clone(),
				connection_id: connection.id.clone(),
				version,
				envelope,
				auth_kind,
				token_type: completed.payload.token_type.clone(),
				requested_grants: requested_grants.clone(),
				granted_grants: completed.granted_grants.clone(),
				expires_at: completed.expires_at,
				refreshable: completed.refreshable,
				rotates_at: None,
				status: crate::domain::CredentialStatus::Active,
				created_at: now,
			})
			.await?;

		Ok((credential_id, version))
	}
}
