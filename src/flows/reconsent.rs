//! Reconsent flow: re-approve grants for an existing connection.

// self
use crate::{
	_prelude::*,
	domain::{ConnectionId, ConnectionStatus, GrantSet},
	flows::{CallbackRequest, CallbackResponse, CallbackUrlRequest, ConnectResponse, Service, common},
	ledger::{CallbackFlow, OAuthStateRecord, generate_state},
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	provider::BeginAuthRequest,
};

/// Inputs to [`Service::start_reconsent`].
#[derive(Clone, Debug)]
pub struct StartReconsentRequest {
	/// Connection being reconsented.
	pub connection_id: ConnectionId,
	/// Redirect URI; resolved via the callback URL resolver when omitted.
	pub redirect_uri: Option<Url>,
	/// Grants to request this time around.
	pub requested_grants: Vec<String>,
	/// Caller metadata echoed through the flow.
	pub metadata: BTreeMap<String, Json>,
}
impl StartReconsentRequest {
	/// Creates a request for the provided connection.
	pub fn new(connection_id: ConnectionId) -> Self {
		Self {
			connection_id,
			redirect_uri: None,
			requested_grants: Vec::new(),
			metadata: BTreeMap::new(),
		}
	}

	/// Sets the requested grants.
	pub fn with_grants<I, S>(mut self, grants: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.requested_grants = grants.into_iter().map(Into::into).collect();

		self
	}
}

impl Service {
	/// Starts a reconsent round-trip for an existing connection.
	///
	/// The connection moves to `needs_reconsent` and the issued state record
	/// carries the connection id so completion can recover it.
	pub async fn start_reconsent(
		&self,
		request: StartReconsentRequest,
	) -> Result<ConnectResponse> {
		const KIND: OpKind = OpKind::Reconsent;

		let span = OpSpan::new(KIND, "start_reconsent");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let mut connection = self.get_connection(&request.connection_id).await?;
				let strategy = self.registry.resolve_strategy(&connection.provider_id)?;

				if !strategy.kind().requires_callback_state() {
					return Err(ServiceError::bad_input(
						"Reconsent requires an interactive auth strategy.",
					));
				}

				let now = self.clock.now();

				connection.transition(
					ConnectionStatus::NeedsReconsent,
					Some("start_reconsent"),
					now,
				)?;
				self.connections.save(connection.clone()).await?;

				let requested_grants = GrantSet::new(request.requested_grants.clone())?;
				let mut metadata = request.metadata.clone();

				metadata.insert(
					"connection_id".into(),
					Json::String(connection.id.to_string()),
				);

				let redirect_uri = match &request.redirect_uri {
					Some(explicit) => Some(explicit.clone()),
					None => {
						let resolver = self.callback_urls.as_ref().ok_or_else(|| {
							ServiceError::bad_input(
								"No redirect URI was supplied and no callback URL resolver is configured.",
							)
						})?;
						let resolved = resolver
							.resolve(CallbackUrlRequest {
								flow: CallbackFlow::Reconsent,
								provider_id: connection.provider_id.clone(),
								scope: connection.scope.clone(),
								requested_grants: requested_grants.clone(),
								connection_id: Some(connection.id.clone()),
								metadata: metadata.clone(),
							})
							.await?;

						Some(resolved)
					},
				};
				let state = generate_state();

				self.oauth_states
					.put(OAuthStateRecord {
						state: state.clone(),
						provider_id: connection.provider_id.clone(),
						scope: connection.scope.clone(),
						flow: CallbackFlow::Reconsent,
						redirect_uri: redirect_uri.clone(),
						requested_grants: requested_grants.clone(),
						connection_id: Some(connection.id.clone()),
						metadata: metadata.clone(),
						created_at: now,
						expires_at: now + self.state_ttl,
					})
					.await?;

				let begin = strategy
					.begin(BeginAuthRequest {
						provider_id: connection.provider_id.clone(),
						scope: connection.scope.clone(),
						redirect_uri,
						state: Some(state.clone()),
						requested_grants: requested_grants.clone(),
						metadata: metadata.clone(),
					})
					.await?;

				metadata.extend(begin.metadata);
				metadata.insert(
					common::REQUESTED_GRANTS_KEY.into(),
					common::grants_metadata(&begin.requested_grants),
				);

				Ok(ConnectResponse {
					url: begin.url,
					state: begin.state.or(Some(state)),
					requested_grants: begin.requested_grants,
					metadata,
				})
			})
			.await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// Completes a reconsent callback.
	///
	/// Identical to [`Service::complete_callback`] except the connection is
	/// recovered from the state record and the grant journal records a
	/// `reconsent_completed` event.
	pub async fn complete_reconsent(&self, request: CallbackRequest) -> Result<CallbackResponse> {
		const KIND: OpKind = OpKind::Reconsent;

		let span = OpSpan::new(KIND, "complete_reconsent");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.complete_flow(request, CallbackFlow::Reconsent)).await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}
}
