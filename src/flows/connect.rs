//! Connect flow: begin an authorization round-trip for a provider.

// self
use crate::{
	_prelude::*,
	domain::{GrantSet, Scope},
	flows::{CallbackUrlRequest, Service, common},
	ledger::{CallbackFlow, OAuthStateRecord, generate_state},
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	provider::BeginAuthRequest,
};

/// Inputs to [`Service::connect`].
#[derive(Clone, Debug)]
pub struct ConnectRequest {
	/// Provider to connect, matched case-insensitively.
	pub provider_id: String,
	/// Internal actor the connection is for.
	pub scope: Scope,
	/// Redirect URI; resolved via the callback URL resolver when omitted and
	/// the strategy requires callback state.
	pub redirect_uri: Option<Url>,
	/// Grants to request.
	pub requested_grants: Vec<String>,
	/// Caller metadata echoed through the flow.
	pub metadata: BTreeMap<String, Json>,
}
impl ConnectRequest {
	/// Creates a request for the provided provider and scope.
	pub fn new(provider_id: impl Into<String>, scope: Scope) -> Self {
		Self {
			provider_id: provider_id.into(),
			scope,
			redirect_uri: None,
			requested_grants: Vec::new(),
			metadata: BTreeMap::new(),
		}
	}

	/// Sets the redirect URI.
	pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.redirect_uri = Some(redirect_uri);

		self
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

	/// Merges a metadata entry.
	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
		self.metadata.insert(key.into(), value.into());

		self
	}
}

/// Outputs of [`Service::connect`].
#[derive(Clone, Debug)]
pub struct ConnectResponse {
	/// URL the end user must visit, when the flow is interactive.
	pub url: Option<Url>,
	/// Single-use callback state, when the strategy requires one.
	pub state: Option<String>,
	/// Normalized grants the flow will request.
	pub requested_grants: GrantSet,
	/// Flow metadata (caller metadata merged with strategy additions).
	pub metadata: BTreeMap<String, Json>,
}

impl Service {
	/// Starts the connect flow for a provider.
	pub async fn connect(&self, request: ConnectRequest) -> Result<ConnectResponse> {
		const KIND: OpKind = OpKind::Connect;

		let span = OpSpan::new(KIND, "connect");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				request.scope.validate()?;

				let entry = self.registry.resolve(&request.provider_id)?;
				let provider_id = entry.descriptor.id.clone();
				let strategy = self.registry.resolve_strategy(&request.provider_id)?;
				let requested_grants = GrantSet::new(request.requested_grants.clone())?;
				let requires_state = strategy.kind().requires_callback_state();
				let state = requires_state.then(generate_state);
				let redirect_uri = match (&request.redirect_uri, requires_state) {
					(Some(explicit), _) => Some(explicit.clone()),
					(None, true) => {
						let resolver = self.callback_urls.as_ref().ok_or_else(|| {
							ServiceError::bad_input(
								"No redirect URI was supplied and no callback URL resolver is configured.",
							)
						})?;
						let resolved = resolver
							.resolve(CallbackUrlRequest {
								flow: CallbackFlow::Connect,
								provider_id: provider_id.clone(),
								scope: request.scope.clone(),
								requested_grants: requested_grants.clone(),
								connection_id: None,
								metadata: request.metadata.clone(),
							})
							.await?;

						Some(resolved)
					},
					(None, false) => None,
				};

				if let Some(state) = &state {
					let now = self.clock.now();

					self.oauth_states
						.put(OAuthStateRecord {
							state: state.clone(),
							provider_id: provider_id.clone(),
							scope: request.scope.clone(),
							flow: CallbackFlow::Connect,
							redirect_uri: redirect_uri.clone(),
							requested_grants: requested_grants.clone(),
							connection_id: None,
							metadata: request.metadata.clone(),
							created_at: now,
							expires_at: now + self.state_ttl,
						})
						.await?;
				}

				let begin = strategy
					.begin(BeginAuthRequest {
						provider_id,
						scope: request.scope.clone(),
						redirect_uri,
						state: state.clone(),
						requested_grants: requested_grants.clone(),
						metadata: request.metadata.clone(),
					})
					.await?;
				let mut metadata = request.metadata;

				metadata.extend(begin.metadata);
				metadata.insert(
					common::REQUESTED_GRANTS_KEY.into(),
					common::grants_metadata(&begin.requested_grants),
				);

				Ok(ConnectResponse {
					url: begin.url,
					state: begin.state.or(state),
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
}
