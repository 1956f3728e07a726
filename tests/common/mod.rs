//! Shared fixtures: scripted strategies, transports, and a deterministic service.

#![allow(dead_code)]

// std
use std::{
	collections::{BTreeMap, VecDeque},
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicU32, Ordering},
	},
};
// crates.io
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime, macros};
use url::Url;
// self
use integration_hub::{
	domain::{
		AuthKind, ConnectionId, ExternalAccountId, GrantSet, ProviderId, Scope,
	},
	error::{Result, ServiceError},
	flows::{Clock, IdGenerator, Service, ServiceBuilder},
	provider::{
		AuthStrategy, BeginAuthRequest, BeginAuthResponse, CapabilityDescriptor,
		CompleteAuthRequest, CompleteAuthResponse, DeniedBehavior, ProviderDescriptor,
		ProviderRegistry, RefreshAuthRequest, RefreshAuthResponse, StrategyFuture,
	},
	secret::{CredentialPayload, SecretMaterial},
	transport::{TransportAdapter, TransportFuture, TransportRequest, TransportResponse},
};

/// Frozen base instant used across deterministic tests.
pub fn epoch() -> OffsetDateTime {
	macros::datetime!(2026-02-18 15:30:00 UTC)
}

/// Scripted OAuth2 strategy driving the lifecycle flows without a network.
pub struct FakeOauthStrategy {
	/// Grants issued by the next `complete` call.
	pub grants_to_issue: Mutex<Vec<String>>,
	/// External account id returned by `complete`.
	pub external_account: Mutex<Option<String>>,
	/// Number of `complete` invocations.
	pub complete_calls: AtomicU32,
	/// Number of `refresh` invocations.
	pub refresh_calls: AtomicU32,
	/// When set, `refresh` fails with an auth error.
	pub fail_refresh: AtomicBool,
}
impl Default for FakeOauthStrategy {
	fn default() -> Self {
		Self {
			grants_to_issue: Mutex::new(vec!["repo:read".into()]),
			external_account: Mutex::new(Some("acct-1".into())),
			complete_calls: AtomicU32::new(0),
			refresh_calls: AtomicU32::new(0),
			fail_refresh: AtomicBool::new(false),
		}
	}
}
impl FakeOauthStrategy {
	pub fn issue_grants<I, S>(&self, grants: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		*self.grants_to_issue.lock() = grants.into_iter().map(Into::into).collect();
	}

	pub fn set_external_account(&self, account: &str) {
		*self.external_account.lock() = Some(account.to_owned());
	}
}
impl AuthStrategy for FakeOauthStrategy {
	fn kind(&self) -> AuthKind {
		AuthKind::Oauth2AuthCode
	}

	fn begin(&self, request: BeginAuthRequest) -> StrategyFuture<'_, BeginAuthResponse> {
		Box::pin(async move {
			let mut url = Url::parse("https://provider.example/authorize")
				.expect("Authorize URL fixture should parse.");

			if let Some(state) = &request.state {
				url.query_pairs_mut().append_pair("state", state);
			}

			Ok(BeginAuthResponse {
				url: Some(url),
				state: request.state,
				requested_grants: request.requested_grants,
				metadata: BTreeMap::new(),
			})
		})
	}

	fn complete(&self, request: CompleteAuthRequest) -> StrategyFuture<'_, CompleteAuthResponse> {
		self.complete_calls.fetch_add(1, Ordering::SeqCst);

		let grants = self.grants_to_issue.lock().clone();
		let account = self.external_account.lock().clone();

		Box::pin(async move {
			let _ = request;
			let granted = GrantSet::new(grants).expect("Scripted grants should be valid.");
			let external_account_id = account
				.map(|value| {
					ExternalAccountId::new(value)
						.expect("Scripted account id should be valid.")
				});

			Ok(CompleteAuthResponse {
				external_account_id,
				payload: CredentialPayload::bearer("tok-granted"),
				granted_grants: granted,
				expires_at: None,
				refreshable: true,
			})
		})
	}

	fn refresh(&self, request: RefreshAuthRequest) -> StrategyFuture<'_, RefreshAuthResponse> {
		self.refresh_calls.fetch_add(1, Ordering::SeqCst);

		let fail = self.fail_refresh.load(Ordering::SeqCst);

		Box::pin(async move {
			let _ = request;

			if fail {
				return Err(ServiceError::new(
					integration_hub::error::ErrorCategory::Auth,
					"Provider rejected the refresh token.",
				));
			}

			Ok(RefreshAuthResponse {
				payload: CredentialPayload::bearer("tok-rotated"),
				granted_grants: None,
				expires_at: None,
				refreshable: true,
			})
		})
	}
}

/// Static callback URL resolver used when flows omit a redirect URI.
pub struct StaticCallbackResolver;
impl integration_hub::flows::CallbackUrlResolver for StaticCallbackResolver {
	fn resolve(
		&self,
		request: integration_hub::flows::CallbackUrlRequest,
	) -> integration_hub::flows::ResolverFuture<'_> {
		Box::pin(async move {
			let mut url = Url::parse("https://app.example/callback")
				.expect("Callback URL fixture should parse.");

			url.query_pairs_mut().append_pair("flow", request.flow.as_str());

			Ok(url)
		})
	}
}

/// One scripted transport outcome.
pub enum ScriptedOutcome {
	/// Respond with the given status/headers/body.
	Respond(TransportResponse),
	/// Fail at the transport level.
	Fail(String),
}

/// Transport adapter that replays scripted outcomes and records requests.
pub struct ScriptedAdapter {
	outcomes: Mutex<VecDeque<ScriptedOutcome>>,
	/// Requests the adapter received, in order.
	pub seen: Mutex<Vec<TransportRequest>>,
}
impl ScriptedAdapter {
	pub fn new(outcomes: Vec<ScriptedOutcome>) -> Self {
		Self { outcomes: Mutex::new(outcomes.into()), seen: Mutex::new(Vec::new()) }
	}

	pub fn respond(status: u16) -> ScriptedOutcome {
		ScriptedOutcome::Respond(TransportResponse {
			status,
			headers: BTreeMap::new(),
			body: Vec::new(),
		})
	}

	pub fn respond_with_headers(status: u16, headers: &[(&str, &str)]) -> ScriptedOutcome {
		ScriptedOutcome::Respond(TransportResponse {
			status,
			headers: headers
				.iter()
				.map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
				.collect(),
			body: Vec::new(),
		})
	}
}
impl TransportAdapter for ScriptedAdapter {
	fn kind(&self) -> &str {
		"scripted"
	}

	fn execute(&self, request: TransportRequest) -> TransportFuture<'_, TransportResponse> {
		self.seen.lock().push(request);

		let outcome = self.outcomes.lock().pop_front();

		Box::pin(async move {
			match outcome {
				Some(ScriptedOutcome::Respond(response)) => Ok(response),
				Some(ScriptedOutcome::Fail(message)) => Err(ServiceError::new(
					integration_hub::error::ErrorCategory::External,
					message,
				)),
				None => Err(ServiceError::internal("Scripted adapter ran out of outcomes.")),
			}
		})
	}
}

/// GitHub-shaped descriptor with the capability table the scenarios use.
pub fn github_descriptor() -> ProviderDescriptor {
	ProviderDescriptor::builder(
		ProviderId::new("github").expect("Provider fixture should be valid."),
	)
	.auth_kind(AuthKind::Oauth2AuthCode)
	.capability("repo.write", CapabilityDescriptor::requiring(["repo:write"]))
	.capability(
		"repo.read",
		CapabilityDescriptor::requiring(["repo:read"])
			.with_optional(["repo:write"])
			.with_denied_behavior(DeniedBehavior::Degrade),
	)
	.inheritable(true)
	.build()
	.expect("Descriptor fixture should build.")
}

/// Slack-shaped descriptor for provider-mismatch scenarios.
pub fn slack_descriptor() -> ProviderDescriptor {
	ProviderDescriptor::builder(ProviderId::new("slack").expect("Provider fixture should be valid."))
		.auth_kind(AuthKind::Oauth2AuthCode)
		.build()
		.expect("Descriptor fixture should build.")
}

/// Deterministic service builder: frozen clock, sequential ids, fake strategy.
pub fn service_builder(strategy: Arc<FakeOauthStrategy>) -> ServiceBuilder {
	let mut registry = ProviderRegistry::new();

	registry.register_with_strategy(github_descriptor(), strategy.clone());
	registry.register_with_strategy(slack_descriptor(), strategy);

	Service::builder()
		.registry(registry)
		.clock(Clock::fixed(epoch()))
		.id_gen(IdGenerator::sequential())
		.callback_urls(Arc::new(StaticCallbackResolver))
}

/// Builds the default deterministic service.
pub fn service(strategy: Arc<FakeOauthStrategy>) -> Service {
	service_builder(strategy).build().expect("Service fixture should build.")
}

/// Runs connect + callback and returns the connection id.
pub async fn connected_github_connection(
	service: &Service,
	strategy: &FakeOauthStrategy,
	scope: Scope,
) -> Result<ConnectionId> {
	let _ = strategy;
	let connect = service
		.connect(
			integration_hub::flows::ConnectRequest::new("github", scope.clone())
				.with_grants(["repo:read"]),
		)
		.await?;
	let state = connect.state.expect("Connect should issue a state.");
	let callback = service
		.complete_callback(
			integration_hub::flows::CallbackRequest::new("github", scope)
				.with_code(format!("code-{state}"))
				.with_state(state),
		)
		.await?;

	Ok(callback.connection.id)
}

/// Active bearer credential for runtime tests that bypass the store.
pub fn bearer_credential(token: &str) -> integration_hub::secret::ActiveCredential {
	integration_hub::secret::ActiveCredential::new(
		AuthKind::Oauth2AuthCode,
		CredentialPayload::bearer(token),
	)
}

/// Active API-key credential for signer-selection tests.
pub fn api_key_credential(key: &str) -> integration_hub::secret::ActiveCredential {
	let payload = CredentialPayload {
		token: Some(SecretMaterial::new(key)),
		..CredentialPayload::default()
	};

	integration_hub::secret::ActiveCredential::new(AuthKind::ApiKey, payload)
}

/// Shorthand for a validated user scope.
pub fn user_scope(id: &str) -> Scope {
	Scope::user(id).expect("Scope fixture should be valid.")
}

/// Shorthand for a validated org scope.
pub fn org_scope(id: &str) -> Scope {
	Scope::org(id).expect("Scope fixture should be valid.")
}

/// Advances past a fixed instant, for tests that need a later clock.
pub fn later(by: Duration) -> OffsetDateTime {
	epoch() + by
}
