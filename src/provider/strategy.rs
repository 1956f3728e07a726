//! Auth strategy hooks that providers implement to mint and maintain credentials.
//!
//! Strategies are the only place provider protocol knowledge lives. The
//! lifecycle engine drives them through crate-owned request/response records so
//! implementations stay decoupled from any HTTP client.

// self
use crate::{
	_prelude::*,
	domain::{AuthKind, ConnectionId, ExternalAccountId, GrantSet, ProviderId, Scope},
	secret::CredentialPayload,
};

/// Boxed future returned by [`AuthStrategy`] hooks.
pub type StrategyFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Protocol hook set implemented per provider (or injected for tests).
///
/// `begin`/`complete` drive interactive flows; `refresh` rotates credentials;
/// `revoke` is best-effort and defaults to a no-op for providers without a
/// revocation endpoint.
pub trait AuthStrategy
where
	Self: Send + Sync,
{
	/// Auth protocol the strategy implements.
	fn kind(&self) -> AuthKind;

	/// Starts an authorization round-trip, returning the URL to send the user to.
	fn begin(&self, request: BeginAuthRequest) -> StrategyFuture<'_, BeginAuthResponse>;

	/// Completes an authorization round-trip with the provider.
	fn complete(&self, request: CompleteAuthRequest) -> StrategyFuture<'_, CompleteAuthResponse>;

	/// Rotates the credential without user interaction.
	fn refresh(&self, request: RefreshAuthRequest) -> StrategyFuture<'_, RefreshAuthResponse>;

	/// Best-effort provider-side revocation.
	fn revoke(&self, request: RevokeAuthRequest) -> StrategyFuture<'_, ()> {
		let _ = request;

		Box::pin(async { Ok(()) })
	}
}

impl core::fmt::Debug for dyn AuthStrategy {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("AuthStrategy").field("kind", &self.kind()).finish()
	}
}

/// Inputs to [`AuthStrategy::begin`].
#[derive(Clone, Debug)]
pub struct BeginAuthRequest {
	/// Provider being connected.
	pub provider_id: ProviderId,
	/// Internal actor the connection is for.
	pub scope: Scope,
	/// Redirect URI the callback will land on, when the flow uses one.
	pub redirect_uri: Option<Url>,
	/// Single-use state value, when the flow requires callback state.
	pub state: Option<String>,
	/// Grants the caller asked for.
	pub requested_grants: GrantSet,
	/// Caller metadata echoed through the flow.
	pub metadata: BTreeMap<String, Json>,
}

/// Outputs of [`AuthStrategy::begin`].
#[derive(Clone, Debug)]
pub struct BeginAuthResponse {
	/// URL the end user must visit, when the flow is interactive.
	pub url: Option<Url>,
	/// State value echoed back for callback correlation.
	pub state: Option<String>,
	/// Grants the flow will request.
	pub requested_grants: GrantSet,
	/// Strategy metadata merged into the flow result.
	pub metadata: BTreeMap<String, Json>,
}

/// Inputs to [`AuthStrategy::complete`].
#[derive(Clone, Debug)]
pub struct CompleteAuthRequest {
	/// Provider being connected.
	pub provider_id: ProviderId,
	/// Internal actor the connection is for.
	pub scope: Scope,
	/// Authorization code returned by the provider.
	pub code: Option<String>,
	/// State value returned by the provider.
	pub state: Option<String>,
	/// Redirect URI the callback landed on.
	pub redirect_uri: Option<Url>,
	/// Grants the original begin call asked for.
	pub requested_grants: GrantSet,
	/// Caller metadata restored from the state record.
	pub metadata: BTreeMap<String, Json>,
}

/// Outputs of [`AuthStrategy::complete`].
#[derive(Clone, Debug)]
pub struct CompleteAuthResponse {
	/// Account identifier at the provider. Required by the lifecycle engine.
	pub external_account_id: Option<ExternalAccountId>,
	/// Decrypted credential fields to seal and persist.
	pub payload: CredentialPayload,
	/// Grants the provider actually issued.
	pub granted_grants: GrantSet,
	/// Expiry instant, when the provider communicated one.
	pub expires_at: Option<OffsetDateTime>,
	/// True when the payload carries a refresh secret.
	pub refreshable: bool,
}

/// Inputs to [`AuthStrategy::refresh`].
#[derive(Clone, Debug)]
pub struct RefreshAuthRequest {
	/// Provider owning the credential.
	pub provider_id: ProviderId,
	/// Connection owning the credential.
	pub connection_id: ConnectionId,
	/// Decrypted current payload, when the caller supplied one.
	pub current: Option<CredentialPayload>,
	/// Caller metadata.
	pub metadata: BTreeMap<String, Json>,
}

/// Outputs of [`AuthStrategy::refresh`].
#[derive(Clone, Debug)]
pub struct RefreshAuthResponse {
	/// Rotated credential fields to seal and persist.
	pub payload: CredentialPayload,
	/// Updated granted set, when the provider reported one.
	pub granted_grants: Option<GrantSet>,
	/// Expiry instant, when the provider communicated one.
	pub expires_at: Option<OffsetDateTime>,
	/// True when the payload carries a refresh secret.
	pub refreshable: bool,
}

/// Inputs to [`AuthStrategy::revoke`].
#[derive(Clone, Debug)]
pub struct RevokeAuthRequest {
	/// Provider owning the credential.
	pub provider_id: ProviderId,
	/// Connection being revoked.
	pub connection_id: ConnectionId,
	/// Decrypted current payload, when available.
	pub current: Option<CredentialPayload>,
}
