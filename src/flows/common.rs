//! Shared helpers for lifecycle flows: callback URL resolution, redirect
//! policy, and refresh backoff scheduling.

// self
use crate::{
	_prelude::*,
	config::ServiceConfig,
	domain::{ConnectionId, GrantSet, ProviderId, Scope},
	ledger::CallbackFlow,
};

/// Metadata key callers use to tighten redirect validation per request.
pub const STRICT_REDIRECT_VALIDATION_KEY: &str = "strict_redirect_validation";
/// Metadata key echoing the effective requested grants after state restore.
pub const REQUESTED_GRANTS_KEY: &str = "requested_grants";

/// Boxed future returned by [`CallbackUrlResolver::resolve`].
pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = Result<Url>> + 'a + Send>>;

/// Inputs to [`CallbackUrlResolver::resolve`].
#[derive(Clone, Debug)]
pub struct CallbackUrlRequest {
	/// Flow the URL is resolved for.
	pub flow: CallbackFlow,
	/// Provider being connected.
	pub provider_id: ProviderId,
	/// Internal actor the flow is for.
	pub scope: Scope,
	/// Grants the flow asked for.
	pub requested_grants: GrantSet,
	/// Connection being reconsented, for reconsent flows.
	pub connection_id: Option<ConnectionId>,
	/// Caller metadata.
	pub metadata: BTreeMap<String, Json>,
}

/// Resolves the redirect URI when a flow starts without one.
pub trait CallbackUrlResolver
where
	Self: Send + Sync,
{
	/// Resolves the callback URL for the flow.
	fn resolve(&self, request: CallbackUrlRequest) -> ResolverFuture<'_>;
}

/// Computes the effective redirect requirement for one callback.
///
/// The configured `require_callback_redirect` flag is the floor: per-request
/// metadata may only tighten it via `strict_redirect_validation=true`, never
/// relax it.
pub fn require_redirect(config: &ServiceConfig, metadata: &BTreeMap<String, Json>) -> bool {
	let tightened = metadata
		.get(STRICT_REDIRECT_VALIDATION_KEY)
		.and_then(Json::as_bool)
		.unwrap_or(false);

	config.oauth.require_callback_redirect || tightened
}

/// Schedules the wait before another refresh attempt after a failure.
pub trait RefreshBackoffScheduler
where
	Self: Send + Sync,
{
	/// Delay before the next attempt, given consecutive failures so far.
	fn next_delay(&self, failures: u32) -> Duration;
}

/// Default exponential refresh backoff.
#[derive(Clone, Debug)]
pub struct ExponentialRefreshBackoff {
	/// Delay after the first failure.
	pub base: Duration,
	/// Factor applied per additional failure.
	pub multiplier: f64,
	/// Upper bound on the computed delay.
	pub max: Duration,
}
impl Default for ExponentialRefreshBackoff {
	fn default() -> Self {
		Self { base: Duration::seconds(30), multiplier: 2.0, max: Duration::hours(1) }
	}
}
impl RefreshBackoffScheduler for ExponentialRefreshBackoff {
	fn next_delay(&self, failures: u32) -> Duration {
		let exponent = failures.saturating_sub(1).min(20);
		let factor = self.multiplier.powi(exponent as i32);
		let raw = self.base.as_seconds_f64() * factor;

		Duration::seconds_f64(raw.min(self.max.as_seconds_f64()))
	}
}

/// Serializes a grant set into the metadata echo shape.
pub fn grants_metadata(grants: &GrantSet) -> Json {
	Json::Array(grants.iter().map(|grant| Json::String(grant.to_owned())).collect())
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;
	use crate::config::{OauthConfig, ServiceConfig};

	fn config(require: bool) -> ServiceConfig {
		ServiceConfig { oauth: OauthConfig { require_callback_redirect: require }, ..ServiceConfig::default() }
	}

	#[test]
	fn metadata_can_tighten_but_not_relax() {
		let strict = BTreeMap::from_iter([(
			STRICT_REDIRECT_VALIDATION_KEY.to_owned(),
			json!(true),
		)]);
		let relaxed = BTreeMap::from_iter([(
			STRICT_REDIRECT_VALIDATION_KEY.to_owned(),
			json!(false),
		)]);

		assert!(require_redirect(&config(false), &strict));
		assert!(!require_redirect(&config(false), &relaxed));
		// A relaxing request cannot lower the configured floor.
		assert!(require_redirect(&config(true), &relaxed));
		assert!(require_redirect(&config(true), &BTreeMap::new()));
	}

	#[test]
	fn refresh_backoff_grows_and_caps() {
		let backoff = ExponentialRefreshBackoff::default();

		assert_eq!(backoff.next_delay(1), Duration::seconds(30));
		assert_eq!(backoff.next_delay(2), Duration::seconds(60));
		assert_eq!(backoff.next_delay(3), Duration::seconds(120));
		assert_eq!(backoff.next_delay(30), Duration::hours(1));
	}
}
