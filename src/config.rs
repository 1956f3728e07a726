//! Layered service configuration: runtime overrides beat loaded values beat defaults.

// self
use crate::_prelude::*;

/// Default service name used in telemetry fields.
pub const DEFAULT_SERVICE_NAME: &str = "integration-hub";

/// Inheritance policy knobs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceConfig {
	/// Providers allowlisted for connection inheritance lookups.
	pub enabled_providers: Vec<String>,
}
impl InheritanceConfig {
	/// Returns true when the provider participates in inheritance resolution.
	pub fn allows(&self, provider_id: &str) -> bool {
		self.enabled_providers.iter().any(|candidate| candidate.eq_ignore_ascii_case(provider_id))
	}
}

/// OAuth-specific policy knobs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OauthConfig {
	/// When true, callbacks without a redirect URI are rejected.
	pub require_callback_redirect: bool,
}

/// Fully resolved service configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
	/// Service name used in telemetry fields.
	pub service_name: String,
	/// Inheritance policy.
	pub inheritance: InheritanceConfig,
	/// OAuth policy.
	pub oauth: OauthConfig,
}
impl Default for ServiceConfig {
	fn default() -> Self {
		Self {
			service_name: DEFAULT_SERVICE_NAME.into(),
			inheritance: InheritanceConfig::default(),
			oauth: OauthConfig::default(),
		}
	}
}

/// Sparse configuration fragment produced by loaders or runtime overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFragment {
	/// Overrides the service name when set.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub service_name: Option<String>,
	/// Overrides the inheritance allowlist when set.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub inheritance_enabled_providers: Option<Vec<String>>,
	/// Overrides the redirect requirement when set.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub oauth_require_callback_redirect: Option<bool>,
}
impl ConfigFragment {
	fn apply(&self, config: &mut ServiceConfig) {
		if let Some(name) = &self.service_name {
			config.service_name = name.clone();
		}
		if let Some(providers) = &self.inheritance_enabled_providers {
			config.inheritance.enabled_providers = providers.clone();
		}
		if let Some(require) = self.oauth_require_callback_redirect {
			config.oauth.require_callback_redirect = require;
		}
	}
}

/// Precedence stack resolving a [`ServiceConfig`].
#[derive(Clone, Debug, Default)]
pub struct ConfigLayers {
	/// Fragment produced by an external loader.
	pub loaded: Option<ConfigFragment>,
	/// Fragment supplied at construction/runtime.
	pub runtime: Option<ConfigFragment>,
}
impl ConfigLayers {
	/// Resolves the effective configuration (runtime > loaded > defaults).
	pub fn resolve(&self) -> ServiceConfig {
		let mut config = ServiceConfig::default();

		if let Some(loaded) = &self.loaded {
			loaded.apply(&mut config);
		}
		if let Some(runtime) = &self.runtime {
			runtime.apply(&mut config);
		}

		config
	}
}
