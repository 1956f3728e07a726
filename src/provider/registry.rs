//! Sorted provider lookup and auth strategy resolution.

// self
use crate::{
	_prelude::*,
	domain::AuthKind,
	error::{ErrorCategory, TextCode},
	provider::{AuthStrategy, ProviderDescriptor},
};

/// Registered provider: descriptor plus optional strategy override.
#[derive(Clone)]
pub struct ProviderEntry {
	/// Validated descriptor.
	pub descriptor: ProviderDescriptor,
	/// Provider-supplied strategy; overrides any registry-level default.
	pub strategy: Option<Arc<dyn AuthStrategy>>,
}
impl Debug for ProviderEntry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProviderEntry")
			.field("descriptor", &self.descriptor)
			.field("strategy_set", &self.strategy.is_some())
			.finish()
	}
}

/// Sorted, case-insensitive provider registry.
///
/// Lookups lowercase the identifier so `GitHub` and `github` resolve to the
/// same entry. Default strategies are registered per [`AuthKind`] and used
/// when a provider carries no override of its own.
#[derive(Default)]
pub struct ProviderRegistry {
	entries: BTreeMap<String, ProviderEntry>,
	default_strategies: BTreeMap<AuthKind, Arc<dyn AuthStrategy>>,
}
impl ProviderRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a provider without a strategy override.
	pub fn register(&mut self, descriptor: ProviderDescriptor) {
		self.entries.insert(
			descriptor.id.to_ascii_lowercase(),
			ProviderEntry { descriptor, strategy: None },
		);
	}

	/// Registers a provider with its own strategy.
	pub fn register_with_strategy(
		&mut self,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn AuthStrategy>,
	) {
		self.entries.insert(
			descriptor.id.to_ascii_lowercase(),
			ProviderEntry { descriptor, strategy: Some(strategy) },
		);
	}

	/// Registers the default strategy used for providers of the given kind.
	pub fn register_default_strategy(&mut self, kind: AuthKind, strategy: Arc<dyn AuthStrategy>) {
		self.default_strategies.insert(kind, strategy);
	}

	/// Resolves a provider entry, case-insensitively.
	pub fn resolve(&self, provider_id: &str) -> Result<&ProviderEntry> {
		self.entries.get(&provider_id.to_ascii_lowercase()).ok_or_else(|| {
			ServiceError::new(
				ErrorCategory::NotFound,
				format!("Provider is not registered: {provider_id}."),
			)
			.with_text_code(TextCode::ProviderNotFound)
			.with_metadata("provider_id", provider_id)
		})
	}

	/// Resolves the strategy for a provider: the provider-supplied override
	/// wins, then the registry default for the descriptor's auth kind.
	pub fn resolve_strategy(&self, provider_id: &str) -> Result<Arc<dyn AuthStrategy>> {
		let entry = self.resolve(provider_id)?;

		if let Some(strategy) = &entry.strategy {
			return Ok(strategy.clone());
		}

		self.default_strategies.get(&entry.descriptor.auth_kind).cloned().ok_or_else(|| {
			ServiceError::new(
				ErrorCategory::Operation,
				format!(
					"No auth strategy is available for provider {provider_id} ({}).",
					entry.descriptor.auth_kind,
				),
			)
			.with_text_code(TextCode::EmbeddedAuthUnsupported)
			.with_metadata("provider_id", provider_id)
		})
	}

	/// Iterator over descriptors in identifier order.
	pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
		self.entries.values().map(|entry| &entry.descriptor)
	}

	/// Number of registered providers.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns true when no providers are registered.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
impl Debug for ProviderRegistry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProviderRegistry")
			.field("providers", &self.entries.keys().collect::<Vec<_>>())
			.field("default_strategy_kinds", &self.default_strategies.keys().collect::<Vec<_>>())
			.finish()
	}
}
