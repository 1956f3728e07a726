//! Provider descriptor data structures and the capability grant tables.

// self
use crate::{_prelude::*, domain::{AuthKind, ProviderId}};

/// Behavior when optional grants are missing for a capability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeniedBehavior {
	#[default]
	/// The capability is refused outright.
	Block,
	/// The capability proceeds with reduced functionality.
	Degrade,
}
impl DeniedBehavior {
	/// Returns the lowercase label for the behavior.
	pub const fn as_str(self) -> &'static str {
		match self {
			DeniedBehavior::Block => "block",
			DeniedBehavior::Degrade => "degrade",
		}
	}
}

/// Grant requirements for one named provider action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
	/// Grants that must all be present.
	pub required_grants: Vec<String>,
	/// Grants that unlock extra functionality.
	pub optional_grants: Vec<String>,
	/// Behavior when optional grants are missing.
	pub denied_behavior: DeniedBehavior,
}
impl CapabilityDescriptor {
	/// Creates a descriptor requiring the provided grants.
	pub fn requiring<I, S>(grants: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			required_grants: grants.into_iter().map(Into::into).collect(),
			optional_grants: Vec::new(),
			denied_behavior: DeniedBehavior::Block,
		}
	}

	/// Adds optional grants.
	pub fn with_optional<I, S>(mut self, grants: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.optional_grants = grants.into_iter().map(Into::into).collect();

		self
	}

	/// Overrides the denied behavior.
	pub fn with_denied_behavior(mut self, behavior: DeniedBehavior) -> Self {
		self.denied_behavior = behavior;

		self
	}
}

/// Errors raised while constructing or validating descriptors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Capability names cannot be empty.
	#[error("Capability names cannot be empty.")]
	EmptyCapabilityName,
	/// Capability grant entries cannot be empty strings.
	#[error("Capability `{capability}` declares an empty grant entry.")]
	EmptyGrant {
		/// Capability with the offending grant list.
		capability: String,
	},
}
impl From<ProviderDescriptorError> for ServiceError {
	fn from(value: ProviderDescriptorError) -> Self {
		ServiceError::bad_input(value.to_string())
	}
}

/// Immutable provider descriptor consumed by the lifecycle engine and runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Human-readable provider name.
	pub display_name: String,
	/// Default auth protocol used when no strategy override exists.
	pub auth_kind: AuthKind,
	/// Capability grant tables, keyed by capability name.
	pub capabilities: BTreeMap<String, CapabilityDescriptor>,
	/// Whether the provider participates in connection inheritance.
	pub inheritable: bool,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Looks up the grant table for a capability.
	pub fn capability(&self, name: &str) -> Option<&CapabilityDescriptor> {
		self.capabilities.get(name)
	}

	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		for (name, capability) in &self.capabilities {
			if name.is_empty() {
				return Err(ProviderDescriptorError::EmptyCapabilityName);
			}
			if capability
				.required_grants
				.iter()
				.chain(capability.optional_grants.iter())
				.any(String::is_empty)
			{
				return Err(ProviderDescriptorError::EmptyGrant { capability: name.clone() });
			}
		}

		Ok(())
	}
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	id: ProviderId,
	display_name: Option<String>,
	auth_kind: AuthKind,
	capabilities: BTreeMap<String, CapabilityDescriptor>,
	inheritable: bool,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifier.
	pub fn new(id: ProviderId) -> Self {
		Self {
			id,
			display_name: None,
			auth_kind: AuthKind::Oauth2AuthCode,
			capabilities: BTreeMap::new(),
			inheritable: false,
		}
	}

	/// Sets the human-readable name.
	pub fn display_name(mut self, name: impl Into<String>) -> Self {
		self.display_name = Some(name.into());

		self
	}

	/// Sets the default auth kind.
	pub fn auth_kind(mut self, kind: AuthKind) -> Self {
		self.auth_kind = kind;

		self
	}

	/// Registers a capability grant table.
	pub fn capability(mut self, name: impl Into<String>, descriptor: CapabilityDescriptor) -> Self {
		self.capabilities.insert(name.into(), descriptor);

		self
	}

	/// Marks the provider as participating in inheritance.
	pub fn inheritable(mut self, inheritable: bool) -> Self {
		self.inheritable = inheritable;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let display_name = self.display_name.unwrap_or_else(|| self.id.to_string());
		let descriptor = ProviderDescriptor {
			id: self.id,
			display_name,
			auth_kind: self.auth_kind,
			capabilities: self.capabilities,
			inheritable: self.inheritable,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn builder_defaults_display_name_to_id() {
		let descriptor = ProviderDescriptor::builder(
			ProviderId::new("github").expect("Provider fixture should be valid."),
		)
		.capability("repo.read", CapabilityDescriptor::requiring(["repo:read"]))
		.build()
		.expect("Descriptor should build successfully.");

		assert_eq!(descriptor.display_name, "github");
		assert!(descriptor.capability("repo.read").is_some());
		assert!(descriptor.capability("repo.write").is_none());
	}

	#[test]
	fn empty_grants_are_rejected() {
		let err = ProviderDescriptor::builder(
			ProviderId::new("github").expect("Provider fixture should be valid."),
		)
		.capability("repo.read", CapabilityDescriptor::requiring([""]))
		.build()
		.expect_err("Empty grant entries must be rejected.");

		assert!(matches!(err, ProviderDescriptorError::EmptyGrant { .. }));
	}
}
