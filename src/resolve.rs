//! Connection resolution with inheritance policy, and the capability evaluator.

// self
use crate::{
	_prelude::*,
	domain::{Connection, ConnectionId, ConnectionStatus, Scope},
	flows::Service,
	provider::DeniedBehavior,
};

/// Outcome of resolving the connection to use for a (provider, scope) pair.
#[derive(Clone, Debug)]
pub enum ConnectionResolution {
	/// Exactly one active connection matched the scope.
	Direct(Connection),
	/// A connection was found on an ancestor scope by an inheritance policy.
	Inherited(Connection),
	/// Multiple active connections matched; the caller must pick one.
	Ambiguous(Vec<ConnectionId>),
	/// No usable connection exists.
	NotFound,
}
impl ConnectionResolution {
	/// Returns the resolved connection for the unambiguous outcomes.
	pub fn connection(&self) -> Option<&Connection> {
		match self {
			ConnectionResolution::Direct(connection)
			| ConnectionResolution::Inherited(connection) => Some(connection),
			_ => None,
		}
	}
}

/// Grant-based decision for one capability on one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDecision {
	/// Capability that was evaluated.
	pub capability: String,
	/// Whether the capability may proceed.
	pub allowed: bool,
	/// Block or degrade semantics applied to missing grants.
	pub mode: DeniedBehavior,
	/// Grants that were required or optional but absent, sorted.
	pub missing_grants: Vec<String>,
}

impl Service {
	/// Resolves the connection to use for a provider within a scope.
	///
	/// Providers outside the inheritance allowlist resolve to `NotFound`.
	/// One active connection is a direct hit; several are ambiguous and the
	/// caller must name a connection id explicitly. The `Inherited` outcome is
	/// produced by policies that explore ancestor scopes.
	pub async fn resolve_connection(
		&self,
		provider_id: &str,
		scope: &Scope,
	) -> Result<ConnectionResolution> {
		if scope.validate().is_err() || !self.config.inheritance.allows(provider_id) {
			return Ok(ConnectionResolution::NotFound);
		}

		let Ok(entry) = self.registry.resolve(provider_id) else {
			return Ok(ConnectionResolution::NotFound);
		};
		let mut active: Vec<Connection> = self
			.connections
			.list(&entry.descriptor.id, scope)
			.await?
			.into_iter()
			.filter(|connection| connection.status == ConnectionStatus::Active)
			.collect();

		match active.len() {
			0 => Ok(ConnectionResolution::NotFound),
			1 => Ok(ConnectionResolution::Direct(active.remove(0))),
			_ => Ok(ConnectionResolution::Ambiguous(
				active.into_iter().map(|connection| connection.id).collect(),
			)),
		}
	}

	/// Evaluates a capability against the connection's granted set.
	///
	/// Unknown capabilities are blocked. Missing required grants block; missing
	/// optional grants degrade when the capability allows it.
	pub async fn evaluate_capability(
		&self,
		connection_id: &ConnectionId,
		capability: &str,
	) -> Result<CapabilityDecision> {
		let connection = self.get_connection(connection_id).await?;
		let entry = self.registry.resolve(&connection.provider_id)?;
		let Some(descriptor) = entry.descriptor.capability(capability) else {
			return Ok(CapabilityDecision {
				capability: capability.to_owned(),
				allowed: false,
				mode: DeniedBehavior::Block,
				missing_grants: Vec::new(),
			});
		};
		let granted = self
			.grants
			.latest_snapshot(&connection.id)
			.await?
			.map(|snapshot| snapshot.granted)
			.unwrap_or_default();
		let mut missing_required: Vec<String> = descriptor
			.required_grants
			.iter()
			.filter(|grant| !granted.contains(grant))
			.cloned()
			.collect();

		missing_required.sort();

		if !missing_required.is_empty() {
			return Ok(CapabilityDecision {
				capability: capability.to_owned(),
				allowed: false,
				mode: DeniedBehavior::Block,
				missing_grants: missing_required,
			});
		}

		let mut missing_optional: Vec<String> = descriptor
			.optional_grants
			.iter()
			.filter(|grant| !granted.contains(grant))
			.cloned()
			.collect();

		missing_optional.sort();

		if !missing_optional.is_empty() && descriptor.denied_behavior == DeniedBehavior::Degrade {
			return Ok(CapabilityDecision {
				capability: capability.to_owned(),
				allowed: true,
				mode: DeniedBehavior::Degrade,
				missing_grants: missing_optional,
			});
		}

		Ok(CapabilityDecision {
			capability: capability.to_owned(),
			allowed: true,
			mode: descriptor.denied_behavior,
			missing_grants: missing_optional,
		})
	}
}
