//! Installation, subscription, and sync-job status machines plus sync direction.

// self
use crate::{_prelude::*, domain::{ConnectionId, ProviderId, Scope, SyncBindingId}};

/// Direction of a sync stream relative to the internal model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
	/// External records flow into internal models.
	Import,
	/// Internal models flow out to the provider.
	Export,
}
impl SyncDirection {
	/// Returns the lowercase label for the direction.
	pub const fn as_str(self) -> &'static str {
		match self {
			SyncDirection::Import => "import",
			SyncDirection::Export => "export",
		}
	}
}
impl Display for SyncDirection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for SyncDirection {
	type Err = ServiceError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"import" => Ok(SyncDirection::Import),
			"export" => Ok(SyncDirection::Export),
			other => Err(ServiceError::bad_input(format!("Unknown sync direction: {other}."))),
		}
	}
}

/// Lifecycle status of a provider installation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
	/// Installation handshake started but not confirmed.
	Pending,
	/// Confirmed by the provider.
	Installed,
	/// Temporarily suspended (billing, abuse, …).
	Suspended,
	/// Removed. Terminal.
	Removed,
}
impl InstallationStatus {
	/// Checks whether a transition from `self` to `next` is allowed.
	pub fn can_transition(self, next: InstallationStatus) -> bool {
		use InstallationStatus::*;

		match self {
			Pending => matches!(next, Installed | Removed),
			Installed => matches!(next, Suspended | Removed),
			Suspended => matches!(next, Installed | Removed),
			Removed => false,
		}
	}
}

/// Lifecycle status of an event subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
	/// Delivering events.
	Active,
	/// Paused by the user or by backpressure policy.
	Paused,
	/// Cancelled. Terminal.
	Cancelled,
}
impl SubscriptionStatus {
	/// Checks whether a transition from `self` to `next` is allowed.
	pub fn can_transition(self, next: SubscriptionStatus) -> bool {
		use SubscriptionStatus::*;

		match self {
			Active => matches!(next, Paused | Cancelled),
			Paused => matches!(next, Active | Cancelled),
			Cancelled => false,
		}
	}
}

/// Lifecycle status of a queued sync job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobStatus {
	/// Waiting for a worker.
	Queued,
	/// In flight.
	Running,
	/// Finished successfully. Terminal.
	Succeeded,
	/// Finished with an error. Terminal.
	Failed,
	/// Cancelled before completion. Terminal.
	Cancelled,
}
impl SyncJobStatus {
	/// Checks whether a transition from `self` to `next` is allowed.
	pub fn can_transition(self, next: SyncJobStatus) -> bool {
		use SyncJobStatus::*;

		match self {
			Queued => matches!(next, Running | Cancelled),
			Running => matches!(next, Succeeded | Failed | Cancelled),
			Succeeded | Failed | Cancelled => false,
		}
	}
}

/// Provider installation owned by a scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
	/// Installation identifier assigned by the provider.
	pub id: String,
	/// Provider the installation belongs to.
	pub provider_id: ProviderId,
	/// Internal actor owning the installation.
	pub scope: Scope,
	/// Connection the installation rides on, when credentialed.
	pub connection_id: Option<ConnectionId>,
	/// Current status.
	pub status: InstallationStatus,
	/// Last mutation instant.
	pub updated_at: OffsetDateTime,
}

/// Event subscription owned by a scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
	/// Subscription identifier.
	pub id: String,
	/// Provider the subscription targets.
	pub provider_id: ProviderId,
	/// Internal actor owning the subscription.
	pub scope: Scope,
	/// Topics the subscription covers.
	pub topics: Vec<String>,
	/// Current status.
	pub status: SubscriptionStatus,
	/// Last mutation instant.
	pub updated_at: OffsetDateTime,
}

/// Queued sync job for one binding and direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
	/// Job identifier.
	pub id: String,
	/// Binding the job runs against.
	pub sync_binding_id: SyncBindingId,
	/// Direction of the run.
	pub direction: SyncDirection,
	/// Current status.
	pub status: SyncJobStatus,
	/// Failure summary when the job ended in `failed`.
	pub last_error: Option<String>,
	/// Last mutation instant.
	pub updated_at: OffsetDateTime,
}
