//! Deterministic sync run planner.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	domain::{CheckpointId, ConnectionId, ProviderId, Scope, SyncBindingId, SyncDirection},
	error::{ErrorCategory, TextCode},
	flows::Service,
	sync::{SyncCheckpoint, build_idempotency_seed},
};

/// Limit bounds applied to plan requests.
pub const MIN_PLAN_LIMIT: u32 = 1;
/// Upper bound on a plan's change budget.
pub const MAX_PLAN_LIMIT: u32 = 1000;
/// Default change budget when the caller does not pick one.
pub const DEFAULT_PLAN_LIMIT: u32 = 100;

/// Binding between an external object stream and an internal model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBinding {
	/// Binding identifier.
	pub id: SyncBindingId,
	/// Provider the stream belongs to.
	pub provider_id: ProviderId,
	/// Internal actor the stream is for.
	pub scope: Scope,
	/// Connection the stream rides on, when credentialed.
	pub connection_id: Option<ConnectionId>,
	/// Source object the stream reads.
	pub source_object: String,
	/// Target model the stream writes.
	pub target_model: String,
}
impl SyncBinding {
	/// Validates the binding shape.
	pub fn validate(&self) -> Result<()> {
		self.scope.validate()?;

		if self.source_object.trim().is_empty() {
			return Err(ServiceError::bad_input("Sync binding source object is required."));
		}
		if self.target_model.trim().is_empty() {
			return Err(ServiceError::bad_input("Sync binding target model is required."));
		}

		Ok(())
	}
}

/// Sync run mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunMode {
	#[default]
	/// Continue from the latest checkpoint.
	Incremental,
	/// Re-read the stream from the beginning.
	Full,
}
impl SyncRunMode {
	/// Returns the lowercase label for the mode.
	pub const fn as_str(self) -> &'static str {
		match self {
			SyncRunMode::Incremental => "incremental",
			SyncRunMode::Full => "full",
		}
	}
}

/// Inputs to [`Service::plan_sync_run`].
#[derive(Clone, Debug)]
pub struct PlanSyncRunRequest {
	/// Binding to plan for.
	pub binding: SyncBinding,
	/// Stream direction.
	pub direction: SyncDirection,
	/// Run mode.
	pub mode: SyncRunMode,
	/// Change budget; clamped to `[1, 1000]`, default 100.
	pub limit: Option<u32>,
	/// Resume from this checkpoint instead of the latest one.
	pub from_checkpoint_id: Option<CheckpointId>,
	/// Caller metadata copied onto the plan.
	pub metadata: BTreeMap<String, Json>,
}

/// Deterministically planned sync run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunPlan {
	/// Plan identifier.
	pub id: String,
	/// Binding the plan runs against.
	pub binding: SyncBinding,
	/// Stream direction.
	pub direction: SyncDirection,
	/// Run mode.
	pub mode: SyncRunMode,
	/// Checkpoint the run starts from.
	pub checkpoint: SyncCheckpoint,
	/// Change budget for the run.
	pub estimated_changes: u32,
	/// Seed mixed into change idempotency keys.
	pub idempotency_seed: String,
	/// Caller metadata.
	pub metadata: BTreeMap<String, Json>,
	/// Plan creation instant. Excluded from the deterministic hash.
	pub generated_at: OffsetDateTime,
	/// SHA-256 over the plan fields excluding id/hash/generated_at.
	pub deterministic_hash: String,
}

#[derive(Serialize)]
struct PlanHashInput<'a> {
	binding: &'a SyncBinding,
	direction: SyncDirection,
	mode: SyncRunMode,
	cursor: Option<&'a str>,
	sequence: u64,
	source_version: Option<&'a str>,
	estimated_changes: u32,
	idempotency_seed: &'a str,
	metadata: &'a BTreeMap<String, Json>,
}

impl Service {
	/// Plans a sync run: resolves the starting checkpoint and derives the
	/// deterministic plan hash and idempotency seed.
	pub async fn plan_sync_run(&self, request: PlanSyncRunRequest) -> Result<SyncRunPlan> {
		request.binding.validate()?;

		let limit = request
			.limit
			.unwrap_or(DEFAULT_PLAN_LIMIT)
			.clamp(MIN_PLAN_LIMIT, MAX_PLAN_LIMIT);
		let checkpoint = match &request.from_checkpoint_id {
			Some(checkpoint_id) => {
				let checkpoint =
					self.checkpoints.get(checkpoint_id).await?.ok_or_else(|| {
						ServiceError::not_found(format!(
							"Sync checkpoint not found: {checkpoint_id}.",
						))
					})?;

				if !checkpoint.provider_id.matches(&request.binding.provider_id)
					|| checkpoint.scope != request.binding.scope
					|| checkpoint.sync_binding_id != request.binding.id
					|| checkpoint.direction != request.direction
				{
					return Err(ServiceError::new(
						ErrorCategory::Conflict,
						format!(
							"Checkpoint {checkpoint_id} does not belong to binding {} ({}).",
							request.binding.id,
							request.direction,
						),
					)
					.with_text_code(TextCode::SyncCursorConflict));
				}

				checkpoint
			},
			None => match self
				.checkpoints
				.latest(
					&request.binding.provider_id,
					&request.binding.scope,
					&request.binding.id,
					request.direction,
				)
				.await?
			{
				Some(latest) => latest,
				None => SyncCheckpoint::empty(
					self.new_checkpoint_id()?,
					request.binding.provider_id.clone(),
					request.binding.scope.clone(),
					request.binding.id.clone(),
					request.direction,
				),
			},
		};
		let idempotency_seed = build_idempotency_seed(
			&request.binding.id,
			request.direction,
			checkpoint.cursor.as_deref(),
			checkpoint.source_version.as_deref(),
		);
		let hash_input = PlanHashInput {
			binding: &request.binding,
			direction: request.direction,
			mode: request.mode,
			cursor: checkpoint.cursor.as_deref(),
			sequence: checkpoint.sequence,
			source_version: checkpoint.source_version.as_deref(),
			estimated_changes: limit,
			idempotency_seed: &idempotency_seed,
			metadata: &request.metadata,
		};
		let canonical =
			serde_json::to_vec(&hash_input).map_err(|err| ServiceError::internal(err.to_string()))?;
		let deterministic_hash = hex::encode(Sha256::digest(&canonical));

		Ok(SyncRunPlan {
			id: self.id_gen.generate("plan"),
			binding: request.binding,
			direction: request.direction,
			mode: request.mode,
			checkpoint,
			estimated_changes: limit,
			idempotency_seed,
			metadata: request.metadata,
			generated_at: self.clock.now(),
			deterministic_hash,
		})
	}
}
