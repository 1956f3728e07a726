//! Sync run executor: idempotent change application and checkpoint advancement.

// self
use crate::{
	_prelude::*,
	domain::{LifecycleEvent, SyncDirection, names},
	error::{ErrorCategory, TextCode},
	flows::Service,
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome, redact_sensitive_map},
	sync::{SyncChangeLogEntry, SyncCheckpoint, SyncRunPlan, build_sync_idempotency_key},
};

/// One change observed in a sync stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChange {
	/// Identifier of the external record. Required.
	pub external_id: String,
	/// Source version the change was observed at.
	pub source_version: Option<String>,
	/// New cursor position after this change, when the provider advances it.
	pub cursor: Option<String>,
	/// Change payload. Redacted before persistence.
	pub payload: Json,
	/// Change metadata. Redacted before persistence.
	pub metadata: BTreeMap<String, Json>,
}
impl SyncChange {
	/// Creates a change for the provided external record.
	pub fn new(external_id: impl Into<String>) -> Self {
		Self {
			external_id: external_id.into(),
			source_version: None,
			cursor: None,
			payload: Json::Null,
			metadata: BTreeMap::new(),
		}
	}

	/// Sets the source version.
	pub fn with_source_version(mut self, version: impl Into<String>) -> Self {
		self.source_version = Some(version.into());

		self
	}

	/// Sets the payload.
	pub fn with_payload(mut self, payload: Json) -> Self {
		self.payload = payload;

		self
	}
}

/// Inputs to [`Service::execute_sync_run`].
#[derive(Clone, Debug)]
pub struct ExecuteSyncRunRequest {
	/// Plan produced by the planner.
	pub plan: SyncRunPlan,
	/// Direction the caller intends to run; must match the plan.
	pub direction: SyncDirection,
	/// Changes to apply, in stream order.
	pub changes: Vec<SyncChange>,
	/// Count without persisting or emitting events.
	pub dry_run: bool,
}

/// Outcome of a sync run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunResult {
	/// Changes newly applied.
	pub processed: u32,
	/// Changes skipped as idempotent replays.
	pub skipped: u32,
	/// Checkpoint to resume from.
	pub next_checkpoint: SyncCheckpoint,
	/// True when the run was a dry run.
	pub dry_run: bool,
}

impl Service {
	/// Executes a planned sync run.
	///
	/// Checkpoint advancement is strictly monotonic per (binding, direction);
	/// replayed changes are detected through the change log's idempotency key
	/// and counted as skipped. On failure the checkpoint persisted so far is
	/// the resume point, and its position is echoed in the error metadata.
	pub async fn execute_sync_run(&self, request: ExecuteSyncRunRequest) -> Result<SyncRunResult> {
		const KIND: OpKind = OpKind::SyncRun;

		let span = OpSpan::new(KIND, "execute_sync_run");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.run_sync(request)).await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	async fn run_sync(&self, request: ExecuteSyncRunRequest) -> Result<SyncRunResult> {
		let plan = request.plan;

		plan.binding.validate()?;

		if plan.direction != request.direction {
			return Err(ServiceError::bad_input(format!(
				"Run direction {} does not match the plan's {}.",
				request.direction, plan.direction,
			)));
		}
		if plan.checkpoint.direction != plan.direction
			|| plan.checkpoint.sync_binding_id != plan.binding.id
		{
			return Err(ServiceError::new(
				ErrorCategory::Conflict,
				"Plan checkpoint does not match the binding and direction.",
			)
			.with_text_code(TextCode::SyncCursorConflict));
		}

		let mut checkpoint = plan.checkpoint.clone();
		let mut processed = 0_u32;
		let mut skipped = 0_u32;

		if !request.dry_run {
			self.emit_run_event(&plan, names::SYNC_RUN_STARTED, &checkpoint, processed, skipped)
				.await?;
		}

		for change in &request.changes {
			if change.external_id.trim().is_empty() {
				let error = ServiceError::bad_input("Sync change is missing the external id.")
					.with_metadata("sync_binding_id", plan.binding.id.as_ref())
					.with_metadata("sequence", checkpoint.sequence)
					.with_metadata("processed", processed)
					.with_metadata("skipped", skipped);

				if !request.dry_run {
					self.emit_run_event(
						&plan,
						names::SYNC_RUN_FAILED,
						&checkpoint,
						processed,
						skipped,
					)
					.await?;
				}

				return Err(error);
			}

			checkpoint.sequence += 1;
			checkpoint.source_version = change.source_version.clone();

			if let Some(cursor) = &change.cursor {
				checkpoint.cursor = Some(cursor.clone());
			}
			if request.dry_run {
				processed += 1;

				continue;
			}

			let idempotency_key = build_sync_idempotency_key(
				&plan.binding.id,
				plan.direction,
				&change.external_id,
				change.source_version.as_deref(),
			);
			let newly_applied = self
				.change_log
				.append(SyncChangeLogEntry {
					sync_binding_id: plan.binding.id.clone(),
					direction: plan.direction,
					external_id: change.external_id.clone(),
					source_version: change.source_version.clone(),
					idempotency_key: idempotency_key.clone(),
					payload: redact_json(&change.payload),
					metadata: redact_sensitive_map(&change.metadata),
					occurred_at: self.clock.now(),
				})
				.await?;

			if newly_applied {
				processed += 1;
			} else {
				skipped += 1;
			}

			self.checkpoints.save(checkpoint.clone()).await?;

			if newly_applied {
				self.emit_run_event(
					&plan,
					names::SYNC_RUN_CHECKPOINT,
					&checkpoint,
					processed,
					skipped,
				)
				.await?;
			}
		}

		if !request.dry_run {
			self.emit_run_event(&plan, names::SYNC_RUN_SUCCEEDED, &checkpoint, processed, skipped)
				.await?;
		}

		Ok(SyncRunResult { processed, skipped, next_checkpoint: checkpoint, dry_run: request.dry_run })
	}

	async fn emit_run_event(
		&self,
		plan: &SyncRunPlan,
		name: &'static str,
		checkpoint: &SyncCheckpoint,
		processed: u32,
		skipped: u32,
	) -> Result<()> {
		let event = LifecycleEvent::new(
			self.new_event_id()?,
			name,
			plan.binding.provider_id.clone(),
			plan.binding.scope.clone(),
			self.clock.now(),
		)
		.with_source("sync")
		.with_metadata(BTreeMap::from_iter([
			("sync_binding_id".to_owned(), Json::String(plan.binding.id.to_string())),
			("direction".to_owned(), Json::String(plan.direction.as_str().to_owned())),
			("sequence".to_owned(), Json::from(checkpoint.sequence)),
			("processed".to_owned(), Json::from(processed)),
			("skipped".to_owned(), Json::from(skipped)),
		]));

		self.emit_event(event).await
	}
}

fn redact_json(payload: &Json) -> Json {
	match payload {
		Json::Object(map) => {
			let tree: BTreeMap<String, Json> =
				map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

			Json::Object(redact_sensitive_map(&tree).into_iter().collect())
		},
		other => other.clone(),
	}
}
