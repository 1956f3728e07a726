//! Sync conflict ledger: record/resolve with policy hooks and audit events.

// self
use crate::{
	_prelude::*,
	domain::{ConflictId, LifecycleEvent, ProviderId, Scope, SyncBindingId, names},
	error::ErrorCategory,
	flows::Service,
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome, redact_sensitive_map},
};

/// Lifecycle status of a recorded conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
	/// Awaiting resolution.
	Pending,
	/// Resolved by an operator or policy.
	Resolved,
	/// Explicitly ignored.
	Ignored,
}
impl ConflictStatus {
	/// Returns the lowercase label for the status.
	pub const fn as_str(self) -> &'static str {
		match self {
			ConflictStatus::Pending => "pending",
			ConflictStatus::Resolved => "resolved",
			ConflictStatus::Ignored => "ignored",
		}
	}
}

/// Action applied when resolving a conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionAction {
	/// Mark the conflict resolved.
	Resolve,
	/// Mark the conflict ignored.
	Ignore,
	/// Send the conflict back to pending for another attempt.
	Retry,
}
impl ConflictResolutionAction {
	/// Status the action maps to.
	pub const fn target_status(self) -> ConflictStatus {
		match self {
			ConflictResolutionAction::Resolve => ConflictStatus::Resolved,
			ConflictResolutionAction::Ignore => ConflictStatus::Ignored,
			ConflictResolutionAction::Retry => ConflictStatus::Pending,
		}
	}

	/// Audit event name the action emits.
	pub const fn event_name(self) -> &'static str {
		match self {
			ConflictResolutionAction::Resolve => names::SYNC_CONFLICT_RESOLVED,
			ConflictResolutionAction::Ignore => names::SYNC_CONFLICT_IGNORED,
			ConflictResolutionAction::Retry => names::SYNC_CONFLICT_RETRIED,
		}
	}
}

/// Divergence between a source record and its target model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
	/// Conflict identifier.
	pub id: ConflictId,
	/// Provider the conflicting stream belongs to.
	pub provider_id: ProviderId,
	/// Internal actor the stream is for.
	pub scope: Scope,
	/// Binding the conflict arose in.
	pub sync_binding_id: SyncBindingId,
	/// Source object name the record came from.
	pub source_object: String,
	/// Identifier of the external record.
	pub external_id: String,
	/// Lifecycle status.
	pub status: ConflictStatus,
	/// Why the records diverged.
	pub reason: String,
	/// Policy label attached by the hook, when any.
	pub policy: Option<String>,
	/// Redacted source-side payload.
	pub source_payload: Json,
	/// Redacted target-side payload.
	pub target_payload: Json,
	/// Resolution note.
	pub resolution: Option<String>,
	/// Operator or policy that resolved the conflict.
	pub resolved_by: Option<String>,
	/// Resolution instant.
	pub resolved_at: Option<OffsetDateTime>,
	/// Record instant.
	pub recorded_at: OffsetDateTime,
}

/// Hook that lets deployments adjust conflicts as they are recorded/resolved.
pub trait ConflictPolicyHook
where
	Self: Send + Sync,
{
	/// May annotate or adjust a conflict before it is persisted.
	fn apply_record_policy(&self, conflict: SyncConflict) -> Result<SyncConflict> {
		Ok(conflict)
	}

	/// May override the requested resolution action.
	fn apply_resolution_policy(
		&self,
		conflict: &SyncConflict,
		action: ConflictResolutionAction,
	) -> Result<ConflictResolutionAction> {
		let _ = conflict;

		Ok(action)
	}
}

/// Inputs to [`Service::record_sync_conflict`].
#[derive(Clone, Debug)]
pub struct RecordConflictRequest {
	/// Provider the conflicting stream belongs to.
	pub provider_id: ProviderId,
	/// Internal actor the stream is for.
	pub scope: Scope,
	/// Binding the conflict arose in.
	pub sync_binding_id: SyncBindingId,
	/// Source object name.
	pub source_object: String,
	/// External record identifier.
	pub external_id: String,
	/// Why the records diverged.
	pub reason: String,
	/// Policy label supplied by the caller.
	pub policy: Option<String>,
	/// Source-side payload (redacted before persistence).
	pub source_payload: Json,
	/// Target-side payload (redacted before persistence).
	pub target_payload: Json,
}

/// Inputs to [`Service::resolve_sync_conflict`].
#[derive(Clone, Debug)]
pub struct ResolveConflictRequest {
	/// Conflict being resolved.
	pub conflict_id: ConflictId,
	/// Binding the caller believes the conflict belongs to.
	pub sync_binding_id: SyncBindingId,
	/// Scope the caller believes the conflict belongs to.
	pub scope: Scope,
	/// Requested action.
	pub action: ConflictResolutionAction,
	/// Resolution note.
	pub resolution: Option<String>,
	/// Operator or policy resolving the conflict.
	pub resolved_by: Option<String>,
}

impl Service {
	/// Records a divergence in the conflict ledger and emits the audit event.
	pub async fn record_sync_conflict(
		&self,
		request: RecordConflictRequest,
	) -> Result<SyncConflict> {
		const KIND: OpKind = OpKind::SyncConflict;

		let span = OpSpan::new(KIND, "record_sync_conflict");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				request.scope.validate()?;

				if request.source_object.trim().is_empty() {
					return Err(ServiceError::bad_input("Conflict source object is required."));
				}
				if request.external_id.trim().is_empty() {
					return Err(ServiceError::bad_input("Conflict external id is required."));
				}
				if request.reason.trim().is_empty() {
					return Err(ServiceError::bad_input("Conflict reason is required."));
				}

				let now = self.clock.now();
				let mut conflict = SyncConflict {
					id: self.new_conflict_id()?,
					provider_id: request.provider_id,
					scope: request.scope,
					sync_binding_id: request.sync_binding_id,
					source_object: request.source_object.trim().to_owned(),
					external_id: request.external_id.trim().to_owned(),
					status: ConflictStatus::Pending,
					reason: request.reason,
					policy: request.policy,
					source_payload: redact_payload(request.source_payload),
					target_payload: redact_payload(request.target_payload),
					resolution: None,
					resolved_by: None,
					resolved_at: None,
					recorded_at: now,
				};

				if let Some(hook) = &self.conflict_policy {
					conflict = hook.apply_record_policy(conflict)?;
					// The hook can annotate but never resurrect a non-pending status.
					conflict.status = ConflictStatus::Pending;
				}

				self.conflicts.append(conflict.clone()).await?;
				self.emit_event(conflict_event(
					&conflict,
					names::SYNC_CONFLICT_RECORDED,
					self.clock.now(),
					self.new_event_id()?,
				))
				.await?;

				Ok(conflict)
			})
			.await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// Resolves, ignores, or retries a recorded conflict.
	///
	/// Scope and binding mismatches fail closed; conflicts that already left
	/// `pending` are returned unchanged.
	pub async fn resolve_sync_conflict(
		&self,
		request: ResolveConflictRequest,
	) -> Result<SyncConflict> {
		const KIND: OpKind = OpKind::SyncConflict;

		let span = OpSpan::new(KIND, "resolve_sync_conflict");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				request.scope.validate()?;

				let mut conflict = self
					.conflicts
					.get(&request.conflict_id)
					.await?
					.ok_or_else(|| {
						ServiceError::not_found(format!(
							"Sync conflict not found: {}.",
							request.conflict_id,
						))
					})?;

				if conflict.sync_binding_id != request.sync_binding_id
					|| conflict.scope != request.scope
				{
					return Err(ServiceError::new(
						ErrorCategory::Authz,
						"Conflict scope mismatch.",
					)
					.with_metadata("conflict_id", request.conflict_id.as_ref())
					.with_metadata("sync_binding_id", request.sync_binding_id.as_ref()));
				}
				if conflict.status != ConflictStatus::Pending {
					return Ok(conflict);
				}

				let mut action = request.action;

				if let Some(hook) = &self.conflict_policy {
					action = hook.apply_resolution_policy(&conflict, action)?;
				}

				let now = self.clock.now();

				conflict.status = action.target_status();
				conflict.resolution = request.resolution;
				conflict.resolved_by = request.resolved_by;
				conflict.resolved_at = match action {
					ConflictResolutionAction::Retry => None,
					_ => Some(now),
				};

				self.conflicts.update(conflict.clone()).await?;
				self.emit_event(conflict_event(
					&conflict,
					action.event_name(),
					now,
					self.new_event_id()?,
				))
				.await?;

				Ok(conflict)
			})
			.await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}
}

fn redact_payload(payload: Json) -> Json {
	match payload {
		Json::Object(map) => {
			let tree: BTreeMap<String, Json> = map.into_iter().collect();

			Json::Object(redact_sensitive_map(&tree).into_iter().collect())
		},
		other => other,
	}
}

fn conflict_event(
	conflict: &SyncConflict,
	name: &'static str,
	now: OffsetDateTime,
	event_id: crate::domain::EventId,
) -> LifecycleEvent {
	LifecycleEvent::new(event_id, name, conflict.provider_id.clone(), conflict.scope.clone(), now)
		.with_source("sync")
		.with_metadata(BTreeMap::from_iter([
			("sync_binding_id".to_owned(), Json::String(conflict.sync_binding_id.to_string())),
			("external_id".to_owned(), Json::String(conflict.external_id.clone())),
			("conflict_status".to_owned(), Json::String(conflict.status.as_str().to_owned())),
		]))
}
