//! Sync subsystem integration: planning, idempotent execution, conflicts.

mod common;

// std
use std::sync::Arc;
// self
use common::{FakeOauthStrategy, org_scope, service, service_builder};
use integration_hub::{
	domain::{SyncBindingId, SyncDirection},
	error::{ErrorCategory, TextCode},
	flows::Service,
	store::{ChangeLogStore, MemoryChangeLogStore},
	sync::{
		ConflictPolicyHook, ConflictResolutionAction, ConflictStatus, ExecuteSyncRunRequest,
		PlanSyncRunRequest, RecordConflictRequest, ResolveConflictRequest, SyncBinding,
		SyncChange, SyncConflict, SyncRunMode, SyncRunPlan,
	},
};
use serde_json::json;

fn binding(id: &str) -> SyncBinding {
	SyncBinding {
		id: SyncBindingId::new(id).expect("Binding fixture should be valid."),
		provider_id: integration_hub::domain::ProviderId::new("github")
			.expect("Provider fixture should be valid."),
		scope: org_scope("acme"),
		connection_id: None,
		source_object: "issues".into(),
		target_model: "ticket".into(),
	}
}

fn plan_request(binding_id: &str) -> PlanSyncRunRequest {
	PlanSyncRunRequest {
		binding: binding(binding_id),
		direction: SyncDirection::Import,
		mode: SyncRunMode::Incremental,
		limit: None,
		from_checkpoint_id: None,
		metadata: Default::default(),
	}
}

async fn plan(service: &Service, binding_id: &str) -> SyncRunPlan {
	service
		.plan_sync_run(plan_request(binding_id))
		.await
		.expect("Planning should succeed.")
}

#[tokio::test]
async fn plans_are_deterministic_for_equal_positions() {
	let service = service(Arc::new(FakeOauthStrategy::default()));
	let lhs = plan(&service, "bind-1").await;
	let rhs = plan(&service, "bind-1").await;

	assert_eq!(lhs.estimated_changes, 100);
	assert_eq!(lhs.deterministic_hash, rhs.deterministic_hash);
	assert_eq!(lhs.idempotency_seed, rhs.idempotency_seed);
	assert_ne!(lhs.id, rhs.id, "Plan identifiers stay unique.");

	let other_direction = service
		.plan_sync_run(PlanSyncRunRequest {
			direction: SyncDirection::Export,
			..plan_request("bind-1")
		})
		.await
		.expect("Planning should succeed.");

	assert_ne!(lhs.deterministic_hash, other_direction.deterministic_hash);
}

#[tokio::test]
async fn plan_limit_is_clamped() {
	let service = service(Arc::new(FakeOauthStrategy::default()));
	let oversized = service
		.plan_sync_run(PlanSyncRunRequest { limit: Some(10_000), ..plan_request("bind-1") })
		.await
		.expect("Planning should succeed.");
	let undersized = service
		.plan_sync_run(PlanSyncRunRequest { limit: Some(0), ..plan_request("bind-1") })
		.await
		.expect("Planning should succeed.");

	assert_eq!(oversized.estimated_changes, 1000);
	assert_eq!(undersized.estimated_changes, 1);
}

#[tokio::test]
async fn foreign_checkpoints_are_rejected() {
	let service = service(Arc::new(FakeOauthStrategy::default()));
	// Execute one change so a checkpoint exists for bind-1/import.
	let seeded = plan(&service, "bind-1").await;

	service
		.execute_sync_run(ExecuteSyncRunRequest {
			plan: seeded,
			direction: SyncDirection::Import,
			changes: vec![SyncChange::new("ext_1").with_source_version("v1")],
			dry_run: false,
		})
		.await
		.expect("Seeding run should succeed.");

	let checkpoint_id = service
		.plan_sync_run(plan_request("bind-1"))
		.await
		.expect("Planning should succeed.")
		.checkpoint
		.id;
	let err = service
		.plan_sync_run(PlanSyncRunRequest {
			direction: SyncDirection::Export,
			from_checkpoint_id: Some(checkpoint_id),
			..plan_request("bind-1")
		})
		.await
		.expect_err("An import checkpoint must not seed an export plan.");

	assert_eq!(err.text_code, TextCode::SyncCursorConflict);
	assert_eq!(err.category, ErrorCategory::Conflict);
}

#[tokio::test]
async fn execution_is_idempotent_across_replays() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let change_log = Arc::new(MemoryChangeLogStore::default());
	let service = service_builder(strategy)
		.change_log(change_log.clone())
		.build()
		.expect("Service fixture should build.");
	let changes = vec![
		SyncChange::new("ext_1").with_source_version("v1").with_payload(json!({ "n": 1 })),
		SyncChange::new("ext_1").with_source_version("v2").with_payload(json!({ "n": 2 })),
	];
	let first_plan = plan(&service, "bind-1").await;
	let first = service
		.execute_sync_run(ExecuteSyncRunRequest {
			plan: first_plan.clone(),
			direction: SyncDirection::Import,
			changes: changes.clone(),
			dry_run: false,
		})
		.await
		.expect("First run should succeed.");

	assert_eq!(first.processed, 2);
	assert_eq!(first.skipped, 0);
	assert_eq!(first.next_checkpoint.sequence, 2);

	let replay = service
		.execute_sync_run(ExecuteSyncRunRequest {
			plan: first_plan,
			direction: SyncDirection::Import,
			changes,
			dry_run: false,
		})
		.await
		.expect("Replay should succeed.");

	assert_eq!(replay.processed, 0);
	assert_eq!(replay.skipped, 2);
	assert_eq!(change_log.len(), 2, "The change log must hold exactly two entries.");
}

#[tokio::test]
async fn direction_distinguishes_idempotency_keys() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let change_log = Arc::new(MemoryChangeLogStore::default());
	let service = service_builder(strategy)
		.change_log(change_log.clone())
		.build()
		.expect("Service fixture should build.");
	let change = vec![SyncChange::new("ext_1").with_source_version("v1")];
	let import_plan = plan(&service, "bind-1").await;

	service
		.execute_sync_run(ExecuteSyncRunRequest {
			plan: import_plan,
			direction: SyncDirection::Import,
			changes: change.clone(),
			dry_run: false,
		})
		.await
		.expect("Import run should succeed.");

	let export_plan = service
		.plan_sync_run(PlanSyncRunRequest {
			direction: SyncDirection::Export,
			..plan_request("bind-1")
		})
		.await
		.expect("Planning should succeed.");
	let export = service
		.execute_sync_run(ExecuteSyncRunRequest {
			plan: export_plan,
			direction: SyncDirection::Export,
			changes: change,
			dry_run: false,
		})
		.await
		.expect("Export run should succeed.");

	assert_eq!(export.processed, 1, "Export of the same change is not a duplicate.");
	assert_eq!(change_log.len(), 2);
}

#[tokio::test]
async fn dry_runs_count_without_persisting() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let change_log = Arc::new(MemoryChangeLogStore::default());
	let service = service_builder(strategy)
		.change_log(change_log.clone())
		.build()
		.expect("Service fixture should build.");
	let run_plan = plan(&service, "bind-1").await;
	let result = service
		.execute_sync_run(ExecuteSyncRunRequest {
			plan: run_plan,
			direction: SyncDirection::Import,
			changes: vec![SyncChange::new("ext_1"), SyncChange::new("ext_2")],
			dry_run: true,
		})
		.await
		.expect("Dry run should succeed.");

	assert_eq!(result.processed, 2);
	assert!(result.dry_run);
	assert!(change_log.is_empty());

	let binding_id = SyncBindingId::new("bind-1").expect("Binding fixture should be valid.");

	assert!(
		change_log
			.entries(&binding_id)
			.await
			.expect("Entries should list.")
			.is_empty(),
	);
}

#[tokio::test]
async fn missing_external_ids_fail_the_run() {
	let service = service(Arc::new(FakeOauthStrategy::default()));
	let run_plan = plan(&service, "bind-1").await;
	let err = service
		.execute_sync_run(ExecuteSyncRunRequest {
			plan: run_plan,
			direction: SyncDirection::Import,
			changes: vec![SyncChange::new("ext_1"), SyncChange::new(" ")],
			dry_run: false,
		})
		.await
		.expect_err("A change without an external id must fail the run.");

	assert_eq!(err.category, ErrorCategory::BadInput);
	assert_eq!(err.metadata["processed"], json!(1));
	assert_eq!(err.metadata["sequence"], json!(1));
}

#[tokio::test]
async fn sensitive_change_payloads_are_redacted() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let change_log = Arc::new(MemoryChangeLogStore::default());
	let service = service_builder(strategy)
		.change_log(change_log.clone())
		.build()
		.expect("Service fixture should build.");
	let run_plan = plan(&service, "bind-1").await;

	service
		.execute_sync_run(ExecuteSyncRunRequest {
			plan: run_plan,
			direction: SyncDirection::Import,
			changes: vec![
				SyncChange::new("ext_1")
					.with_source_version("v1")
					.with_payload(json!({ "api_key": "k", "name": "ada" })),
			],
			dry_run: false,
		})
		.await
		.expect("Run should succeed.");

	let binding_id = SyncBindingId::new("bind-1").expect("Binding fixture should be valid.");
	let entries = change_log.entries(&binding_id).await.expect("Entries should list.");

	assert_eq!(entries[0].payload["api_key"], json!("<redacted>"));
	assert_eq!(entries[0].payload["name"], json!("ada"));
}

struct EscalatingPolicy;
impl ConflictPolicyHook for EscalatingPolicy {
	fn apply_record_policy(
		&self,
		mut conflict: SyncConflict,
	) -> integration_hub::error::Result<SyncConflict> {
		conflict.policy = Some("escalate".into());

		Ok(conflict)
	}

	fn apply_resolution_policy(
		&self,
		_conflict: &SyncConflict,
		action: ConflictResolutionAction,
	) -> integration_hub::error::Result<ConflictResolutionAction> {
		// Ignoring is not allowed in this deployment; force a retry instead.
		match action {
			ConflictResolutionAction::Ignore => Ok(ConflictResolutionAction::Retry),
			other => Ok(other),
		}
	}
}

fn conflict_request(binding_id: &str) -> RecordConflictRequest {
	RecordConflictRequest {
		provider_id: integration_hub::domain::ProviderId::new("github")
			.expect("Provider fixture should be valid."),
		scope: org_scope("acme"),
		sync_binding_id: SyncBindingId::new(binding_id).expect("Binding fixture should be valid."),
		source_object: "issues".into(),
		external_id: "ext_1".into(),
		reason: "field drift".into(),
		policy: None,
		source_payload: json!({ "token": "t", "title": "a" }),
		target_payload: json!({ "title": "b" }),
	}
}

#[tokio::test]
async fn conflicts_record_redacted_and_pending() {
	let service = service(Arc::new(FakeOauthStrategy::default()));
	let conflict = service
		.record_sync_conflict(conflict_request("bind-1"))
		.await
		.expect("Recording should succeed.");

	assert_eq!(conflict.status, ConflictStatus::Pending);
	assert_eq!(conflict.source_payload["token"], json!("<redacted>"));
	assert_eq!(conflict.source_payload["title"], json!("a"));
}

#[tokio::test]
async fn conflict_resolution_applies_policy_and_scope_checks() {
	let service = service_builder(Arc::new(FakeOauthStrategy::default()))
		.conflict_policy(Arc::new(EscalatingPolicy))
		.build()
		.expect("Service fixture should build.");
	let conflict = service
		.record_sync_conflict(conflict_request("bind-1"))
		.await
		.expect("Recording should succeed.");

	assert_eq!(conflict.policy.as_deref(), Some("escalate"));

	// Scope mismatches fail closed.
	let err = service
		.resolve_sync_conflict(ResolveConflictRequest {
			conflict_id: conflict.id.clone(),
			sync_binding_id: conflict.sync_binding_id.clone(),
			scope: org_scope("other"),
			action: ConflictResolutionAction::Resolve,
			resolution: None,
			resolved_by: None,
		})
		.await
		.expect_err("Scope mismatch must be rejected.");

	assert_eq!(err.category, ErrorCategory::Authz);

	// The policy rewrites ignore into retry, keeping the conflict pending.
	let retried = service
		.resolve_sync_conflict(ResolveConflictRequest {
			conflict_id: conflict.id.clone(),
			sync_binding_id: conflict.sync_binding_id.clone(),
			scope: org_scope("acme"),
			action: ConflictResolutionAction::Ignore,
			resolution: None,
			resolved_by: Some("ops".into()),
		})
		.await
		.expect("Resolution should succeed.");

	assert_eq!(retried.status, ConflictStatus::Pending);

	let resolved = service
		.resolve_sync_conflict(ResolveConflictRequest {
			conflict_id: conflict.id.clone(),
			sync_binding_id: conflict.sync_binding_id,
			scope: org_scope("acme"),
			action: ConflictResolutionAction::Resolve,
			resolution: Some("source wins".into()),
			resolved_by: Some("ops".into()),
		})
		.await
		.expect("Resolution should succeed.");

	assert_eq!(resolved.status, ConflictStatus::Resolved);
	assert_eq!(resolved.resolution.as_deref(), Some("source wins"));

	// Already-resolved conflicts are returned unchanged.
	let unchanged = service
		.resolve_sync_conflict(ResolveConflictRequest {
			conflict_id: resolved.id.clone(),
			sync_binding_id: resolved.sync_binding_id.clone(),
			scope: org_scope("acme"),
			action: ConflictResolutionAction::Ignore,
			resolution: None,
			resolved_by: None,
		})
		.await
		.expect("Idempotent resolution should succeed.");

	assert_eq!(unchanged.status, ConflictStatus::Resolved);
}
