//! Auth lifecycle integration: connect, callback, reconsent, refresh, revoke.

mod common;

// std
use std::sync::{Arc, atomic::Ordering};
// self
use common::{
	FakeOauthStrategy, connected_github_connection, org_scope, service, user_scope,
};
use integration_hub::{
	domain::{ConnectionStatus, GrantEventKind},
	error::{ErrorCategory, TextCode},
	flows::{CallbackRequest, ConnectRequest, RefreshRequest, StartReconsentRequest},
};

#[tokio::test]
async fn oauth_state_is_single_use() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connect = service
		.connect(
			ConnectRequest::new("github", user_scope("u1"))
				.with_redirect_uri(
					url::Url::parse("https://app.example/callback")
						.expect("Redirect fixture should parse."),
				)
				.with_grants(["repo:read"]),
		)
		.await
		.expect("Connect should succeed.");
	let state = connect.state.expect("Connect should issue a non-empty state.");

	assert!(!state.is_empty());
	assert!(connect.url.expect("Connect should return a URL.").as_str().contains("state="));

	let first = service
		.complete_callback(
			CallbackRequest::new("github", user_scope("u1"))
				.with_code("code-1")
				.with_state(state.clone()),
		)
		.await
		.expect("First callback should succeed.");

	assert_eq!(first.connection.status, ConnectionStatus::Active);

	let replay = service
		.complete_callback(
			CallbackRequest::new("github", user_scope("u1"))
				.with_code("code-2")
				.with_state(state),
		)
		.await
		.expect_err("Replaying the state must fail.");

	assert_eq!(replay.text_code, TextCode::OauthStateInvalid);
	assert_eq!(replay.message, "oauth state not found");
}

#[tokio::test]
async fn scope_mismatch_fails_before_the_provider_call() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connect = service
		.connect(ConnectRequest::new("github", user_scope("u1")).with_grants(["repo:read"]))
		.await
		.expect("Connect should succeed.");
	let state = connect.state.expect("Connect should issue a state.");
	let err = service
		.complete_callback(
			CallbackRequest::new("github", org_scope("o1"))
				.with_code("code-1")
				.with_state(state),
		)
		.await
		.expect_err("Scope mismatch must fail.");

	assert!(err.message.contains("state scope mismatch"));
	assert_eq!(
		strategy.complete_calls.load(Ordering::SeqCst),
		0,
		"The provider must not be called on a scope mismatch.",
	);
}

#[tokio::test]
async fn distinct_external_accounts_create_distinct_connections() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());

	strategy.set_external_account("acct-1");

	let first = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("First connection should succeed.");

	strategy.set_external_account("acct-2");

	let second = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Second connection should succeed.");

	assert_ne!(first, second);

	// Reconnecting the same account reuses the existing connection.
	strategy.set_external_account("acct-1");

	let again = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Reconnect should succeed.");

	assert_eq!(first, again);
}

#[tokio::test]
async fn grant_deltas_are_journaled_per_version() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());

	strategy.issue_grants(["repo:read"]);

	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");

	strategy.issue_grants(["repo:read", "repo:write"]);
	connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Expanded reconnect should succeed.");

	strategy.issue_grants(["repo:read"]);
	connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Downgraded reconnect should succeed.");

	let (snapshots, events) = service
		.grant_history(&connection_id)
		.await
		.expect("Grant history should load.");

	assert_eq!(snapshots.len(), 3);
	assert_eq!(snapshots[2].version, 3);
	assert_eq!(
		events.iter().map(|event| event.kind).collect::<Vec<_>>(),
		vec![GrantEventKind::InitialGranted, GrantEventKind::Expanded, GrantEventKind::Downgraded],
	);
	assert_eq!(events[1].added, vec!["repo:write".to_owned()]);
	assert_eq!(events[2].removed, vec!["repo:write".to_owned()]);
}

#[tokio::test]
async fn refresh_rejects_provider_mismatch() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");
	let err = service
		.refresh(RefreshRequest::new("slack", connection_id))
		.await
		.expect_err("Provider mismatch must fail.");

	assert!(err.message.contains("provider mismatch"));
	assert_eq!(err.category, ErrorCategory::BadInput);
	assert_eq!(strategy.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refresh_rotates_the_credential_version() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");
	let refreshed = service
		.refresh(RefreshRequest::new("github", connection_id.clone()))
		.await
		.expect("Refresh should succeed.");

	assert_eq!(refreshed.credential_version, 2);

	let connection = service
		.get_connection(&connection_id)
		.await
		.expect("Connection should load.");

	assert_eq!(connection.status, ConnectionStatus::Active);
}

#[tokio::test]
async fn failed_refresh_moves_the_connection_to_pending_reauth() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");

	strategy.fail_refresh.store(true, Ordering::SeqCst);

	let err = service
		.refresh(RefreshRequest::new("github", connection_id.clone()))
		.await
		.expect_err("Refresh should propagate the provider failure.");

	assert_eq!(err.category, ErrorCategory::Auth);
	assert!(err.metadata.contains_key("retry_after_seconds"));

	let connection = service
		.get_connection(&connection_id)
		.await
		.expect("Connection should load.");

	assert_eq!(connection.status, ConnectionStatus::PendingReauth);
	assert!(connection.last_error.is_some());
}

#[tokio::test]
async fn reconsent_round_trip_restores_active_status() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");
	let started = service
		.start_reconsent(
			StartReconsentRequest::new(connection_id.clone()).with_grants(["repo:read", "repo:write"]),
		)
		.await
		.expect("Start reconsent should succeed.");

	assert_eq!(
		service
			.get_connection(&connection_id)
			.await
			.expect("Connection should load.")
			.status,
		ConnectionStatus::NeedsReconsent,
	);

	strategy.issue_grants(["repo:read", "repo:write"]);

	let state = started.state.expect("Reconsent should issue a state.");
	let completed = service
		.complete_reconsent(
			CallbackRequest::new("github", user_scope("u1"))
				.with_code("code-reconsent")
				.with_state(state),
		)
		.await
		.expect("Reconsent completion should succeed.");

	assert_eq!(completed.connection.id, connection_id);
	assert_eq!(completed.connection.status, ConnectionStatus::Active);

	let (_, events) = service
		.grant_history(&connection_id)
		.await
		.expect("Grant history should load.");

	assert_eq!(
		events.last().expect("Reconsent should journal an event.").kind,
		GrantEventKind::ReconsentCompleted,
	);
}

#[tokio::test]
async fn reconsent_state_cannot_complete_the_connect_flow() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");
	let started = service
		.start_reconsent(StartReconsentRequest::new(connection_id))
		.await
		.expect("Start reconsent should succeed.");
	let state = started.state.expect("Reconsent should issue a state.");
	let err = service
		.complete_callback(
			CallbackRequest::new("github", user_scope("u1"))
				.with_code("code-x")
				.with_state(state),
		)
		.await
		.expect_err("A reconsent state must not complete the connect flow.");

	assert_eq!(err.text_code, TextCode::OauthStateInvalid);
}

#[tokio::test]
async fn authorization_code_replay_is_fenced() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let scope = user_scope("u1");
	let connect = |_: u32| async {
		service
			.connect(ConnectRequest::new("github", scope.clone()).with_grants(["repo:read"]))
			.await
			.expect("Connect should succeed.")
			.state
			.expect("Connect should issue a state.")
	};
	let first_state = connect(1).await;

	service
		.complete_callback(
			CallbackRequest::new("github", scope.clone())
				.with_code("shared-code")
				.with_state(first_state),
		)
		.await
		.expect("First exchange should succeed.");

	let second_state = connect(2).await;
	let err = service
		.complete_callback(
			CallbackRequest::new("github", scope)
				.with_code("shared-code")
				.with_state(second_state),
		)
		.await
		.expect_err("Reusing the authorization code must fail.");

	assert_eq!(err.text_code, TextCode::ReplayDetected);
}

#[tokio::test]
async fn revoke_disconnects_and_invalidates_the_credential() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");
	let revoked = service
		.revoke(&connection_id, Some("user request"))
		.await
		.expect("Revoke should succeed.");

	assert_eq!(revoked.status, ConnectionStatus::Disconnected);
	assert_eq!(revoked.last_error.as_deref(), Some("user request"));

	// Reconnecting reactivates the same connection row.
	let again = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Reconnect should succeed.");

	assert_eq!(again, connection_id);

	let connection = service
		.get_connection(&connection_id)
		.await
		.expect("Connection should load.");

	assert_eq!(connection.status, ConnectionStatus::Active);
	assert_eq!(connection.last_error, None);
}

#[tokio::test]
async fn capability_evaluation_blocks_and_degrades() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());

	strategy.issue_grants(["repo:read"]);

	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");
	let write = service
		.evaluate_capability(&connection_id, "repo.write")
		.await
		.expect("Evaluation should succeed.");

	assert!(!write.allowed);
	assert_eq!(write.mode, integration_hub::provider::DeniedBehavior::Block);
	assert_eq!(write.missing_grants, vec!["repo:write".to_owned()]);

	let read = service
		.evaluate_capability(&connection_id, "repo.read")
		.await
		.expect("Evaluation should succeed.");

	assert!(read.allowed);
	assert_eq!(read.mode, integration_hub::provider::DeniedBehavior::Degrade);
	assert_eq!(read.missing_grants, vec!["repo:write".to_owned()]);

	let unknown = service
		.evaluate_capability(&connection_id, "repo.admin")
		.await
		.expect("Evaluation should succeed.");

	assert!(!unknown.allowed);
	assert!(unknown.missing_grants.is_empty());
}
