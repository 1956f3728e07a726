//! Provider-operation runtime integration: retries, signing, rate limiting.

mod common;

// std
use std::sync::Arc;
// self
use common::{
	FakeOauthStrategy, ScriptedAdapter, api_key_credential, bearer_credential,
	connected_github_connection, service, service_builder, user_scope,
};
use integration_hub::{
	domain::ProviderId,
	error::{ErrorCategory, TextCode},
	runtime::{ProviderOperationRequest, RetryPolicy, TokenBucketConfig, TokenBucketPolicy},
	transport::TransportRequest,
};
use serde_json::json;
use url::Url;

fn operation_request(adapter: Arc<ScriptedAdapter>) -> ProviderOperationRequest {
	let request = TransportRequest::new(
		"POST",
		Url::parse("https://api.github.example/v1/items?b=2&a=1")
			.expect("URL fixture should parse."),
	)
	.with_body(b"{\"name\":\"item\"}".to_vec());

	ProviderOperationRequest::new("items.create", request)
		.with_provider(ProviderId::new("github").expect("Provider fixture should be valid."))
		.with_credential(bearer_credential("tok-123"))
		.with_adapter(adapter)
}

#[tokio::test]
async fn successful_operations_sign_and_tag_idempotency() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy);
	let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::respond(200)]));
	let result = service
		.execute_provider_operation(operation_request(adapter.clone()))
		.await
		.expect("Operation should succeed.");

	assert_eq!(result.attempts, 1);
	assert_eq!(result.meta.status_code, 200);
	assert_eq!(result.idempotency_key.len(), 64);

	let seen = adapter.seen.lock();

	assert_eq!(seen.len(), 1);
	assert_eq!(seen[0].header("authorization"), Some("Bearer tok-123"));
	assert_eq!(seen[0].header("idempotency-key"), Some(result.idempotency_key.as_str()));
}

#[tokio::test(start_paused = true)]
async fn retryable_statuses_are_retried_with_backoff() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service_builder(strategy)
		.retry_policy(RetryPolicy { max_attempts: 3, ..RetryPolicy::default() })
		.build()
		.expect("Service fixture should build.");
	let adapter = Arc::new(ScriptedAdapter::new(vec![
		ScriptedAdapter::respond(503),
		ScriptedAdapter::respond(500),
		ScriptedAdapter::respond(200),
	]));
	let result = service
		.execute_provider_operation(operation_request(adapter.clone()))
		.await
		.expect("Operation should eventually succeed.");

	assert_eq!(result.attempts, 3);
	assert_eq!(adapter.seen.lock().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_after_hints_are_honored() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service_builder(strategy)
		.retry_policy(RetryPolicy { max_attempts: 2, ..RetryPolicy::default() })
		.build()
		.expect("Service fixture should build.");
	let adapter = Arc::new(ScriptedAdapter::new(vec![
		ScriptedAdapter::respond_with_headers(429, &[("Retry-After", "3")]),
		ScriptedAdapter::respond(200),
	]));
	let started = tokio::time::Instant::now();
	let result = service
		.execute_provider_operation(operation_request(adapter))
		.await
		.expect("Operation should succeed after the hint elapses.");

	assert_eq!(result.attempts, 2);
	assert!(started.elapsed() >= std::time::Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn transport_failures_are_retried() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service_builder(strategy)
		.retry_policy(RetryPolicy { max_attempts: 2, ..RetryPolicy::default() })
		.build()
		.expect("Service fixture should build.");
	let adapter = Arc::new(ScriptedAdapter::new(vec![
		common::ScriptedOutcome::Fail("connection reset".into()),
		ScriptedAdapter::respond(200),
	]));
	let result = service
		.execute_provider_operation(operation_request(adapter.clone()))
		.await
		.expect("Operation should succeed after the transport recovers.");

	assert_eq!(result.attempts, 2);
	assert_eq!(adapter.seen.lock().len(), 2);
}

#[tokio::test]
async fn exhausted_retries_wrap_the_failure_with_metadata() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service_builder(strategy)
		.retry_policy(RetryPolicy { max_attempts: 1, ..RetryPolicy::default() })
		.build()
		.expect("Service fixture should build.");
	let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::respond(502)]));
	let err = service
		.execute_provider_operation(operation_request(adapter))
		.await
		.expect_err("Final failure must be wrapped.");

	assert_eq!(err.category, ErrorCategory::External);
	assert_eq!(err.text_code, TextCode::ProviderOperationFailed);
	assert_eq!(err.metadata["provider"], json!("github"));
	assert_eq!(err.metadata["operation"], json!("items.create"));
	assert_eq!(err.metadata["status"], json!(502));
	assert_eq!(err.metadata["max_attempts"], json!(1));
	assert_eq!(err.metadata["retryable"], json!(true));
	assert_eq!(err.metadata["transport_kind"], json!("scripted"));
	assert!(err.metadata.contains_key("idempotency"));
}

#[tokio::test]
async fn throttled_responses_map_to_rate_limited() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy);
	let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::respond(429)]));
	let err = service
		.execute_provider_operation(operation_request(adapter))
		.await
		.expect_err("429 must be wrapped as rate limited.");

	assert_eq!(err.category, ErrorCategory::RateLimit);
	assert_eq!(err.text_code, TextCode::RateLimited);
	assert_eq!(err.http_code, 429);
}

#[tokio::test]
async fn token_bucket_policy_rejects_when_exhausted() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service_builder(strategy)
		.operation_policy(Arc::new(TokenBucketPolicy::new(TokenBucketConfig {
			capacity: 1.0,
			refill_per_second: 0.001,
		})))
		.build()
		.expect("Service fixture should build.");
	let adapter = Arc::new(ScriptedAdapter::new(vec![
		ScriptedAdapter::respond(200),
		ScriptedAdapter::respond(200),
	]));

	service
		.execute_provider_operation(
			operation_request(adapter.clone()).with_scope(user_scope("u1")),
		)
		.await
		.expect("First call should pass the bucket.");

	let err = service
		.execute_provider_operation(operation_request(adapter.clone()).with_scope(user_scope("u1")))
		.await
		.expect_err("Second call must be rate limited.");

	assert_eq!(err.text_code, TextCode::RateLimited);
	assert_eq!(adapter.seen.lock().len(), 1, "The rejected call must not reach the adapter.");
}

#[tokio::test]
async fn rate_limiting_requires_a_valid_scope() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service_builder(strategy)
		.operation_policy(Arc::new(TokenBucketPolicy::new(TokenBucketConfig {
			capacity: 1.0,
			refill_per_second: 0.001,
		})))
		.build()
		.expect("Service fixture should build.");
	let adapter = Arc::new(ScriptedAdapter::new(vec![
		ScriptedAdapter::respond(200),
		ScriptedAdapter::respond(200),
	]));

	// Without a scope the policy is disabled, so both calls go through.
	service
		.execute_provider_operation(operation_request(adapter.clone()))
		.await
		.expect("First unscoped call should succeed.");
	service
		.execute_provider_operation(operation_request(adapter.clone()))
		.await
		.expect("Second unscoped call should succeed.");

	assert_eq!(adapter.seen.lock().len(), 2);
}

#[tokio::test]
async fn signer_selection_follows_the_credential_auth_kind() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy);
	let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::respond(200)]));
	let request = operation_request(adapter.clone()).with_credential(api_key_credential("key-9"));

	service
		.execute_provider_operation(request)
		.await
		.expect("Operation should succeed.");

	let seen = adapter.seen.lock();

	assert_eq!(seen[0].header("x-api-key"), Some("key-9"));
	assert_eq!(seen[0].header("authorization"), None);
}

#[tokio::test]
async fn operation_provider_must_match_the_connection() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");
	let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::respond(200)]));
	let request = ProviderOperationRequest::new(
		"chat.post",
		TransportRequest::new(
			"POST",
			Url::parse("https://api.slack.example/chat").expect("URL fixture should parse."),
		),
	)
	.with_provider(ProviderId::new("slack").expect("Provider fixture should be valid."))
	.with_connection(connection_id)
	.with_adapter(adapter);
	let err = service
		.execute_provider_operation(request)
		.await
		.expect_err("Provider mismatch must fail.");

	assert_eq!(err.category, ErrorCategory::BadInput);
	assert!(err.message.contains("Provider mismatch"));
}

#[tokio::test]
async fn stored_credentials_are_decrypted_for_signing() {
	let strategy = Arc::new(FakeOauthStrategy::default());
	let service = service(strategy.clone());
	let connection_id = connected_github_connection(&service, &strategy, user_scope("u1"))
		.await
		.expect("Connect should succeed.");
	let adapter = Arc::new(ScriptedAdapter::new(vec![ScriptedAdapter::respond(200)]));
	let request = ProviderOperationRequest::new(
		"items.list",
		TransportRequest::new(
			"GET",
			Url::parse("https://api.github.example/items").expect("URL fixture should parse."),
		),
	)
	.with_connection(connection_id)
	.with_adapter(adapter.clone());

	service
		.execute_provider_operation(request)
		.await
		.expect("Operation should succeed with the stored credential.");

	// The fake strategy minted `tok-granted`; the bearer signer must expose it
	// only on the wire, decrypted from the stored envelope.
	assert_eq!(adapter.seen.lock()[0].header("authorization"), Some("Bearer tok-granted"));
}
