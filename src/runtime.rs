//! Provider-operation runtime: signing, idempotency, retries, and rate limiting.
//!
//! `policy` holds the retry policy, the operation policy hook set, and the
//! built-in token-bucket implementation; the pipeline itself is
//! [`Service::execute_provider_operation`](crate::flows::Service::execute_provider_operation).

pub mod policy;

pub use policy::*;

// crates.io
use sha2::{Digest, Sha256};
use time::format_description::well_known::{Rfc2822, Rfc3339};
// self
use crate::{
	_prelude::*,
	domain::{ConnectionId, ProviderId, Scope},
	error::{ErrorCategory, TextCode, classify_message},
	flows::Service,
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	secret::{ActiveCredential, decode_credential_payload},
	signer::{BearerSigner, ProviderSigner, signer_for_auth_kind},
	transport::{
		DEFAULT_TRANSPORT_KIND, DefaultResponseNormalizer, ProviderResponseMeta, ResponseNormalizer,
		TransportAdapter, TransportRequest,
	},
};

/// Response-date skew (either direction) that triggers a clock hint.
pub const CLOCK_SKEW_HINT_THRESHOLD: Duration = Duration::seconds(30);

/// Inputs to [`Service::execute_provider_operation`].
#[derive(Clone)]
pub struct ProviderOperationRequest {
	/// Provider the operation targets; resolved from the connection when absent.
	pub provider_id: Option<ProviderId>,
	/// Connection supplying the credential, when one exists.
	pub connection_id: Option<ConnectionId>,
	/// Internal actor the operation runs for; gates rate limiting.
	pub scope: Option<Scope>,
	/// Logical operation name (e.g. `contacts.list`).
	pub operation: String,
	/// Request to execute. Cloned before mutation.
	pub request: TransportRequest,
	/// Explicit idempotency key; wins over the request header and derivation.
	pub idempotency_key: Option<String>,
	/// Transport kind used when no explicit adapter is given.
	pub transport_kind: Option<String>,
	/// Configuration handed to the transport resolver.
	pub transport_config: BTreeMap<String, Json>,
	/// Explicit transport adapter; wins over the resolver.
	pub adapter: Option<Arc<dyn TransportAdapter>>,
	/// Explicit signer; wins over auth-kind selection.
	pub signer: Option<Arc<dyn ProviderSigner>>,
	/// Explicit credential; wins over the store lookup.
	pub credential: Option<ActiveCredential>,
	/// Rate-limit bucket key; falls back to the normalized operation name.
	pub bucket_key: Option<String>,
	/// Response normalizer override.
	pub normalizer: Option<Arc<dyn ResponseNormalizer>>,
}
impl ProviderOperationRequest {
	/// Creates a request for the provided operation name and transport request.
	pub fn new(operation: impl Into<String>, request: TransportRequest) -> Self {
		Self {
			provider_id: None,
			connection_id: None,
			scope: None,
			operation: operation.into(),
			request,
			idempotency_key: None,
			transport_kind: None,
			transport_config: BTreeMap::new(),
			adapter: None,
			signer: None,
			credential: None,
			bucket_key: None,
			normalizer: None,
		}
	}

	/// Targets a provider directly.
	pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
		self.provider_id = Some(provider_id);

		self
	}

	/// Supplies the credentialed connection.
	pub fn with_connection(mut self, connection_id: ConnectionId) -> Self {
		self.connection_id = Some(connection_id);

		self
	}

	/// Sets the scope used for rate limiting.
	pub fn with_scope(mut self, scope: Scope) -> Self {
		self.scope = Some(scope);

		self
	}

	/// Sets an explicit idempotency key.
	pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
		self.idempotency_key = Some(key.into());

		self
	}

	/// Sets an explicit credential, bypassing the store.
	pub fn with_credential(mut self, credential: ActiveCredential) -> Self {
		self.credential = Some(credential);

		self
	}

	/// Sets an explicit transport adapter.
	pub fn with_adapter(mut self, adapter: Arc<dyn TransportAdapter>) -> Self {
		self.adapter = Some(adapter);

		self
	}
}
impl Debug for ProviderOperationRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProviderOperationRequest")
			.field("provider_id", &self.provider_id)
			.field("connection_id", &self.connection_id)
			.field("operation", &self.operation)
			.field("method", &self.request.method)
			.field("url", &self.request.url.as_str())
			.finish_non_exhaustive()
	}
}

/// Successful outcome of a provider operation.
#[derive(Clone, Debug)]
pub struct ProviderOperationResult {
	/// Normalized response metadata (headers, retry hints, signing info).
	pub meta: ProviderResponseMeta,
	/// Raw response body.
	pub body: Vec<u8>,
	/// Attempts consumed, including the successful one.
	pub attempts: u32,
	/// Idempotency key sent with the request.
	pub idempotency_key: String,
}

/// Derives the fallback idempotency key for an operation.
///
/// `SHA-256(provider|connection|operation|METHOD|canonical-url|body)`, hex.
pub fn derive_idempotency_key(
	provider_id: &str,
	connection_id: Option<&str>,
	operation: &str,
	request: &TransportRequest,
) -> String {
	let canonical_url = canonicalize_url(&request.url);
	let mut hasher = Sha256::new();

	hasher.update(provider_id.as_bytes());
	hasher.update(b"|");
	hasher.update(connection_id.unwrap_or("").as_bytes());
	hasher.update(b"|");
	hasher.update(operation.as_bytes());
	hasher.update(b"|");
	hasher.update(request.method.as_bytes());
	hasher.update(b"|");
	hasher.update(canonical_url.as_bytes());
	hasher.update(b"|");
	hasher.update(&request.body);

	hex::encode(hasher.finalize())
}

/// Canonical URL form used for idempotency derivation: scheme, host, path,
/// and the query pairs sorted by key then value.
pub fn canonicalize_url(url: &Url) -> String {
	let mut pairs: Vec<(String, String)> =
		url.query_pairs().map(|(key, value)| (key.into_owned(), value.into_owned())).collect();

	pairs.sort();

	let query = pairs
		.iter()
		.map(|(key, value)| format!("{key}={value}"))
		.collect::<Vec<_>>()
		.join("&");
	let host = url.host_str().unwrap_or_default();
	let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
	let base = format!("{}://{host}{port}{}", url.scheme(), url.path());

	if query.is_empty() { base } else { format!("{base}?{query}") }
}

impl Service {
	/// Executes an outbound provider operation through the full pipeline:
	/// resolution, idempotency, signing, rate limiting, and bounded retries.
	pub async fn execute_provider_operation(
		&self,
		request: ProviderOperationRequest,
	) -> Result<ProviderOperationResult> {
		const KIND: OpKind = OpKind::ProviderOperation;

		let span = OpSpan::new(KIND, "execute_provider_operation");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.run_operation(request)).await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	async fn run_operation(
		&self,
		request: ProviderOperationRequest,
	) -> Result<ProviderOperationResult> {
		// 1. Resolve the provider, cross-checking against the connection.
		let connection = match &request.connection_id {
			Some(id) => Some(self.connections.get(id).await?.ok_or_else(|| {
				ServiceError::not_found(format!("Connection not found: {id}."))
			})?),
			None => None,
		};
		let provider_id = match (&request.provider_id, &connection) {
			(Some(explicit), Some(conn)) => {
				if !conn.provider_id.matches(explicit) {
					return Err(ServiceError::bad_input(format!(
						"Provider mismatch: operation names {explicit} but connection {} belongs to {}.",
						conn.id, conn.provider_id,
					)));
				}

				conn.provider_id.clone()
			},
			(Some(explicit), None) => explicit.clone(),
			(None, Some(conn)) => conn.provider_id.clone(),
			(None, None) =>
				return Err(ServiceError::bad_input(
					"Provider operations require a provider id or a connection id.",
				)),
		};

		// 2. Provider + strategy kind, for telemetry.
		let entry = self.registry.resolve(&provider_id)?;
		let strategy_kind = entry.descriptor.auth_kind;

		// 3. Transport adapter.
		let adapter: Arc<dyn TransportAdapter> = match &request.adapter {
			Some(explicit) => explicit.clone(),
			None => {
				let kind =
					request.transport_kind.as_deref().unwrap_or(DEFAULT_TRANSPORT_KIND);

				self.transport_resolver.build(kind, &request.transport_config)?
			},
		};
		let transport_kind = adapter.kind().to_owned();

		// 4. Idempotency key.
		let mut prepared = request.request.clone();
		let idempotency_key = request
			.idempotency_key
			.clone()
			.or_else(|| prepared.header("Idempotency-Key").map(str::to_owned))
			.unwrap_or_else(|| {
				derive_idempotency_key(
					&provider_id,
					request.connection_id.as_deref(),
					&request.operation,
					&prepared,
				)
			});

		if prepared.header("Idempotency-Key").is_none() {
			prepared.set_header("Idempotency-Key", idempotency_key.clone());
		}

		// 5. Active credential.
		let credential = match &request.credential {
			Some(explicit) => Some(explicit.clone()),
			None => match &request.connection_id {
				Some(connection_id) => {
					let stored =
						self.credentials.active_for(connection_id).await?.ok_or_else(|| {
							ServiceError::new(
								ErrorCategory::Auth,
								format!("No active credential for connection {connection_id}."),
							)
						})?;
					let payload =
						decode_credential_payload(self.secret_provider.as_ref(), &stored.envelope)?;

					Some(ActiveCredential::new(stored.auth_kind, payload))
				},
				None => None,
			},
		};

		// 6. Signer selection.
		let signer: Arc<dyn ProviderSigner> = match &request.signer {
			Some(explicit) => explicit.clone(),
			None => match &self.signer_override {
				Some(configured) => configured.clone(),
				None => match &credential {
					Some(active) => signer_for_auth_kind(active.auth_kind),
					None => Arc::new(BearerSigner),
				},
			},
		};

		// 7. Rate-limit policy gating.
		let bucket_key = request
			.bucket_key
			.clone()
			.filter(|key| !key.trim().is_empty())
			.unwrap_or_else(|| normalize_bucket_key(&request.operation));
		let scope_valid =
			request.scope.as_ref().map(|scope| scope.validate().is_ok()).unwrap_or(false);
		let policy = if scope_valid { self.operation_policy.clone() } else { None };
		let normalizer: Arc<dyn ResponseNormalizer> = request
			.normalizer
			.clone()
			.unwrap_or_else(|| Arc::new(DefaultResponseNormalizer));

		// 8. Bounded retry loop.
		let max_attempts = self.retry_policy.effective_max_attempts();
		let mut context = OperationContext {
			provider_id: provider_id.to_string(),
			connection_id: request.connection_id.as_ref().map(|id| id.to_string()),
			scope: request.scope.clone(),
			operation: request.operation.clone(),
			bucket_key,
			strategy_kind: strategy_kind.as_str().to_owned(),
			attempt: 0,
			observed_at: self.clock.now(),
		};
		let mut last_failure: Option<AttemptFailure> = None;
		let mut attempts_used = 0_u32;

		for attempt in 1..=max_attempts {
			attempts_used = attempt;
			context.attempt = attempt;
			context.observed_at = self.clock.now();

			let outcome = self
				.run_attempt(
					&prepared,
					credential.as_ref(),
					signer.as_ref(),
					adapter.as_ref(),
					normalizer.as_ref(),
					policy.as_deref(),
					&context,
				)
				.await;
			let failure = match outcome {
				Ok(meta_body) =>
					return Ok(ProviderOperationResult {
						meta: meta_body.0,
						body: meta_body.1,
						attempts: attempt,
						idempotency_key,
					}),
				Err(failure) => failure,
			};
			let decision = self.decide_retry(policy.as_deref(), &context, &failure, attempt);

			if attempt >= max_attempts || !decision.retry {
				last_failure = Some(failure);

				break;
			}

			let delay = decision
				.delay
				.filter(|d| d.is_positive())
				.or(failure.retry_after)
				.unwrap_or_else(|| self.retry_policy.backoff_for(attempt));

			last_failure = Some(failure);

			tokio::time::sleep(std::time::Duration::try_from(delay).unwrap_or_default()).await;
		}

		let failure = last_failure
			.unwrap_or_else(|| AttemptFailure::from_error(ServiceError::internal(
				"Provider operation produced no attempt outcome.",
			)));

		Err(wrap_operation_failure(
			failure,
			&provider_id,
			&request.operation,
			&transport_kind,
			&idempotency_key,
			attempts_used,
			max_attempts,
		))
	}

	#[allow(clippy::too_many_arguments)]
	async fn run_attempt(
		&self,
		prepared: &TransportRequest,
		credential: Option<&ActiveCredential>,
		signer: &dyn ProviderSigner,
		adapter: &dyn TransportAdapter,
		normalizer: &dyn ResponseNormalizer,
		policy: Option<&dyn OperationPolicy>,
		context: &OperationContext,
	) -> Result<(ProviderResponseMeta, Vec<u8>), AttemptFailure> {
		// Hook failures participate in the retry decision.
		if let Some(policy) = policy {
			policy.before_call(context).await.map_err(AttemptFailure::from_error)?;
		}

		let mut attempt_request = prepared.clone();
		let signing_metadata = match credential {
			Some(active) => signer
				.sign(&mut attempt_request, active, context.observed_at)
				.map_err(AttemptFailure::from_error)?,
			None => BTreeMap::new(),
		};
		let response =
			adapter.execute(attempt_request).await.map_err(AttemptFailure::from_transport)?;
		let mut meta = normalizer.normalize(&response, context.observed_at);

		meta.metadata.extend(signing_metadata);

		if let Some(skew) = clock_skew_seconds(&meta) {
			if skew.abs() >= CLOCK_SKEW_HINT_THRESHOLD.whole_seconds() {
				meta.metadata.insert("clock_skew_hint_seconds".into(), Json::from(skew));
			}
		}

		if let Some(policy) = policy {
			policy.after_call(context, &meta).await.map_err(AttemptFailure::from_error)?;
		}

		if meta.status_code < 400 {
			return Ok((meta, response.body));
		}

		Err(AttemptFailure::from_status(meta, response.body))
	}

	fn decide_retry(
		&self,
		policy: Option<&dyn OperationPolicy>,
		context: &OperationContext,
		failure: &AttemptFailure,
		attempt: u32,
	) -> RetryDecision {
		let outcome = AttemptOutcome {
			status: failure.status,
			retry_after: failure.retry_after,
			transport_error: failure.transport_error,
			message: failure.message.clone(),
		};

		if let Some(policy) = policy {
			if let Some(decision) = policy.should_retry(context, &outcome) {
				return decision;
			}
		}

		let _ = attempt;
		let retry = match failure.status {
			Some(status) => self.retry_policy.retryable_status(status),
			None => failure.transport_error || failure.retryable_error,
		};

		RetryDecision { retry, delay: None }
	}
}

/// Failure details captured from one attempt.
#[derive(Debug)]
struct AttemptFailure {
	status: Option<u16>,
	retry_after: Option<Duration>,
	transport_error: bool,
	retryable_error: bool,
	message: String,
	meta: Option<ProviderResponseMeta>,
	error: Option<ServiceError>,
}
impl AttemptFailure {
	fn from_error(error: ServiceError) -> Self {
		Self {
			status: None,
			retry_after: None,
			transport_error: false,
			retryable_error: error.is_retryable(),
			message: error.message.clone(),
			meta: None,
			error: Some(error),
		}
	}

	fn from_transport(error: ServiceError) -> Self {
		Self {
			status: None,
			retry_after: None,
			transport_error: true,
			retryable_error: true,
			message: error.message.clone(),
			meta: None,
			error: Some(error),
		}
	}

	fn from_status(meta: ProviderResponseMeta, body: Vec<u8>) -> Self {
		let preview = String::from_utf8_lossy(&body[..body.len().min(256)]).into_owned();

		Self {
			status: Some(meta.status_code),
			retry_after: meta.retry_after,
			transport_error: false,
			retryable_error: false,
			message: format!("Provider returned status {}: {preview}", meta.status_code),
			meta: Some(meta),
			error: None,
		}
	}
}

#[allow(clippy::too_many_arguments)]
fn wrap_operation_failure(
	failure: AttemptFailure,
	provider_id: &ProviderId,
	operation: &str,
	transport_kind: &str,
	idempotency_key: &str,
	attempts: u32,
	max_attempts: u32,
) -> ServiceError {
	let throttled = failure.status == Some(429)
		|| classify_message(&failure.message) == ErrorCategory::RateLimit;
	let (category, text_code) = if throttled {
		(ErrorCategory::RateLimit, TextCode::RateLimited)
	} else {
		(ErrorCategory::External, TextCode::ProviderOperationFailed)
	};
	let retryable = failure.transport_error
		|| failure.retryable_error
		|| failure
			.status
			.is_some_and(|status| RetryPolicy::default().retryable_status(status));
	let mut error = match failure.error {
		Some(inner) if inner.category == ErrorCategory::RateLimit =>
			inner.with_text_code(TextCode::RateLimited),
		Some(inner) => ServiceError::new(category, inner.message.clone())
			.with_text_code(text_code)
			.with_severity(inner.severity),
		None => ServiceError::new(category, failure.message.clone()).with_text_code(text_code),
	};

	error = error
		.with_location("provider_operation")
		.with_metadata("provider", provider_id.as_ref())
		.with_metadata("operation", operation)
		.with_metadata("attempt", attempts)
		.with_metadata("max_attempts", max_attempts)
		.with_metadata("retryable", retryable)
		.with_metadata("transport_kind", transport_kind)
		.with_metadata("idempotency", idempotency_key);

	if let Some(status) = failure.status {
		error = error.with_metadata("status", status);
	}
	if let Some(meta) = failure.meta {
		for (key, value) in meta.metadata {
			error = error.with_metadata(key, value);
		}
	}

	error
}

fn normalize_bucket_key(operation: &str) -> String {
	let normalized = operation.trim().to_ascii_lowercase().replace([' ', '/'], ".");

	if normalized.is_empty() { "default".to_owned() } else { normalized }
}

fn clock_skew_seconds(meta: &ProviderResponseMeta) -> Option<i64> {
	let signed_at = meta
		.metadata
		.get("signed_at")
		.and_then(Json::as_str)
		.and_then(|raw| OffsetDateTime::parse(raw, &Rfc3339).ok())?;
	let response_date = meta
		.headers
		.iter()
		.find(|(name, _)| name.eq_ignore_ascii_case("date"))
		.map(|(_, value)| value.as_str())
		.and_then(|raw| OffsetDateTime::parse(raw, &Rfc2822).ok())?;

	Some((response_date - signed_at).whole_seconds())
}
