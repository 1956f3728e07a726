//! Retry policy, operation policy hooks, and the built-in token bucket.

// self
use crate::{
	_prelude::*,
	domain::Scope,
	error::{ErrorCategory, TextCode},
	transport::ProviderResponseMeta,
};

/// Boxed future returned by [`OperationPolicy`] hooks.
pub type PolicyFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// Bounded retry configuration for the provider-operation runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Maximum attempts including the first; clamped to at least 1.
	pub max_attempts: u32,
	/// Backoff before the second attempt.
	pub initial_backoff: Duration,
	/// Upper bound on the computed backoff.
	pub max_backoff: Duration,
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 1,
			initial_backoff: Duration::milliseconds(200),
			max_backoff: Duration::seconds(5),
		}
	}
}
impl RetryPolicy {
	/// Maximum attempts with the ≥1 clamp applied.
	pub fn effective_max_attempts(&self) -> u32 {
		self.max_attempts.max(1)
	}

	/// Returns true when the status code is retried by default.
	pub fn retryable_status(&self, status: u16) -> bool {
		matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
	}

	/// Exponential backoff for the given 1-based attempt, capped at the maximum.
	pub fn backoff_for(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(30);
		let factor = 2_i64.saturating_pow(exponent);
		let raw = self.initial_backoff.saturating_mul(factor as i32);

		raw.min(self.max_backoff)
	}
}

/// Context shared with policy hooks for one operation.
#[derive(Clone, Debug)]
pub struct OperationContext {
	/// Provider identifier.
	pub provider_id: String,
	/// Connection identifier, when the operation is credentialed.
	pub connection_id: Option<String>,
	/// Scope the operation runs for.
	pub scope: Option<Scope>,
	/// Logical operation name.
	pub operation: String,
	/// Rate-limit bucket key.
	pub bucket_key: String,
	/// Auth strategy kind label, for telemetry.
	pub strategy_kind: String,
	/// Current 1-based attempt number.
	pub attempt: u32,
	/// Instant the runtime observed before invoking the hooks.
	pub observed_at: OffsetDateTime,
}

/// Failure summary passed to the retry decision hook.
#[derive(Clone, Debug)]
pub struct AttemptOutcome {
	/// HTTP status, when a response was received.
	pub status: Option<u16>,
	/// Retry-After hint from the response, when present.
	pub retry_after: Option<Duration>,
	/// True when the failure was transport-level.
	pub transport_error: bool,
	/// Human-readable failure summary.
	pub message: String,
}

/// Decision returned by the retry hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
	/// Whether another attempt should run.
	pub retry: bool,
	/// Delay override; non-positive values fall back to Retry-After/backoff.
	pub delay: Option<Duration>,
}

/// Hook set consulted around every provider-operation attempt.
///
/// `before_call` failures participate in the retry decision like any other
/// attempt failure; `should_retry` overrides the default status-based policy
/// when it returns a decision.
pub trait OperationPolicy
where
	Self: Send + Sync,
{
	/// Runs before the attempt; an error aborts the attempt.
	fn before_call<'a>(&'a self, context: &'a OperationContext) -> PolicyFuture<'a> {
		let _ = context;

		Box::pin(async { Ok(()) })
	}

	/// Runs after a response was normalized; an error marks the attempt failed.
	fn after_call<'a>(
		&'a self,
		context: &'a OperationContext,
		meta: &'a ProviderResponseMeta,
	) -> PolicyFuture<'a> {
		let _ = (context, meta);

		Box::pin(async { Ok(()) })
	}

	/// Overrides the retry decision; `None` defers to the default policy.
	fn should_retry(
		&self,
		context: &OperationContext,
		outcome: &AttemptOutcome,
	) -> Option<RetryDecision> {
		let _ = (context, outcome);

		None
	}
}

/// Token-bucket configuration per bucket key.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenBucketConfig {
	/// Maximum burst size.
	pub capacity: f64,
	/// Tokens replenished per second.
	pub refill_per_second: f64,
}
impl Default for TokenBucketConfig {
	fn default() -> Self {
		Self { capacity: 10.0, refill_per_second: 1.0 }
	}
}

#[derive(Clone, Copy, Debug)]
struct BucketState {
	tokens: f64,
	refilled_at: OffsetDateTime,
}

/// Built-in [`OperationPolicy`] enforcing a token bucket per
/// (provider, scope, bucket key).
#[derive(Debug)]
pub struct TokenBucketPolicy {
	config: TokenBucketConfig,
	buckets: Mutex<HashMap<String, BucketState>>,
}
impl TokenBucketPolicy {
	/// Creates a policy with the provided bucket configuration.
	pub fn new(config: TokenBucketConfig) -> Self {
		Self { config, buckets: Mutex::new(HashMap::new()) }
	}

	fn bucket_id(context: &OperationContext) -> String {
		let scope = context
			.scope
			.as_ref()
			.map(|scope| scope.to_string())
			.unwrap_or_else(|| "-".to_owned());

		format!("{}|{scope}|{}", context.provider_id, context.bucket_key)
	}

	fn try_consume(&self, context: &OperationContext) -> Result<(), Duration> {
		let mut buckets = self.buckets.lock();
		let state = buckets.entry(Self::bucket_id(context)).or_insert(BucketState {
			tokens: self.config.capacity,
			refilled_at: context.observed_at,
		});
		let elapsed = (context.observed_at - state.refilled_at).as_seconds_f64().max(0.0);

		state.tokens =
			(state.tokens + elapsed * self.config.refill_per_second).min(self.config.capacity);
		state.refilled_at = context.observed_at;

		if state.tokens >= 1.0 {
			state.tokens -= 1.0;

			return Ok(());
		}

		let deficit = 1.0 - state.tokens;
		let wait = deficit / self.config.refill_per_second.max(f64::EPSILON);

		Err(Duration::seconds_f64(wait))
	}
}
impl Default for TokenBucketPolicy {
	fn default() -> Self {
		Self::new(TokenBucketConfig::default())
	}
}
impl OperationPolicy for TokenBucketPolicy {
	fn before_call<'a>(&'a self, context: &'a OperationContext) -> PolicyFuture<'a> {
		Box::pin(async move {
			match self.try_consume(context) {
				Ok(()) => Ok(()),
				Err(wait) => Err(ServiceError::new(
					ErrorCategory::RateLimit,
					format!(
						"Rate limit exceeded for bucket {}; retry in {:.1}s.",
						context.bucket_key,
						wait.as_seconds_f64(),
					),
				)
				.with_text_code(TextCode::RateLimited)
				.with_metadata("bucket_key", context.bucket_key.clone())
				.with_metadata("retry_after_seconds", wait.whole_seconds().max(1))),
			}
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn context(at: OffsetDateTime) -> OperationContext {
		OperationContext {
			provider_id: "github".into(),
			connection_id: None,
			scope: Some(Scope::user("u1").expect("Scope fixture should be valid.")),
			operation: "items.list".into(),
			bucket_key: "items.list".into(),
			strategy_kind: "oauth2_auth_code".into(),
			attempt: 1,
			observed_at: at,
		}
	}

	#[test]
	fn backoff_doubles_and_caps() {
		let policy = RetryPolicy {
			max_attempts: 5,
			initial_backoff: Duration::milliseconds(200),
			max_backoff: Duration::seconds(5),
		};

		assert_eq!(policy.backoff_for(1), Duration::milliseconds(200));
		assert_eq!(policy.backoff_for(2), Duration::milliseconds(400));
		assert_eq!(policy.backoff_for(3), Duration::milliseconds(800));
		assert_eq!(policy.backoff_for(6), Duration::seconds(5));
	}

	#[test]
	fn max_attempts_clamps_to_one() {
		let policy = RetryPolicy { max_attempts: 0, ..RetryPolicy::default() };

		assert_eq!(policy.effective_max_attempts(), 1);
	}

	#[test]
	fn retryable_statuses_match_the_table() {
		let policy = RetryPolicy::default();

		for status in [408, 429, 500, 502, 503, 504] {
			assert!(policy.retryable_status(status), "{status} should be retryable");
		}
		for status in [400, 401, 403, 404, 409, 422] {
			assert!(!policy.retryable_status(status), "{status} should not be retryable");
		}
	}

	#[tokio::test]
	async fn token_bucket_exhausts_and_refills() {
		let policy = TokenBucketPolicy::new(TokenBucketConfig {
			capacity: 2.0,
			refill_per_second: 1.0,
		});
		let start = macros::datetime!(2026-01-01 00:00 UTC);

		assert!(policy.before_call(&context(start)).await.is_ok());
		assert!(policy.before_call(&context(start)).await.is_ok());

		let err = policy
			.before_call(&context(start))
			.await
			.expect_err("Empty bucket must reject the call.");

		assert_eq!(err.text_code, TextCode::RateLimited);

		// One second later a single token is back.
		let later = start + Duration::seconds(1);

		assert!(policy.before_call(&context(later)).await.is_ok());
		assert!(policy.before_call(&context(later)).await.is_err());
	}

	#[tokio::test]
	async fn buckets_are_isolated_per_key() {
		let policy = TokenBucketPolicy::new(TokenBucketConfig {
			capacity: 1.0,
			refill_per_second: 0.1,
		});
		let at = macros::datetime!(2026-01-01 00:00 UTC);
		let mut other = context(at);

		other.bucket_key = "items.create".into();

		assert!(policy.before_call(&context(at)).await.is_ok());
		assert!(policy.before_call(&other).await.is_ok());
		assert!(policy.before_call(&context(at)).await.is_err());
	}
}
