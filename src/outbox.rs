//! Lifecycle outbox dispatcher: claim, deliver, ack, retry with backoff.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	domain::LifecycleEvent,
	flows::{Clock, Service},
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
	store::OutboxStore,
};

/// Metadata key holding the delivery attempt counter.
pub const ATTEMPTS_KEY: &str = "_outbox_attempts";

/// Boxed future returned by [`OutboxHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// Subscriber invoked for every claimed lifecycle event.
pub trait OutboxHandler
where
	Self: Send + Sync,
{
	/// Stable handler name used in joined error reports.
	fn name(&self) -> &str;

	/// Processes one event. Errors trigger the retry path.
	fn handle<'a>(&'a self, event: &'a LifecycleEvent) -> HandlerFuture<'a>;
}

/// Exponential backoff configuration for redelivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxRetryPolicy {
	/// Delivery attempts before an event is marked terminally failed.
	pub max_attempts: u32,
	/// Base backoff unit.
	pub initial_backoff: Duration,
	/// Upper bound on the computed backoff.
	pub max_backoff: Duration,
}
impl Default for OutboxRetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			initial_backoff: Duration::seconds(1),
			max_backoff: Duration::minutes(5),
		}
	}
}
impl OutboxRetryPolicy {
	/// Backoff applied after the given prior-attempt count: `initial·2^attempts`,
	/// capped at the maximum.
	pub fn backoff_after(&self, attempts: u32) -> Duration {
		let factor = 2_i64.saturating_pow(attempts.min(30));
		let raw = self.initial_backoff.saturating_mul(factor as i32);

		raw.min(self.max_backoff)
	}
}

/// Counters accumulated across dispatch batches.
#[derive(Debug, Default)]
struct DispatchCounters {
	claimed: AtomicU64,
	delivered: AtomicU64,
	retried: AtomicU64,
	failed: AtomicU64,
}

/// Snapshot of the dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
	/// Events claimed from the store.
	pub claimed: u64,
	/// Events delivered and acknowledged.
	pub delivered: u64,
	/// Events rescheduled for another attempt.
	pub retried: u64,
	/// Events marked terminally failed.
	pub failed: u64,
}

/// Outcome of one dispatch call: the per-call stats plus joined handler errors.
#[derive(Clone, Debug, Default)]
pub struct DispatchReport {
	/// Stats for this call only.
	pub stats: DispatchStats,
	/// Handler errors, joined; failures never abort the batch.
	pub errors: Vec<String>,
}

/// Claim-ack-retry dispatcher over an [`OutboxStore`].
///
/// Dispatch batches are serialized through an internal guard so at most one
/// retry pass runs at a time; handlers within a batch run sequentially per
/// event. Cancellation is honored between events, not mid-event.
pub struct OutboxDispatcher {
	store: Arc<dyn OutboxStore>,
	handlers: RwLock<Vec<Arc<dyn OutboxHandler>>>,
	policy: OutboxRetryPolicy,
	clock: Clock,
	counters: DispatchCounters,
	dispatch_guard: AsyncMutex<()>,
}
impl OutboxDispatcher {
	/// Creates a dispatcher over the provided store.
	pub fn new(store: Arc<dyn OutboxStore>, clock: Clock) -> Self {
		Self {
			store,
			handlers: RwLock::new(Vec::new()),
			policy: OutboxRetryPolicy::default(),
			clock,
			counters: DispatchCounters::default(),
			dispatch_guard: AsyncMutex::new(()),
		}
	}

	/// Overrides the retry policy.
	pub fn with_policy(mut self, policy: OutboxRetryPolicy) -> Self {
		self.policy = policy;

		self
	}

	/// Registers a delivery handler.
	pub fn register_handler(&self, handler: Arc<dyn OutboxHandler>) {
		self.handlers.write().push(handler);
	}

	/// Totals accumulated since the dispatcher was created.
	pub fn stats(&self) -> DispatchStats {
		DispatchStats {
			claimed: self.counters.claimed.load(Ordering::Relaxed),
			delivered: self.counters.delivered.load(Ordering::Relaxed),
			retried: self.counters.retried.load(Ordering::Relaxed),
			failed: self.counters.failed.load(Ordering::Relaxed),
		}
	}

	/// Claims up to `limit` due events and runs every handler for each.
	pub async fn dispatch_pending(&self, limit: usize) -> Result<DispatchReport> {
		const KIND: OpKind = OpKind::OutboxDispatch;

		let span = OpSpan::new(KIND, "dispatch_pending");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let _serialized = self.dispatch_guard.lock().await;
				let now = self.clock.now();
				let batch = self.store.claim_batch(limit, now).await?;
				let mut report = DispatchReport {
					stats: DispatchStats { claimed: batch.len() as u64, ..DispatchStats::default() },
					errors: Vec::new(),
				};

				self.counters.claimed.fetch_add(report.stats.claimed, Ordering::Relaxed);

				for event in batch {
					match self.deliver(&event).await {
						Ok(()) => {
							self.store.ack(&event.id).await?;
							report.stats.delivered += 1;
							self.counters.delivered.fetch_add(1, Ordering::Relaxed);
						},
						Err(joined) => {
							report.errors.extend(joined);

							let attempts = event.outbox_attempts();
							let mut updated = event.clone();

							updated
								.metadata
								.insert(ATTEMPTS_KEY.into(), Json::from(attempts + 1));

							if attempts + 1 >= self.policy.max_attempts {
								self.store.retry(updated, None).await?;
								report.stats.failed += 1;
								self.counters.failed.fetch_add(1, Ordering::Relaxed);
							} else {
								let next_attempt_at =
									self.clock.now() + self.policy.backoff_after(attempts);

								self.store.retry(updated, Some(next_attempt_at)).await?;
								report.stats.retried += 1;
								self.counters.retried.fetch_add(1, Ordering::Relaxed);
							}
						},
					}
				}

				Ok(report)
			})
			.await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// Dispatches batches until the store runs dry or `max_batches` is reached.
	pub async fn drain(&self, batch_size: usize, max_batches: usize) -> Result<DispatchReport> {
		let mut total = DispatchReport::default();

		for _ in 0..max_batches {
			let report = self.dispatch_pending(batch_size).await?;

			if report.stats.claimed == 0 {
				break;
			}

			total.stats.claimed += report.stats.claimed;
			total.stats.delivered += report.stats.delivered;
			total.stats.retried += report.stats.retried;
			total.stats.failed += report.stats.failed;
			total.errors.extend(report.errors);
		}

		Ok(total)
	}

	async fn deliver(&self, event: &LifecycleEvent) -> Result<(), Vec<String>> {
		let handlers: Vec<Arc<dyn OutboxHandler>> = self.handlers.read().clone();
		let mut errors = Vec::new();

		for handler in handlers {
			if let Err(err) = handler.handle(event).await {
				errors.push(format!("{}: {err}", handler.name()));
			}
		}

		if errors.is_empty() { Ok(()) } else { Err(errors) }
	}
}
impl Debug for OutboxDispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OutboxDispatcher")
			.field("handlers", &self.handlers.read().len())
			.field("policy", &self.policy)
			.finish_non_exhaustive()
	}
}

impl Service {
	/// Creates a dispatcher bound to this service's outbox store and clock.
	pub fn outbox_dispatcher(&self) -> OutboxDispatcher {
		OutboxDispatcher::new(self.outbox.clone(), self.clock.clone())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn backoff_doubles_per_attempt_and_caps() {
		let policy = OutboxRetryPolicy {
			max_attempts: 4,
			initial_backoff: Duration::seconds(1),
			max_backoff: Duration::seconds(8),
		};

		assert_eq!(policy.backoff_after(0), Duration::seconds(1));
		assert_eq!(policy.backoff_after(1), Duration::seconds(2));
		assert_eq!(policy.backoff_after(2), Duration::seconds(4));
		assert_eq!(policy.backoff_after(3), Duration::seconds(8));
		assert_eq!(policy.backoff_after(10), Duration::seconds(8));
	}
}
