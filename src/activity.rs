//! Operational activity sink: buffered primary writes with a fallback path.
//!
//! Entries are serialized into a bounded channel drained by a background
//! worker; when the channel is full or the primary sink rejects an entry, the
//! entry is forwarded to the fallback sink on its own worker. `record` never
//! blocks beyond the enqueue attempt. When both the saturated-primary path and
//! a direct fallback write race, the relative order of the two entries in the
//! fallback sink is unspecified.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use tokio::sync::mpsc;
// self
use crate::{_prelude::*, error::ErrorCategory};

/// Default bound for the primary buffer channel.
pub const DEFAULT_ACTIVITY_BUFFER: usize = 1024;

/// Boxed future returned by activity contracts.
pub type ActivityFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// One operational activity entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
	/// Entry kind (e.g. `auth.refresh`, `sync.run`).
	pub kind: String,
	/// Human-readable message.
	pub message: String,
	/// Structured metadata. Callers redact before recording.
	pub metadata: BTreeMap<String, Json>,
	/// Instant the activity occurred.
	pub occurred_at: OffsetDateTime,
}

/// Destination for operational activity entries.
pub trait ActivitySink
where
	Self: Send + Sync,
{
	/// Records one entry.
	fn record(&self, entry: ActivityEntry) -> ActivityFuture<'_>;
}

/// Retention policy combining a TTL with a row cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
	/// Entries older than this are pruned.
	pub ttl: Duration,
	/// At most this many entries are kept, newest first.
	pub row_cap: usize,
}

/// Prunes stored activity per the retention policy.
pub trait ActivityRetentionPruner
where
	Self: Send + Sync,
{
	/// Applies the policy relative to `now`.
	fn prune(&self, policy: RetentionPolicy, now: OffsetDateTime) -> ActivityFuture<'_>;
}

/// Primary/fallback activity pipeline with bounded buffering.
pub struct OperationalActivitySink {
	primary_tx: mpsc::Sender<ActivityEntry>,
	fallback_tx: mpsc::UnboundedSender<ActivityEntry>,
	pruner: Arc<dyn ActivityRetentionPruner>,
}
impl OperationalActivitySink {
	/// Spawns the pipeline workers on the current tokio runtime.
	pub fn spawn(
		primary: Arc<dyn ActivitySink>,
		fallback: Arc<dyn ActivitySink>,
		pruner: Arc<dyn ActivityRetentionPruner>,
		buffer: usize,
	) -> Self {
		let (primary_tx, mut primary_rx) = mpsc::channel::<ActivityEntry>(buffer.max(1));
		let (fallback_tx, mut fallback_rx) = mpsc::unbounded_channel::<ActivityEntry>();
		let worker_fallback_tx = fallback_tx.clone();

		tokio::spawn(async move {
			while let Some(entry) = primary_rx.recv().await {
				if primary.record(entry.clone()).await.is_err() {
					let _ = worker_fallback_tx.send(entry);
				}
			}
		});
		tokio::spawn(async move {
			while let Some(entry) = fallback_rx.recv().await {
				let _ = fallback.record(entry).await;
			}
		});

		Self { primary_tx, fallback_tx, pruner }
	}

	/// Records an entry without blocking beyond the enqueue attempt.
	///
	/// A saturated primary buffer reroutes the entry to the fallback sink.
	pub fn record(&self, entry: ActivityEntry) -> Result<()> {
		match self.primary_tx.try_send(entry) {
			Ok(()) => Ok(()),
			Err(mpsc::error::TrySendError::Full(entry))
			| Err(mpsc::error::TrySendError::Closed(entry)) => self
				.fallback_tx
				.send(entry)
				.map_err(|_| {
					ServiceError::new(
						ErrorCategory::Internal,
						"Activity pipeline is shut down.",
					)
				}),
		}
	}

	/// Applies the retention policy through the injected pruner.
	pub async fn enforce_retention(&self, policy: RetentionPolicy) -> Result<()> {
		self.pruner.prune(policy, OffsetDateTime::now_utc()).await
	}
}
impl Debug for OperationalActivitySink {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OperationalActivitySink").finish_non_exhaustive()
	}
}

/// In-memory activity sink for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryActivitySink {
	entries: Mutex<Vec<ActivityEntry>>,
	failing: AtomicBool,
}
impl MemoryActivitySink {
	/// Creates a sink that accepts every entry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes `record` fail until switched back, for fallback-path tests.
	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	/// Snapshot of recorded entries.
	pub fn entries(&self) -> Vec<ActivityEntry> {
		self.entries.lock().clone()
	}

	/// Number of recorded entries.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns true when nothing was recorded.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}
impl ActivitySink for MemoryActivitySink {
	fn record(&self, entry: ActivityEntry) -> ActivityFuture<'_> {
		Box::pin(async move {
			if self.failing.load(Ordering::SeqCst) {
				return Err(ServiceError::new(
					ErrorCategory::Internal,
					"Activity sink rejected the entry.",
				));
			}

			self.entries.lock().push(entry);

			Ok(())
		})
	}
}
impl ActivityRetentionPruner for MemoryActivitySink {
	fn prune(&self, policy: RetentionPolicy, now: OffsetDateTime) -> ActivityFuture<'_> {
		Box::pin(async move {
			let mut entries = self.entries.lock();

			entries.retain(|entry| now - entry.occurred_at <= policy.ttl);

			let overflow = entries.len().saturating_sub(policy.row_cap);

			if overflow > 0 {
				entries.drain(..overflow);
			}

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn entry(kind: &str, at: OffsetDateTime) -> ActivityEntry {
		ActivityEntry {
			kind: kind.into(),
			message: "activity".into(),
			metadata: BTreeMap::new(),
			occurred_at: at,
		}
	}

	async fn settle() {
		// Lets the pipeline workers drain their channels.
		for _ in 0..20 {
			tokio::task::yield_now().await;
		}

		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn entries_flow_to_the_primary_sink() {
		let primary = Arc::new(MemoryActivitySink::new());
		let fallback = Arc::new(MemoryActivitySink::new());
		let sink = OperationalActivitySink::spawn(
			primary.clone(),
			fallback.clone(),
			primary.clone(),
			8,
		);
		let at = macros::datetime!(2026-01-01 00:00 UTC);

		sink.record(entry("auth.refresh", at)).expect("Record should enqueue.");
		settle().await;

		assert_eq!(primary.len(), 1);
		assert!(fallback.is_empty());
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn primary_failures_reroute_to_fallback() {
		let primary = Arc::new(MemoryActivitySink::new());
		let fallback = Arc::new(MemoryActivitySink::new());
		let sink = OperationalActivitySink::spawn(
			primary.clone(),
			fallback.clone(),
			primary.clone(),
			8,
		);
		let at = macros::datetime!(2026-01-01 00:00 UTC);

		primary.set_failing(true);
		sink.record(entry("sync.run", at)).expect("Record should enqueue.");
		settle().await;

		assert!(primary.is_empty());
		assert_eq!(fallback.len(), 1);
	}

	struct SlowSink {
		inner: MemoryActivitySink,
	}
	impl ActivitySink for SlowSink {
		fn record(&self, entry: ActivityEntry) -> ActivityFuture<'_> {
			Box::pin(async move {
				tokio::time::sleep(std::time::Duration::from_millis(30)).await;

				self.inner.record(entry).await
			})
		}
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn saturation_loses_no_entries() {
		let primary = Arc::new(SlowSink { inner: MemoryActivitySink::new() });
		let fallback = Arc::new(MemoryActivitySink::new());
		let pruner = Arc::new(MemoryActivitySink::new());
		let sink =
			OperationalActivitySink::spawn(primary.clone(), fallback.clone(), pruner, 1);
		let at = macros::datetime!(2026-01-01 00:00 UTC);

		for index in 0..6 {
			sink.record(entry(&format!("k{index}"), at)).expect("Record should enqueue.");
		}

		for _ in 0..50 {
			if primary.inner.len() + fallback.len() == 6 {
				break;
			}

			tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		}

		// The split between primary and fallback is unspecified; no entry is
		// dropped either way.
		assert_eq!(primary.inner.len() + fallback.len(), 6);
	}

	#[tokio::test]
	async fn retention_prunes_by_ttl_and_cap() {
		let sink = MemoryActivitySink::new();
		let now = macros::datetime!(2026-01-02 00:00 UTC);

		for hour in 0..30 {
			sink.entries
				.lock()
				.push(entry("k", now - Duration::hours(hour)));
		}

		sink.prune(RetentionPolicy { ttl: Duration::hours(24), row_cap: 10 }, now)
			.await
			.expect("Prune should succeed.");

		assert_eq!(sink.len(), 10);
		assert!(sink.entries().iter().all(|e| now - e.occurred_at <= Duration::hours(24)));
	}
}
