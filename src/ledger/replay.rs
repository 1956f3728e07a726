//! Generic replay ledger fencing single-delivery keys within a TTL window.

// self
use crate::_prelude::*;

/// Default capacity bound for the in-memory ledger.
pub const DEFAULT_REPLAY_CAPACITY: usize = 100_000;

/// Boxed future returned by [`ReplayLedger::claim`].
pub type ReplayFuture<'a> = Pin<Box<dyn Future<Output = Result<bool>> + 'a + Send>>;

/// Contract for single-delivery fencing.
///
/// `claim(key, ttl)` returns true exactly once per key until the ttl elapses;
/// subsequent claims within the window return false.
pub trait ReplayLedger
where
	Self: Send + Sync,
{
	/// Attempts to claim the key for the provided window.
	fn claim<'a>(&'a self, key: &'a str, ttl: Duration, now: OffsetDateTime) -> ReplayFuture<'a>;
}

/// Bounded in-memory [`ReplayLedger`].
#[derive(Debug)]
pub struct MemoryReplayLedger {
	claims: Mutex<HashMap<String, OffsetDateTime>>,
	capacity: usize,
}
impl MemoryReplayLedger {
	/// Creates a ledger bounded to the provided capacity.
	pub fn new(capacity: usize) -> Self {
		Self { claims: Mutex::new(HashMap::new()), capacity: capacity.max(1) }
	}

	fn claim_now(&self, key: &str, ttl: Duration, now: OffsetDateTime) -> bool {
		let mut claims = self.claims.lock();

		if let Some(expires_at) = claims.get(key) {
			if *expires_at > now {
				return false;
			}
		}
		if claims.len() >= self.capacity && !claims.contains_key(key) {
			let earliest = claims
				.iter()
				.min_by_key(|(_, expires_at)| **expires_at)
				.map(|(key, _)| key.clone());

			if let Some(evicted) = earliest {
				claims.remove(&evicted);
			}
		}

		claims.insert(key.to_owned(), now + ttl);

		true
	}
}
impl Default for MemoryReplayLedger {
	fn default() -> Self {
		Self::new(DEFAULT_REPLAY_CAPACITY)
	}
}
impl ReplayLedger for MemoryReplayLedger {
	fn claim<'a>(&'a self, key: &'a str, ttl: Duration, now: OffsetDateTime) -> ReplayFuture<'a> {
		Box::pin(async move { Ok(self.claim_now(key, ttl, now)) })
	}
}
