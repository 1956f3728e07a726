//! OAuth callback-state ledger: TTL- and capacity-bounded, single-use.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
// self
use crate::{
	_prelude::*,
	domain::{ConnectionId, GrantSet, ProviderId, Scope},
};

/// Default time-to-live for issued callback states.
pub const DEFAULT_STATE_TTL: Duration = Duration::minutes(15);
/// Default capacity bound for the in-memory ledger.
pub const DEFAULT_STATE_CAPACITY: usize = 10_000;

const STATE_ENTROPY_BYTES: usize = 24;

/// Boxed future returned by [`OAuthStateStore`] methods.
pub type StateFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Flow that issued a callback state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackFlow {
	/// Initial connect flow.
	Connect,
	/// Reconsent flow for an existing connection.
	Reconsent,
}
impl CallbackFlow {
	/// Returns the lowercase label for the flow.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallbackFlow::Connect => "connect",
			CallbackFlow::Reconsent => "reconsent",
		}
	}
}

/// Pending callback state captured when an authorization round-trip begins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthStateRecord {
	/// Opaque single-use state value.
	pub state: String,
	/// Provider the round-trip targets.
	pub provider_id: ProviderId,
	/// Internal actor the round-trip is for.
	pub scope: Scope,
	/// Flow that issued the state.
	pub flow: CallbackFlow,
	/// Redirect URI captured at issue time.
	pub redirect_uri: Option<Url>,
	/// Grants the flow asked for.
	pub requested_grants: GrantSet,
	/// Connection being reconsented, for reconsent flows.
	pub connection_id: Option<ConnectionId>,
	/// Caller metadata echoed back on completion.
	pub metadata: BTreeMap<String, Json>,
	/// Issue instant.
	pub created_at: OffsetDateTime,
	/// Expiry instant.
	pub expires_at: OffsetDateTime,
}

/// Persistence contract for the callback-state ledger.
///
/// `consume` must be atomic and single-use: a given state value is returned at
/// most once across all consume calls; later calls observe absence.
pub trait OAuthStateStore
where
	Self: Send + Sync,
{
	/// Persists a pending state record.
	fn put(&self, record: OAuthStateRecord) -> StateFuture<'_, ()>;

	/// Atomically removes and returns the record, if present and unexpired.
	fn consume<'a>(
		&'a self,
		state: &'a str,
		now: OffsetDateTime,
	) -> StateFuture<'a, Option<OAuthStateRecord>>;
}

/// Generates a fresh 192-bit base64url state value.
pub fn generate_state() -> String {
	let mut bytes = [0_u8; STATE_ENTROPY_BYTES];

	rand::rng().fill_bytes(&mut bytes);

	URL_SAFE_NO_PAD.encode(bytes)
}

/// Bounded in-memory [`OAuthStateStore`] for local development and tests.
#[derive(Debug)]
pub struct MemoryOAuthStateStore {
	entries: Mutex<HashMap<String, OAuthStateRecord>>,
	capacity: usize,
}
impl MemoryOAuthStateStore {
	/// Creates a store bounded to the provided capacity.
	pub fn new(capacity: usize) -> Self {
		Self { entries: Mutex::new(HashMap::new()), capacity: capacity.max(1) }
	}

	/// Number of live entries, counting expired-but-unpurged records.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns true when no entries are held.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	fn put_now(&self, record: OAuthStateRecord) {
		let mut entries = self.entries.lock();

		if entries.len() >= self.capacity && !entries.contains_key(&record.state) {
			let earliest = entries
				.iter()
				.min_by_key(|(_, candidate)| candidate.expires_at)
				.map(|(state, _)| state.clone());

			if let Some(state) = earliest {
				entries.remove(&state);
			}
		}

		entries.insert(record.state.clone(), record);
	}

	fn consume_now(&self, state: &str, now: OffsetDateTime) -> Option<OAuthStateRecord> {
		let mut entries = self.entries.lock();
		let record = entries.remove(state)?;

		if record.expires_at <= now {
			return None;
		}

		Some(record)
	}
}
impl Default for MemoryOAuthStateStore {
	fn default() -> Self {
		Self::new(DEFAULT_STATE_CAPACITY)
	}
}
impl OAuthStateStore for MemoryOAuthStateStore {
	fn put(&self, record: OAuthStateRecord) -> StateFuture<'_, ()> {
		Box::pin(async move {
			self.put_now(record);

			Ok(())
		})
	}

	fn consume<'a>(
		&'a self,
		state: &'a str,
		now: OffsetDateTime,
	) -> StateFuture<'a, Option<OAuthStateRecord>> {
		Box::pin(async move { Ok(self.consume_now(state, now)) })
	}
}
