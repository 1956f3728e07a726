//! The `Service` façade and the auth lifecycle flows built on it.
//!
//! The service owns the provider registry, stores, ledgers, secret provider,
//! and policy hooks so individual flow implementations can focus on their
//! semantics (state round-trips, credential rotation, sync runs, …). Flows
//! live in submodules as `impl Service` blocks, the way grant-specific logic
//! hangs off a single broker value.

pub mod callback;
pub mod common;
pub mod connect;
pub mod reconsent;
pub mod refresh;
pub mod revoke;

pub use callback::*;
pub use common::*;
pub use connect::*;
pub use reconsent::*;
pub use refresh::*;
pub use revoke::*;

// crates.io
use rand::RngCore;
// self
use crate::{
	_prelude::*,
	activity::{ActivityEntry, OperationalActivitySink, RetentionPolicy},
	config::{ConfigLayers, ServiceConfig},
	domain::{
		CheckpointId, ConflictId, Connection, ConnectionId, CredentialId, EventId, GrantEvent,
		GrantSnapshot, LifecycleEvent, ProviderId, Scope,
	},
	ledger::{DEFAULT_STATE_TTL, MemoryOAuthStateStore, MemoryReplayLedger, OAuthStateStore, ReplayLedger},
	provider::ProviderRegistry,
	runtime::{OperationPolicy, RetryPolicy},
	secret::{AesGcmSecretProvider, SecretProvider},
	signer::ProviderSigner,
	store::{
		ChangeLogStore, CheckpointStore, ConflictStore, ConnectionLocker, ConnectionStore,
		CredentialStore, GrantStore, MappingSpecStore, MemoryChangeLogStore,
		MemoryCheckpointStore, MemoryConflictStore, MemoryConnectionLocker, MemoryConnectionStore,
		MemoryCredentialStore, MemoryGrantStore, MemoryMappingSpecStore, MemoryOutboxStore,
		OutboxStore,
	},
	sync::ConflictPolicyHook,
	transport::{DefaultTransportResolver, TransportResolver},
};

/// Injectable clock; every timestamp the service produces flows through it.
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> OffsetDateTime + Send + Sync>);
impl Clock {
	/// Creates a clock from a closure.
	pub fn new(now: impl Fn() -> OffsetDateTime + Send + Sync + 'static) -> Self {
		Self(Arc::new(now))
	}

	/// Creates a clock frozen at the provided instant, for tests.
	pub fn fixed(at: OffsetDateTime) -> Self {
		Self::new(move || at)
	}

	/// Returns the current instant.
	pub fn now(&self) -> OffsetDateTime {
		(self.0)()
	}
}
impl Default for Clock {
	fn default() -> Self {
		Self::new(OffsetDateTime::now_utc)
	}
}
impl Debug for Clock {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Clock(..)")
	}
}

/// Injectable identifier factory.
#[derive(Clone)]
pub struct IdGenerator(Arc<dyn Fn(&str) -> String + Send + Sync>);
impl IdGenerator {
	/// Creates a generator from a closure receiving the entity prefix.
	pub fn new(generate: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
		Self(Arc::new(generate))
	}

	/// Creates a sequential generator, for deterministic tests.
	pub fn sequential() -> Self {
		let counter = Arc::new(Mutex::new(0_u64));

		Self::new(move |prefix| {
			let mut counter = counter.lock();

			*counter += 1;

			format!("{prefix}-{counter}")
		})
	}

	/// Produces an identifier for the provided entity prefix.
	pub fn generate(&self, prefix: &str) -> String {
		(self.0)(prefix)
	}
}
impl Default for IdGenerator {
	fn default() -> Self {
		Self::new(|prefix| {
			let mut bytes = [0_u8; 12];

			rand::rng().fill_bytes(&mut bytes);

			format!("{prefix}_{}", hex::encode(bytes))
		})
	}
}
impl Debug for IdGenerator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("IdGenerator(..)")
	}
}

/// Provider-agnostic integration service façade.
///
/// Composed via [`ServiceBuilder`]; every collaborator is injected and
/// defaults to the in-memory implementation when omitted. The value is cheap
/// to clone and safe to share across threads.
#[derive(Clone)]
pub struct Service {
	pub(crate) config: ServiceConfig,
	pub(crate) registry: Arc<ProviderRegistry>,
	pub(crate) connections: Arc<dyn ConnectionStore>,
	pub(crate) credentials: Arc<dyn CredentialStore>,
	pub(crate) grants: Arc<dyn GrantStore>,
	pub(crate) oauth_states: Arc<dyn OAuthStateStore>,
	pub(crate) replays: Arc<dyn ReplayLedger>,
	pub(crate) checkpoints: Arc<dyn CheckpointStore>,
	pub(crate) change_log: Arc<dyn ChangeLogStore>,
	pub(crate) conflicts: Arc<dyn ConflictStore>,
	pub(crate) mapping_specs: Arc<dyn MappingSpecStore>,
	pub(crate) outbox: Arc<dyn OutboxStore>,
	pub(crate) secret_provider: Arc<dyn SecretProvider>,
	pub(crate) locker: Arc<dyn ConnectionLocker>,
	pub(crate) callback_urls: Option<Arc<dyn CallbackUrlResolver>>,
	pub(crate) refresh_backoff: Arc<dyn RefreshBackoffScheduler>,
	pub(crate) conflict_policy: Option<Arc<dyn ConflictPolicyHook>>,
	pub(crate) transport_resolver: Arc<dyn TransportResolver>,
	pub(crate) signer_override: Option<Arc<dyn ProviderSigner>>,
	pub(crate) operation_policy: Option<Arc<dyn OperationPolicy>>,
	pub(crate) activity: Option<Arc<OperationalActivitySink>>,
	pub(crate) retry_policy: RetryPolicy,
	pub(crate) state_ttl: Duration,
	pub(crate) clock: Clock,
	pub(crate) id_gen: IdGenerator,
}
impl Service {
	/// Starts a builder with every collaborator unset.
	pub fn builder() -> ServiceBuilder {
		ServiceBuilder::default()
	}

	/// Effective configuration the service was built with.
	pub fn config(&self) -> &ServiceConfig {
		&self.config
	}

	/// Fetches a connection snapshot by id.
	pub async fn get_connection(&self, id: &ConnectionId) -> Result<Connection> {
		self.connections
			.get(id)
			.await?
			.ok_or_else(|| ServiceError::not_found(format!("Connection not found: {id}.")))
	}

	/// Lists connection snapshots for a (provider, scope) pair.
	pub async fn list_connections(
		&self,
		provider_id: &ProviderId,
		scope: &Scope,
	) -> Result<Vec<Connection>> {
		scope.validate()?;

		Ok(self.connections.list(provider_id, scope).await?)
	}

	/// Returns the grant journal for a connection, ordered by version.
	pub async fn grant_history(
		&self,
		connection_id: &ConnectionId,
	) -> Result<(Vec<GrantSnapshot>, Vec<GrantEvent>)> {
		Ok(self.grants.history(connection_id).await?)
	}

	/// Records an operational activity entry, when a sink is configured.
	pub fn record_activity(&self, entry: ActivityEntry) -> Result<()> {
		match &self.activity {
			Some(sink) => sink.record(entry),
			None => Ok(()),
		}
	}

	/// Applies the activity retention policy, when a sink is configured.
	pub async fn enforce_activity_retention(&self, policy: RetentionPolicy) -> Result<()> {
		match &self.activity {
			Some(sink) => sink.enforce_retention(policy).await,
			None => Ok(()),
		}
	}

	pub(crate) async fn emit_event(&self, event: LifecycleEvent) -> Result<()> {
		self.outbox.enqueue(event).await?;

		Ok(())
	}

	pub(crate) fn new_connection_id(&self) -> Result<ConnectionId> {
		Ok(ConnectionId::new(self.id_gen.generate("conn"))?)
	}

	pub(crate) fn new_credential_id(&self) -> Result<CredentialId> {
		Ok(CredentialId::new(self.id_gen.generate("cred"))?)
	}

	pub(crate) fn new_event_id(&self) -> Result<EventId> {
		Ok(EventId::new(self.id_gen.generate("evt"))?)
	}

	pub(crate) fn new_checkpoint_id(&self) -> Result<CheckpointId> {
		Ok(CheckpointId::new(self.id_gen.generate("ckpt"))?)
	}

	pub(crate) fn new_conflict_id(&self) -> Result<ConflictId> {
		Ok(ConflictId::new(self.id_gen.generate("cflt"))?)
	}
}
impl Debug for Service {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Service")
			.field("service_name", &self.config.service_name)
			.field("providers", &self.registry.len())
			.finish_non_exhaustive()
	}
}

/// Builder assembling a [`Service`] with defaults for anything omitted.
#[derive(Default)]
pub struct ServiceBuilder {
	config_layers: ConfigLayers,
	registry: Option<Arc<ProviderRegistry>>,
	connections: Option<Arc<dyn ConnectionStore>>,
	credentials: Option<Arc<dyn CredentialStore>>,
	grants: Option<Arc<dyn GrantStore>>,
	oauth_states: Option<Arc<dyn OAuthStateStore>>,
	replays: Option<Arc<dyn ReplayLedger>>,
	checkpoints: Option<Arc<dyn CheckpointStore>>,
	change_log: Option<Arc<dyn ChangeLogStore>>,
	conflicts: Option<Arc<dyn ConflictStore>>,
	mapping_specs: Option<Arc<dyn MappingSpecStore>>,
	outbox: Option<Arc<dyn OutboxStore>>,
	secret_provider: Option<Arc<dyn SecretProvider>>,
	locker: Option<Arc<dyn ConnectionLocker>>,
	callback_urls: Option<Arc<dyn CallbackUrlResolver>>,
	refresh_backoff: Option<Arc<dyn RefreshBackoffScheduler>>,
	conflict_policy: Option<Arc<dyn ConflictPolicyHook>>,
	transport_resolver: Option<Arc<dyn TransportResolver>>,
	signer_override: Option<Arc<dyn ProviderSigner>>,
	operation_policy: Option<Arc<dyn OperationPolicy>>,
	activity: Option<Arc<OperationalActivitySink>>,
	retry_policy: Option<RetryPolicy>,
	state_ttl: Option<Duration>,
	clock: Option<Clock>,
	id_gen: Option<IdGenerator>,
}
impl ServiceBuilder {
	/// Sets the configuration layers (runtime > loaded > defaults).
	pub fn config_layers(mut self, layers: ConfigLayers) -> Self {
		self.config_layers = layers;

		self
	}

	/// Sets the provider registry.
	pub fn registry(mut self, registry: ProviderRegistry) -> Self {
		self.registry = Some(Arc::new(registry));

		self
	}

	/// Sets the connection store.
	pub fn connections(mut self, store: Arc<dyn ConnectionStore>) -> Self {
		self.connections = Some(store);

		self
	}

	/// Sets the credential store.
	pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
		self.credentials = Some(store);

		self
	}

	/// Sets the grant journal store.
	pub fn grants(mut self, store: Arc<dyn GrantStore>) -> Self {
		self.grants = Some(store);

		self
	}

	/// Sets the OAuth state ledger.
	pub fn oauth_states(mut self, store: Arc<dyn OAuthStateStore>) -> Self {
		self.oauth_states = Some(store);

		self
	}

	/// Sets the replay ledger.
	pub fn replays(mut self, ledger: Arc<dyn ReplayLedger>) -> Self {
		self.replays = Some(ledger);

		self
	}

	/// Sets the checkpoint store.
	pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
		self.checkpoints = Some(store);

		self
	}

	/// Sets the sync change log store.
	pub fn change_log(mut self, store: Arc<dyn ChangeLogStore>) -> Self {
		self.change_log = Some(store);

		self
	}

	/// Sets the conflict ledger store.
	pub fn conflicts(mut self, store: Arc<dyn ConflictStore>) -> Self {
		self.conflicts = Some(store);

		self
	}

	/// Sets the mapping spec store.
	pub fn mapping_specs(mut self, store: Arc<dyn MappingSpecStore>) -> Self {
		self.mapping_specs = Some(store);

		self
	}

	/// Sets the outbox store.
	pub fn outbox(mut self, store: Arc<dyn OutboxStore>) -> Self {
		self.outbox = Some(store);

		self
	}

	/// Sets the secret provider sealing credential envelopes.
	pub fn secret_provider(mut self, provider: Arc<dyn SecretProvider>) -> Self {
		self.secret_provider = Some(provider);

		self
	}

	/// Sets the connection locker.
	pub fn locker(mut self, locker: Arc<dyn ConnectionLocker>) -> Self {
		self.locker = Some(locker);

		self
	}

	/// Sets the callback URL resolver for flows that omit a redirect URI.
	pub fn callback_urls(mut self, resolver: Arc<dyn CallbackUrlResolver>) -> Self {
		self.callback_urls = Some(resolver);

		self
	}

	/// Sets the refresh backoff scheduler.
	pub fn refresh_backoff(mut self, scheduler: Arc<dyn RefreshBackoffScheduler>) -> Self {
		self.refresh_backoff = Some(scheduler);

		self
	}

	/// Sets the sync conflict policy hook.
	pub fn conflict_policy(mut self, hook: Arc<dyn ConflictPolicyHook>) -> Self {
		self.conflict_policy = Some(hook);

		self
	}

	/// Sets the transport resolver.
	pub fn transport_resolver(mut self, resolver: Arc<dyn TransportResolver>) -> Self {
		self.transport_resolver = Some(resolver);

		self
	}

	/// Sets a signer used for every operation, overriding auth-kind selection.
	pub fn signer_override(mut self, signer: Arc<dyn ProviderSigner>) -> Self {
		self.signer_override = Some(signer);

		self
	}

	/// Sets the operation policy (rate limiting, retry hooks).
	pub fn operation_policy(mut self, policy: Arc<dyn OperationPolicy>) -> Self {
		self.operation_policy = Some(policy);

		self
	}

	/// Sets the operational activity sink.
	pub fn activity(mut self, sink: Arc<OperationalActivitySink>) -> Self {
		self.activity = Some(sink);

		self
	}

	/// Sets the retry policy for provider operations.
	pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = Some(policy);

		self
	}

	/// Overrides the OAuth state TTL.
	pub fn state_ttl(mut self, ttl: Duration) -> Self {
		self.state_ttl = Some(ttl);

		self
	}

	/// Sets the clock.
	pub fn clock(mut self, clock: Clock) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Sets the identifier factory.
	pub fn id_gen(mut self, id_gen: IdGenerator) -> Self {
		self.id_gen = Some(id_gen);

		self
	}

	/// Assembles the service, filling unset collaborators with defaults.
	pub fn build(self) -> Result<Service> {
		let secret_provider: Arc<dyn SecretProvider> = match self.secret_provider {
			Some(provider) => provider,
			None => {
				let mut key = [0_u8; 32];

				rand::rng().fill_bytes(&mut key);

				Arc::new(AesGcmSecretProvider::new(&key)?)
			},
		};

		Ok(Service {
			config: self.config_layers.resolve(),
			registry: self.registry.unwrap_or_else(|| Arc::new(ProviderRegistry::new())),
			connections: self
				.connections
				.unwrap_or_else(|| Arc::new(MemoryConnectionStore::default())),
			credentials: self
				.credentials
				.unwrap_or_else(|| Arc::new(MemoryCredentialStore::default())),
			grants: self.grants.unwrap_or_else(|| Arc::new(MemoryGrantStore::default())),
			oauth_states: self
				.oauth_states
				.unwrap_or_else(|| Arc::new(MemoryOAuthStateStore::default())),
			replays: self.replays.unwrap_or_else(|| Arc::new(MemoryReplayLedger::default())),
			checkpoints: self
				.checkpoints
				.unwrap_or_else(|| Arc::new(MemoryCheckpointStore::default())),
			change_log: self
				.change_log
				.unwrap_or_else(|| Arc::new(MemoryChangeLogStore::default())),
			conflicts: self.conflicts.unwrap_or_else(|| Arc::new(MemoryConflictStore::default())),
			mapping_specs: self
				.mapping_specs
				.unwrap_or_else(|| Arc::new(MemoryMappingSpecStore::default())),
			outbox: self.outbox.unwrap_or_else(|| Arc::new(MemoryOutboxStore::default())),
			secret_provider,
			locker: self.locker.unwrap_or_else(|| Arc::new(MemoryConnectionLocker::default())),
			callback_urls: self.callback_urls,
			refresh_backoff: self
				.refresh_backoff
				.unwrap_or_else(|| Arc::new(ExponentialRefreshBackoff::default())),
			conflict_policy: self.conflict_policy,
			transport_resolver: self
				.transport_resolver
				.unwrap_or_else(|| Arc::new(DefaultTransportResolver)),
			signer_override: self.signer_override,
			operation_policy: self.operation_policy,
			activity: self.activity,
			retry_policy: self.retry_policy.unwrap_or_default(),
			state_ttl: self.state_ttl.unwrap_or(DEFAULT_STATE_TTL),
			clock: self.clock.unwrap_or_default(),
			id_gen: self.id_gen.unwrap_or_default(),
		})
	}
}
impl Debug for ServiceBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ServiceBuilder").finish_non_exhaustive()
	}
}
