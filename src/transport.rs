//! Transport primitives for outbound provider operations.
//!
//! The module exposes [`TransportAdapter`] alongside the crate-owned
//! [`TransportRequest`]/[`TransportResponse`] records so downstream services can
//! integrate any HTTP stack without losing the runtime's retry and signing
//! instrumentation. The optional `reqwest` feature ships a ready REST adapter
//! used by [`DefaultTransportResolver`] for kind `"rest"`.

// crates.io
use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::error::ErrorCategory;

/// Transport kind label used when a request does not specify one.
pub const DEFAULT_TRANSPORT_KIND: &str = "rest";

/// Boxed future returned by [`TransportAdapter::execute`].
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Outbound request handed to a transport adapter.
///
/// Headers use case-preserving keys; lookups go through [`TransportRequest::header`]
/// which compares case-insensitively, matching HTTP semantics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportRequest {
	/// HTTP method (uppercased by the runtime).
	pub method: String,
	/// Absolute request URL.
	pub url: Url,
	/// Request headers.
	pub headers: BTreeMap<String, String>,
	/// Request body bytes.
	pub body: Vec<u8>,
}
impl TransportRequest {
	/// Creates a request for the provided method and URL.
	pub fn new(method: impl Into<String>, url: Url) -> Self {
		Self { method: method.into().to_ascii_uppercase(), url, headers: BTreeMap::new(), body: Vec::new() }
	}

	/// Sets a header, replacing any value under a case-insensitive match.
	pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
		let name = name.into();

		self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
		self.headers.insert(name, value.into());
	}

	/// Returns a header value via case-insensitive lookup.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(existing, _)| existing.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/// Attaches a body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();

		self
	}
}

/// Raw response produced by a transport adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response headers.
	pub headers: BTreeMap<String, String>,
	/// Response body bytes.
	pub body: Vec<u8>,
}
impl TransportResponse {
	/// Returns a header value via case-insensitive lookup.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(existing, _)| existing.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}

/// Normalized response metadata the runtime reasons about.
#[derive(Clone, Debug, Default)]
pub struct ProviderResponseMeta {
	/// HTTP status code.
	pub status_code: u16,
	/// Response headers, as received.
	pub headers: BTreeMap<String, String>,
	/// Normalizer- and signer-contributed metadata.
	pub metadata: BTreeMap<String, Json>,
	/// Parsed Retry-After hint, when the provider sent one.
	pub retry_after: Option<Duration>,
}

/// Abstraction over transports capable of executing provider operations.
pub trait TransportAdapter
where
	Self: Send + Sync,
{
	/// Stable transport kind label (e.g. `rest`, `graphql`) used in telemetry.
	fn kind(&self) -> &str;

	/// Executes the request. Network failures map to `external` errors.
	fn execute(&self, request: TransportRequest) -> TransportFuture<'_, TransportResponse>;
}

/// Builds transport adapters on demand from a kind label + configuration.
pub trait TransportResolver
where
	Self: Send + Sync,
{
	/// Builds an adapter for the requested kind.
	fn build(
		&self,
		kind: &str,
		config: &BTreeMap<String, Json>,
	) -> Result<Arc<dyn TransportAdapter>>;
}

/// Hook that maps raw responses into [`ProviderResponseMeta`].
pub trait ResponseNormalizer
where
	Self: Send + Sync,
{
	/// Normalizes the raw response.
	fn normalize(&self, response: &TransportResponse, now: OffsetDateTime) -> ProviderResponseMeta;
}

/// Default normalizer: copies status/headers and parses `Retry-After`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultResponseNormalizer;
impl ResponseNormalizer for DefaultResponseNormalizer {
	fn normalize(&self, response: &TransportResponse, now: OffsetDateTime) -> ProviderResponseMeta {
		let retry_after =
			response.header("retry-after").and_then(|raw| parse_retry_after(raw, now));

		ProviderResponseMeta {
			status_code: response.status,
			headers: response.headers.clone(),
			metadata: BTreeMap::new(),
			retry_after,
		}
	}
}

/// Parses a `Retry-After` header value relative to `now`.
///
/// Accepts non-negative integer seconds or an RFC 1123 HTTP-date; negative
/// deltas are ignored.
pub fn parse_retry_after(raw: &str, now: OffsetDateTime) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - now;

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

/// Resolver that serves the built-in adapters.
///
/// Kind `"rest"` resolves to [`ReqwestTransportAdapter`] when the `reqwest`
/// feature is enabled; unknown kinds are rejected so misconfigured operations
/// fail loudly instead of silently picking a transport.
#[derive(Clone, Debug, Default)]
pub struct DefaultTransportResolver;
impl TransportResolver for DefaultTransportResolver {
	fn build(
		&self,
		kind: &str,
		config: &BTreeMap<String, Json>,
	) -> Result<Arc<dyn TransportAdapter>> {
		let _ = config;

		match kind {
			#[cfg(feature = "reqwest")]
			DEFAULT_TRANSPORT_KIND => Ok(Arc::new(ReqwestTransportAdapter::default())),
			other => Err(ServiceError::bad_input(format!("Unknown transport kind: {other}."))
				.with_metadata("transport_kind", other)),
		}
	}
}

/// REST transport adapter backed by a shared [`reqwest::Client`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestTransportAdapter(reqwest::Client);
#[cfg(feature = "reqwest")]
impl ReqwestTransportAdapter {
	/// Wraps an existing reqwest client.
	pub fn with_client(client: reqwest::Client) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl Debug for ReqwestTransportAdapter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReqwestTransportAdapter").finish_non_exhaustive()
	}
}
#[cfg(feature = "reqwest")]
impl TransportAdapter for ReqwestTransportAdapter {
	fn kind(&self) -> &str {
		DEFAULT_TRANSPORT_KIND
	}

	fn execute(&self, request: TransportRequest) -> TransportFuture<'_, TransportResponse> {
		let client = self.0.clone();

		Box::pin(async move {
			let method =
				reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
					ServiceError::bad_input(format!("Invalid HTTP method: {}.", request.method))
				})?;
			let mut builder = client.request(method, request.url.as_str());

			for (name, value) in &request.headers {
				builder = builder.header(name, value);
			}
			if !request.body.is_empty() {
				builder = builder.body(request.body);
			}

			let response = builder.send().await.map_err(|err| {
				ServiceError::new(ErrorCategory::External, format!("Transport failure: {err}."))
					.with_location("transport")
			})?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.map(|(name, value)| {
					(name.as_str().to_owned(), value.to_str().unwrap_or_default().to_owned())
				})
				.collect();
			let body = response
				.bytes()
				.await
				.map_err(|err| {
					ServiceError::new(
						ErrorCategory::External,
						format!("Transport body read failed: {err}."),
					)
				})?
				.to_vec();

			Ok(TransportResponse { status, headers, body })
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn header_lookup_is_case_insensitive() {
		let mut request = TransportRequest::new(
			"post",
			Url::parse("https://api.example.com/v1/items").expect("URL fixture should parse."),
		);

		request.set_header("Idempotency-Key", "abc");

		assert_eq!(request.method, "POST");
		assert_eq!(request.header("idempotency-key"), Some("abc"));

		request.set_header("IDEMPOTENCY-KEY", "def");

		assert_eq!(request.headers.len(), 1);
		assert_eq!(request.header("Idempotency-Key"), Some("def"));
	}

	#[test]
	fn retry_after_parses_seconds_and_dates() {
		let now = macros::datetime!(2026-02-18 15:30:00 UTC);

		assert_eq!(parse_retry_after("120", now), Some(Duration::seconds(120)));
		assert_eq!(
			parse_retry_after("Wed, 18 Feb 2026 15:31:00 GMT", now),
			Some(Duration::minutes(1)),
		);
		// Past dates produce no hint.
		assert_eq!(parse_retry_after("Wed, 18 Feb 2026 15:29:00 GMT", now), None);
		assert_eq!(parse_retry_after("soon", now), None);
	}

	#[test]
	fn default_normalizer_extracts_retry_after() {
		let response = TransportResponse {
			status: 429,
			headers: BTreeMap::from_iter([("Retry-After".to_owned(), "7".to_owned())]),
			body: Vec::new(),
		};
		let meta = DefaultResponseNormalizer
			.normalize(&response, macros::datetime!(2026-01-01 00:00 UTC));

		assert_eq!(meta.status_code, 429);
		assert_eq!(meta.retry_after, Some(Duration::seconds(7)));
	}
}
