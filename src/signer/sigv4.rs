//! AWS Signature Version 4 signer with header and presigned-query modes.

// crates.io
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc3339, macros::format_description};
// self
use crate::{
	_prelude::*,
	secret::ActiveCredential,
	signer::{ProviderSigner, SigningMetadata, missing_field},
	transport::TransportRequest,
};

/// Maximum presigned-URL lifetime accepted by AWS.
pub const SIGV4_MAX_EXPIRES: Duration = Duration::seconds(604_800);
/// Default presigned-URL lifetime.
pub const SIGV4_DEFAULT_EXPIRES: Duration = Duration::seconds(300);
/// Default header carrying the delegated access token alongside the signature.
pub const DEFAULT_ACCESS_TOKEN_HEADER: &str = "x-amz-access-token";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Where the signature material is placed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SigV4Mode {
	#[default]
	/// `Authorization` header plus `X-Amz-*` headers.
	Header,
	/// Presigned query string (`X-Amz-Signature` et al.).
	Query,
}
impl SigV4Mode {
	/// Returns the lowercase label for the mode.
	pub const fn as_str(self) -> &'static str {
		match self {
			SigV4Mode::Header => "header",
			SigV4Mode::Query => "query",
		}
	}
}

/// AWS SigV4 request signer.
///
/// Region and service default to the credential's `extra` fields
/// (`region`/`service`) so one signer instance can serve multiple providers.
#[derive(Clone, Debug)]
pub struct SigV4Signer {
	/// Signature placement mode.
	pub mode: SigV4Mode,
	/// Region override; falls back to the credential's `extra.region`.
	pub region: Option<String>,
	/// Service override; falls back to the credential's `extra.service`.
	pub service: Option<String>,
	/// Header carrying the delegated access token, when the payload has one.
	pub access_token_header: String,
	/// Presigned-URL lifetime for query mode; clamped to the AWS maximum.
	pub expires: Duration,
}
impl Default for SigV4Signer {
	fn default() -> Self {
		Self {
			mode: SigV4Mode::Header,
			region: None,
			service: None,
			access_token_header: DEFAULT_ACCESS_TOKEN_HEADER.into(),
			expires: SIGV4_DEFAULT_EXPIRES,
		}
	}
}
impl SigV4Signer {
	/// Creates a presigned-query signer.
	pub fn query() -> Self {
		Self { mode: SigV4Mode::Query, ..Self::default() }
	}

	/// Overrides the region.
	pub fn with_region(mut self, region: impl Into<String>) -> Self {
		self.region = Some(region.into());

		self
	}

	/// Overrides the service.
	pub fn with_service(mut self, service: impl Into<String>) -> Self {
		self.service = Some(service.into());

		self
	}

	/// Overrides the presigned-URL lifetime.
	pub fn with_expires(mut self, expires: Duration) -> Self {
		self.expires = expires;

		self
	}

	fn resolve_scope_parts(&self, credential: &ActiveCredential) -> Result<(String, String)> {
		let region = self
			.region
			.clone()
			.or_else(|| credential.payload.extra.get("region").cloned())
			.ok_or_else(|| missing_field("aws_sigv4", "region"))?;
		let service = self
			.service
			.clone()
			.or_else(|| credential.payload.extra.get("service").cloned())
			.ok_or_else(|| missing_field("aws_sigv4", "service"))?;

		Ok((region, service))
	}
}
impl ProviderSigner for SigV4Signer {
	fn name(&self) -> &str {
		"aws_sigv4"
	}

	fn sign(
		&self,
		request: &mut TransportRequest,
		credential: &ActiveCredential,
		now: OffsetDateTime,
	) -> Result<SigningMetadata> {
		let (region, service) = self.resolve_scope_parts(credential)?;
		let access_key_id = credential
			.payload
			.access_key_id
			.as_ref()
			.ok_or_else(|| missing_field("aws_sigv4", "access_key_id"))?;
		let secret_access_key = credential
			.payload
			.secret_access_key
			.as_ref()
			.ok_or_else(|| missing_field("aws_sigv4", "secret_access_key"))?;
		let session_token = credential.payload.session_token.as_ref();
		let amz_date = now
			.format(format_description!("[year][month][day]T[hour][minute][second]Z"))
			.map_err(|_| ServiceError::internal("Failed to format the signing timestamp."))?;
		let date_stamp = amz_date[..8].to_owned();
		let scope = format!("{date_stamp}/{region}/{service}/aws4_request");
		let host = host_header(&request.url);
		let payload_hash = hex::encode(Sha256::digest(&request.body));
		let canonical_uri = canonical_uri(&request.url);
		let signed_headers;
		let signature;

		match self.mode {
			SigV4Mode::Header => {
				request.set_header("X-Amz-Date", amz_date.clone());
				request.set_header("X-Amz-Content-Sha256", payload_hash.clone());

				if let Some(token) = session_token {
					request.set_header("X-Amz-Security-Token", token.expose());
				}
				if let Some(access_token) = credential.payload.token.as_ref() {
					request.set_header(self.access_token_header.clone(), access_token.expose());
				}

				let mut header_pairs = vec![
					("host".to_owned(), host.clone()),
					("x-amz-content-sha256".to_owned(), payload_hash.clone()),
					("x-amz-date".to_owned(), amz_date.clone()),
				];

				if let Some(token) = session_token {
					header_pairs
						.push(("x-amz-security-token".to_owned(), token.expose().to_owned()));
				}

				header_pairs.sort();

				signed_headers =
					header_pairs.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(";");

				let canonical_headers = header_pairs
					.iter()
					.map(|(name, value)| format!("{name}:{}\n", value.trim()))
					.collect::<String>();
				let canonical_query = canonical_query_string(&request.url, &[]);
				let canonical_request = format!(
					"{}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
					request.method,
				);

				signature = compute_signature(
					secret_access_key.expose(),
					&date_stamp,
					&region,
					&service,
					&amz_date,
					&scope,
					&canonical_request,
				);

				request.set_header(
					"Authorization",
					format!(
						"{ALGORITHM} Credential={access_key_id}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
					),
				);
			},
			SigV4Mode::Query => {
				let expires = self.expires.clamp(Duration::seconds(1), SIGV4_MAX_EXPIRES);

				signed_headers = "host".to_owned();

				let mut extra_pairs = vec![
					("X-Amz-Algorithm".to_owned(), ALGORITHM.to_owned()),
					("X-Amz-Credential".to_owned(), format!("{access_key_id}/{scope}")),
					("X-Amz-Date".to_owned(), amz_date.clone()),
					("X-Amz-Expires".to_owned(), expires.whole_seconds().to_string()),
					("X-Amz-SignedHeaders".to_owned(), signed_headers.clone()),
				];

				if let Some(token) = session_token {
					extra_pairs
						.push(("X-Amz-Security-Token".to_owned(), token.expose().to_owned()));
				}

				let canonical_query = canonical_query_string(&request.url, &extra_pairs);
				let canonical_headers = format!("host:{host}\n");
				let canonical_request = format!(
					"{}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
					request.method,
				);

				signature = compute_signature(
					secret_access_key.expose(),
					&date_stamp,
					&region,
					&service,
					&amz_date,
					&scope,
					&canonical_request,
				);

				let final_query = format!("{canonical_query}&X-Amz-Signature={signature}");

				request.url.set_query(Some(&final_query));
			},
		}

		let mut metadata = SigningMetadata::new();

		metadata.insert("signer".into(), Json::String(self.name().into()));
		metadata.insert("signing_mode".into(), Json::String(self.mode.as_str().into()));
		metadata.insert("signed_host".into(), Json::String(host));
		metadata.insert("region".into(), Json::String(region));
		metadata.insert("service".into(), Json::String(service));
		metadata.insert("signed_headers".into(), Json::String(signed_headers));
		metadata.insert(
			"signed_at".into(),
			Json::String(now.format(&Rfc3339).unwrap_or_else(|_| now.to_string())),
		);

		Ok(metadata)
	}
}

fn host_header(url: &Url) -> String {
	let host = url.host_str().unwrap_or_default();

	match url.port() {
		Some(port) => format!("{host}:{port}"),
		None => host.to_owned(),
	}
}

fn canonical_uri(url: &Url) -> String {
	let path = url.path();

	if path.is_empty() { "/".to_owned() } else { path.to_owned() }
}

/// Builds the canonical query string: existing pairs plus `extra`, sorted by
/// encoded key then encoded value, RFC 3986-escaped with `+`→`%20`, `*`→`%2A`,
/// and `~` left unescaped.
fn canonical_query_string(url: &Url, extra: &[(String, String)]) -> String {
	let mut pairs: Vec<(String, String)> = url
		.query_pairs()
		.map(|(key, value)| (uri_encode(&key), uri_encode(&value)))
		.chain(extra.iter().map(|(key, value)| (uri_encode(key), uri_encode(value))))
		.collect();

	pairs.sort();

	pairs.into_iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>().join("&")
}

fn uri_encode(input: &str) -> String {
	let mut encoded = String::with_capacity(input.len());

	for byte in input.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' =>
				encoded.push(byte as char),
			other => {
				encoded.push('%');
				encoded.push_str(&format!("{other:02X}"));
			},
		}
	}

	encoded
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
	let mut mac =
		Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length.");

	mac.update(data);
	mac.finalize().into_bytes().into()
}

#[allow(clippy::too_many_arguments)]
fn compute_signature(
	secret: &str,
	date_stamp: &str,
	region: &str,
	service: &str,
	amz_date: &str,
	scope: &str,
	canonical_request: &str,
) -> String {
	let string_to_sign = format!(
		"{ALGORITHM}\n{amz_date}\n{scope}\n{}",
		hex::encode(Sha256::digest(canonical_request.as_bytes())),
	);
	let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
	let k_region = hmac_sha256(&k_date, region.as_bytes());
	let k_service = hmac_sha256(&k_region, service.as_bytes());
	let k_signing = hmac_sha256(&k_service, b"aws4_request");

	hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
}
