//! Request signer suite: one implementation per credential auth kind.
//!
//! Signers are synchronous: they mutate the cloned [`TransportRequest`] in
//! place and report what they did through signing metadata the runtime merges
//! into the response metadata. Selection order lives in the runtime: an
//! explicit signer override wins, then the credential's auth kind, then
//! [`BearerSigner`] as the fallback.

pub mod sigv4;

pub use sigv4::*;

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	domain::AuthKind,
	error::ErrorCategory,
	secret::ActiveCredential,
	transport::TransportRequest,
};

/// Metadata recorded by a signer for observability and skew detection.
pub type SigningMetadata = BTreeMap<String, Json>;

/// Contract implemented by request signers.
pub trait ProviderSigner
where
	Self: Send + Sync,
{
	/// Stable signer name used in telemetry.
	fn name(&self) -> &str;

	/// Signs the request in place and returns signing metadata.
	fn sign(
		&self,
		request: &mut TransportRequest,
		credential: &ActiveCredential,
		now: OffsetDateTime,
	) -> Result<SigningMetadata>;
}

/// Selects the built-in signer for a credential auth kind.
pub fn signer_for_auth_kind(kind: AuthKind) -> Arc<dyn ProviderSigner> {
	match kind {
		AuthKind::ApiKey => Arc::new(ApiKeySigner::default()),
		AuthKind::Pat => Arc::new(PatSigner),
		AuthKind::Hmac => Arc::new(HmacSigner::default()),
		AuthKind::Basic => Arc::new(BasicSigner),
		AuthKind::Mtls => Arc::new(MtlsSigner),
		AuthKind::AwsSigV4 => Arc::new(SigV4Signer::default()),
		AuthKind::Oauth2AuthCode => Arc::new(BearerSigner),
	}
}

pub(crate) fn missing_field(signer: &str, field: &str) -> ServiceError {
	ServiceError::new(
		ErrorCategory::Auth,
		format!("Credential is missing the {field} field required by the {signer} signer."),
	)
	.with_location("signer")
}

fn base_metadata(signer: &str, now: OffsetDateTime) -> SigningMetadata {
	let mut metadata = SigningMetadata::new();

	metadata.insert("signer".into(), Json::String(signer.into()));
	metadata.insert(
		"signed_at".into(),
		Json::String(now.format(&Rfc3339).unwrap_or_else(|_| now.to_string())),
	);

	metadata
}

/// Default signer: `Authorization: Bearer <token>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BearerSigner;
impl ProviderSigner for BearerSigner {
	fn name(&self) -> &str {
		"bearer"
	}

	fn sign(
		&self,
		request: &mut TransportRequest,
		credential: &ActiveCredential,
		now: OffsetDateTime,
	) -> Result<SigningMetadata> {
		let token =
			credential.payload.token.as_ref().ok_or_else(|| missing_field("bearer", "token"))?;

		request.set_header("Authorization", format!("Bearer {}", token.expose()));

		Ok(base_metadata(self.name(), now))
	}
}

/// API-key signer writing the key into a configurable header.
#[derive(Clone, Debug)]
pub struct ApiKeySigner {
	/// Header the key is written to.
	pub header_name: String,
}
impl Default for ApiKeySigner {
	fn default() -> Self {
		Self { header_name: "X-Api-Key".into() }
	}
}
impl ProviderSigner for ApiKeySigner {
	fn name(&self) -> &str {
		"api_key"
	}

	fn sign(
		&self,
		request: &mut TransportRequest,
		credential: &ActiveCredential,
		now: OffsetDateTime,
	) -> Result<SigningMetadata> {
		let key =
			credential.payload.token.as_ref().ok_or_else(|| missing_field("api_key", "token"))?;

		request.set_header(self.header_name.clone(), key.expose());

		let mut metadata = base_metadata(self.name(), now);

		metadata.insert("header".into(), Json::String(self.header_name.clone()));

		Ok(metadata)
	}
}

/// Personal-access-token signer: `Authorization: token <pat>`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PatSigner;
impl ProviderSigner for PatSigner {
	fn name(&self) -> &str {
		"pat"
	}

	fn sign(
		&self,
		request: &mut TransportRequest,
		credential: &ActiveCredential,
		now: OffsetDateTime,
	) -> Result<SigningMetadata> {
		let token =
			credential.payload.token.as_ref().ok_or_else(|| missing_field("pat", "token"))?;

		request.set_header("Authorization", format!("token {}", token.expose()));

		Ok(base_metadata(self.name(), now))
	}
}

/// Basic-auth signer: `Authorization: Basic base64(user:password)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicSigner;
impl ProviderSigner for BasicSigner {
	fn name(&self) -> &str {
		"basic"
	}

	fn sign(
		&self,
		request: &mut TransportRequest,
		credential: &ActiveCredential,
		now: OffsetDateTime,
	) -> Result<SigningMetadata> {
		let username =
			credential.payload.username.as_ref().ok_or_else(|| missing_field("basic", "username"))?;
		let password = credential
			.payload
			.password
			.as_ref()
			.ok_or_else(|| missing_field("basic", "password"))?;
		let encoded = STANDARD.encode(format!("{username}:{}", password.expose()));

		request.set_header("Authorization", format!("Basic {encoded}"));

		Ok(base_metadata(self.name(), now))
	}
}

/// Shared-secret HMAC signer.
///
/// Signs `method\npath?query\nsha256hex(body)\ntimestamp` with HMAC-SHA256 and
/// writes the hex signature plus the timestamp it covers.
#[derive(Clone, Debug)]
pub struct HmacSigner {
	/// Header carrying the hex signature.
	pub signature_header: String,
	/// Header carrying the signed timestamp.
	pub timestamp_header: String,
}
impl Default for HmacSigner {
	fn default() -> Self {
		Self {
			signature_header: "X-Signature".into(),
			timestamp_header: "X-Signature-Timestamp".into(),
		}
	}
}
impl ProviderSigner for HmacSigner {
	fn name(&self) -> &str {
		"hmac"
	}

	fn sign(
		&self,
		request: &mut TransportRequest,
		credential: &ActiveCredential,
		now: OffsetDateTime,
	) -> Result<SigningMetadata> {
		let secret = credential
			.payload
			.signing_secret
			.as_ref()
			.ok_or_else(|| missing_field("hmac", "signing_secret"))?;
		let timestamp = now.unix_timestamp().to_string();
		let body_digest = hex::encode(Sha256::digest(&request.body));
		let path_and_query = match request.url.query() {
			Some(query) => format!("{}?{query}", request.url.path()),
			None => request.url.path().to_owned(),
		};
		let canonical =
			format!("{}\n{path_and_query}\n{body_digest}\n{timestamp}", request.method);
		let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose().as_bytes())
			.map_err(|_| missing_field("hmac", "signing_secret"))?;

		mac.update(canonical.as_bytes());

		let signature = hex::encode(mac.finalize().into_bytes());

		request.set_header(self.signature_header.clone(), signature);
		request.set_header(self.timestamp_header.clone(), timestamp);

		let mut metadata = base_metadata(self.name(), now);

		metadata.insert("algorithm".into(), Json::String("hmac-sha256".into()));

		Ok(metadata)
	}
}

/// Mutual-TLS signer.
///
/// The TLS handshake itself happens in the transport; the signer verifies the
/// credential references a client certificate and records it so operators can
/// correlate which identity served the call.
#[derive(Clone, Copy, Debug, Default)]
pub struct MtlsSigner;
impl ProviderSigner for MtlsSigner {
	fn name(&self) -> &str {
		"mtls"
	}

	fn sign(
		&self,
		_request: &mut TransportRequest,
		credential: &ActiveCredential,
		now: OffsetDateTime,
	) -> Result<SigningMetadata> {
		let reference = credential
			.payload
			.client_certificate_ref
			.as_ref()
			.ok_or_else(|| missing_field("mtls", "client_certificate_ref"))?;
		let mut metadata = base_metadata(self.name(), now);

		metadata.insert("client_certificate_ref".into(), Json::String(reference.clone()));

		Ok(metadata)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::secret::{CredentialPayload, SecretMaterial};

	fn request() -> TransportRequest {
		TransportRequest::new(
			"POST",
			Url::parse("https://api.example.com/v1/items?page=2").expect("URL fixture should parse."),
		)
		.with_body(b"{\"a\":1}".to_vec())
	}

	fn now() -> OffsetDateTime {
		macros::datetime!(2026-02-18 15:30:00 UTC)
	}

	#[test]
	fn bearer_sets_authorization() {
		let credential =
			ActiveCredential::new(AuthKind::Oauth2AuthCode, CredentialPayload::bearer("tok"));
		let mut request = request();
		let metadata = BearerSigner
			.sign(&mut request, &credential, now())
			.expect("Bearer signing should succeed.");

		assert_eq!(request.header("authorization"), Some("Bearer tok"));
		assert_eq!(metadata["signer"], Json::String("bearer".into()));
		assert!(metadata.contains_key("signed_at"));
	}

	#[test]
	fn pat_uses_token_scheme() {
		let payload = CredentialPayload {
			token: Some(SecretMaterial::new("pat_1")),
			..CredentialPayload::default()
		};
		let credential = ActiveCredential::new(AuthKind::Pat, payload);
		let mut request = request();

		PatSigner.sign(&mut request, &credential, now()).expect("PAT signing should succeed.");

		assert_eq!(request.header("authorization"), Some("token pat_1"));
	}

	#[test]
	fn basic_encodes_credentials() {
		let payload = CredentialPayload {
			username: Some("user".into()),
			password: Some(SecretMaterial::new("pass")),
			..CredentialPayload::default()
		};
		let credential = ActiveCredential::new(AuthKind::Basic, payload);
		let mut request = request();

		BasicSigner.sign(&mut request, &credential, now()).expect("Basic signing should succeed.");

		assert_eq!(request.header("authorization"), Some("Basic dXNlcjpwYXNz"));
	}

	#[test]
	fn hmac_signature_is_deterministic() {
		let payload = CredentialPayload {
			signing_secret: Some(SecretMaterial::new("shared")),
			..CredentialPayload::default()
		};
		let credential = ActiveCredential::new(AuthKind::Hmac, payload);
		let signer = HmacSigner::default();
		let mut lhs = request();
		let mut rhs = request();

		signer.sign(&mut lhs, &credential, now()).expect("HMAC signing should succeed.");
		signer.sign(&mut rhs, &credential, now()).expect("HMAC signing should succeed.");

		assert_eq!(lhs.header("x-signature"), rhs.header("x-signature"));
		assert_eq!(lhs.header("x-signature-timestamp"), Some("1771428600"));
	}

	#[test]
	fn missing_material_maps_to_auth_error() {
		let credential =
			ActiveCredential::new(AuthKind::Basic, CredentialPayload::default());
		let mut request = request();
		let err = BasicSigner
			.sign(&mut request, &credential, now())
			.expect_err("Missing username must fail.");

		assert_eq!(err.category, ErrorCategory::Auth);
	}

	#[test]
	fn auth_kind_selection_covers_every_kind() {
		for kind in [
			AuthKind::Oauth2AuthCode,
			AuthKind::ApiKey,
			AuthKind::Pat,
			AuthKind::Hmac,
			AuthKind::Basic,
			AuthKind::Mtls,
			AuthKind::AwsSigV4,
		] {
			let signer = signer_for_auth_kind(kind);

			assert!(!signer.name().is_empty());
		}
	}
}
