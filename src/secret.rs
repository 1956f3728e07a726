//! Credential payload codec and the at-rest secret provider contract.
//!
//! Token material is serialized into a [`CredentialPayload`], encrypted by a
//! [`SecretProvider`], and persisted as a [`CredentialEnvelope`]. Plaintext
//! tokens never appear in the stored envelope; in-memory copies live inside
//! [`SecretMaterial`] so accidental `Debug`/`Display` formatting stays redacted.

// crates.io
use aes_gcm::{
	Aes256Gcm, Key, Nonce,
	aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{_prelude::*, domain::AuthKind, error::ErrorCategory};

/// Envelope format label for AES-256-GCM sealed payloads.
pub const ENVELOPE_FORMAT_AES256_GCM: &str = "aes256-gcm";
/// Current payload schema version.
pub const PAYLOAD_VERSION: u32 = 1;

/// Errors produced while sealing or opening credential envelopes.
#[derive(Debug, ThisError)]
pub enum SecretError {
	/// Master key material has the wrong length.
	#[error("Master key must be exactly 32 bytes.")]
	InvalidKeyLength,
	/// The cipher rejected the payload.
	#[error("Encryption failed.")]
	Encrypt,
	/// The ciphertext failed authentication or decryption.
	#[error("Decryption failed; the envelope is corrupt or sealed under another key.")]
	Decrypt,
	/// The envelope carries an unknown format label.
	#[error("Unsupported envelope format: {format}.")]
	UnsupportedFormat {
		/// Format label found in the envelope.
		format: String,
	},
	/// Base64 fields in the envelope could not be decoded.
	#[error("Envelope encoding is invalid.")]
	Encoding(#[from] base64::DecodeError),
	/// Payload (de)serialization failed.
	#[error("Payload serialization failed: {0}.")]
	Serialization(#[from] serde_json::Error),
}
impl From<SecretError> for ServiceError {
	fn from(value: SecretError) -> Self {
		ServiceError::new(ErrorCategory::Internal, value.to_string())
			.with_location("secret_provider")
	}
}

/// Redacted secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretMaterial(String);
impl SecretMaterial {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for SecretMaterial {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for SecretMaterial {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("SecretMaterial").field(&"<redacted>").finish()
	}
}
impl Display for SecretMaterial {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Decrypted credential fields grouped by the auth protocols that use them.
///
/// The payload is what gets sealed into the envelope; only the fields relevant
/// to the credential's [`AuthKind`] are populated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPayload {
	/// Primary token (bearer access token, PAT, or API key value).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<SecretMaterial>,
	/// Refresh secret, when the provider issued one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<SecretMaterial>,
	/// Username for Basic credentials.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	/// Password for Basic credentials.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password: Option<SecretMaterial>,
	/// Shared secret for HMAC signing.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub signing_secret: Option<SecretMaterial>,
	/// AWS access key identifier.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_key_id: Option<String>,
	/// AWS secret access key.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub secret_access_key: Option<SecretMaterial>,
	/// AWS session token for temporary credentials.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_token: Option<SecretMaterial>,
	/// Reference to the mTLS client certificate (never the key itself).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_certificate_ref: Option<String>,
	/// Provider token type hint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_type: Option<String>,
	/// Additional provider-specific fields.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub extra: BTreeMap<String, String>,
}
impl CredentialPayload {
	/// Creates a bearer-token payload.
	pub fn bearer(token: impl Into<String>) -> Self {
		Self {
			token: Some(SecretMaterial::new(token)),
			token_type: Some("bearer".into()),
			..Self::default()
		}
	}
}

/// Decrypted credential handed to signers and the operation runtime.
#[derive(Clone, Debug)]
pub struct ActiveCredential {
	/// Auth protocol the payload corresponds to.
	pub auth_kind: AuthKind,
	/// Decrypted fields.
	pub payload: CredentialPayload,
}
impl ActiveCredential {
	/// Creates an active credential view.
	pub fn new(auth_kind: AuthKind, payload: CredentialPayload) -> Self {
		Self { auth_kind, payload }
	}
}

/// Sealed, versioned representation of a credential payload at rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEnvelope {
	/// Cipher format label (currently always [`ENVELOPE_FORMAT_AES256_GCM`]).
	pub payload_format: String,
	/// Payload schema version.
	pub payload_version: u32,
	/// Base64 nonce used for this envelope.
	pub nonce: String,
	/// Base64 ciphertext.
	pub ciphertext: String,
}

/// At-rest encryption contract for credential payloads.
pub trait SecretProvider
where
	Self: Send + Sync,
{
	/// Seals plaintext bytes into an envelope.
	fn encrypt(&self, plaintext: &[u8]) -> Result<CredentialEnvelope, SecretError>;

	/// Opens an envelope back into plaintext bytes.
	fn decrypt(&self, envelope: &CredentialEnvelope) -> Result<Vec<u8>, SecretError>;
}

/// Serializes and seals a payload through the provided secret provider.
pub fn encode_credential_payload(
	provider: &dyn SecretProvider,
	payload: &CredentialPayload,
) -> Result<CredentialEnvelope, SecretError> {
	let plaintext = serde_json::to_vec(payload)?;

	provider.encrypt(&plaintext)
}

/// Opens and deserializes a payload from its envelope.
pub fn decode_credential_payload(
	provider: &dyn SecretProvider,
	envelope: &CredentialEnvelope,
) -> Result<CredentialPayload, SecretError> {
	let plaintext = provider.decrypt(envelope)?;

	Ok(serde_json::from_slice(&plaintext)?)
}

/// AES-256-GCM secret provider holding the master key in process memory.
pub struct AesGcmSecretProvider {
	cipher: Aes256Gcm,
}
impl AesGcmSecretProvider {
	/// Creates a provider from a 32-byte master key.
	pub fn new(key: &[u8]) -> Result<Self, SecretError> {
		if key.len() != 32 {
			return Err(SecretError::InvalidKeyLength);
		}

		Ok(Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)) })
	}

	/// Creates a provider from a base64 (standard alphabet) master key.
	pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
		let key = STANDARD.decode(encoded)?;

		Self::new(&key)
	}
}
impl Debug for AesGcmSecretProvider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AesGcmSecretProvider").finish_non_exhaustive()
	}
}
impl SecretProvider for AesGcmSecretProvider {
	fn encrypt(&self, plaintext: &[u8]) -> Result<CredentialEnvelope, SecretError> {
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let ciphertext = self.cipher.encrypt(&nonce, plaintext).map_err(|_| SecretError::Encrypt)?;

		Ok(CredentialEnvelope {
			payload_format: ENVELOPE_FORMAT_AES256_GCM.into(),
			payload_version: PAYLOAD_VERSION,
			nonce: STANDARD.encode(nonce),
			ciphertext: STANDARD.encode(ciphertext),
		})
	}

	fn decrypt(&self, envelope: &CredentialEnvelope) -> Result<Vec<u8>, SecretError> {
		if envelope.payload_format != ENVELOPE_FORMAT_AES256_GCM {
			return Err(SecretError::UnsupportedFormat {
				format: envelope.payload_format.clone(),
			});
		}

		let nonce = STANDARD.decode(&envelope.nonce)?;
		let ciphertext = STANDARD.decode(&envelope.ciphertext)?;

		self.cipher
			.decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
			.map_err(|_| SecretError::Decrypt)
	}
}
