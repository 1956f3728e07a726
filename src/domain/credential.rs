//! Credential entity, auth kinds, and the credential status machine.

// self
use crate::{
	_prelude::*,
	domain::{ConnectionId, CredentialId, GrantSet},
	error::ErrorCategory,
	secret::CredentialEnvelope,
};

/// Authentication protocol a credential was minted under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
	/// OAuth 2.0 authorization-code grant.
	Oauth2AuthCode,
	/// Static API key.
	ApiKey,
	/// Personal access token.
	Pat,
	/// Shared-secret HMAC signing.
	Hmac,
	/// HTTP Basic credentials.
	Basic,
	/// Mutual TLS client certificates.
	Mtls,
	/// AWS Signature Version 4.
	AwsSigV4,
}
impl AuthKind {
	/// Returns the normalized lowercase label for the kind.
	pub const fn as_str(self) -> &'static str {
		match self {
			AuthKind::Oauth2AuthCode => "oauth2_auth_code",
			AuthKind::ApiKey => "api_key",
			AuthKind::Pat => "pat",
			AuthKind::Hmac => "hmac",
			AuthKind::Basic => "basic",
			AuthKind::Mtls => "mtls",
			AuthKind::AwsSigV4 => "aws_sigv4",
		}
	}

	/// Parses a strategy type label; matching is case-insensitive and accepts
	/// the `oauth2` shorthand for the authorization-code grant.
	pub fn parse(label: &str) -> Option<Self> {
		match label.to_ascii_lowercase().as_str() {
			"oauth2" | "oauth2_auth_code" => Some(AuthKind::Oauth2AuthCode),
			"api_key" | "apikey" => Some(AuthKind::ApiKey),
			"pat" => Some(AuthKind::Pat),
			"hmac" => Some(AuthKind::Hmac),
			"basic" => Some(AuthKind::Basic),
			"mtls" => Some(AuthKind::Mtls),
			"aws_sigv4" | "sigv4" => Some(AuthKind::AwsSigV4),
			_ => None,
		}
	}

	/// Returns true when the flow requires an OAuth callback state round-trip.
	pub const fn requires_callback_state(self) -> bool {
		matches!(self, AuthKind::Oauth2AuthCode)
	}
}
impl Display for AuthKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Lifecycle status of a credential version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
	/// Usable for signing provider operations.
	Active,
	/// Permanently invalidated. Terminal.
	Revoked,
	/// Past its expiry; may become active again after refresh.
	Expired,
}
impl CredentialStatus {
	/// Returns the lowercase label for the status.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialStatus::Active => "active",
			CredentialStatus::Revoked => "revoked",
			CredentialStatus::Expired => "expired",
		}
	}

	/// Checks whether a transition from `self` to `next` is allowed.
	pub fn can_transition(self, next: CredentialStatus) -> bool {
		use CredentialStatus::*;

		match self {
			Active => matches!(next, Revoked | Expired),
			Expired => matches!(next, Active | Revoked),
			Revoked => false,
		}
	}
}
impl Display for CredentialStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Error raised on a disallowed credential status transition.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Invalid credential status transition: {from} -> {to}.")]
pub struct InvalidCredentialStatusTransition {
	/// Current status.
	pub from: CredentialStatus,
	/// Rejected target status.
	pub to: CredentialStatus,
}
impl From<InvalidCredentialStatusTransition> for ServiceError {
	fn from(value: InvalidCredentialStatusTransition) -> Self {
		ServiceError::new(ErrorCategory::Conflict, value.to_string())
	}
}

/// Encrypted token envelope owned by exactly one connection.
///
/// Multiple versions exist over time; at most one is active. The plaintext
/// token never leaves [`CredentialEnvelope`] decryption paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Credential identifier.
	pub id: CredentialId,
	/// Exclusive owner.
	pub connection_id: ConnectionId,
	/// Monotonic version, starting at 1.
	pub version: u32,
	/// Encrypted payload produced by the secret provider.
	pub envelope: CredentialEnvelope,
	/// Auth protocol the payload corresponds to.
	pub auth_kind: AuthKind,
	/// Provider token type hint (e.g. `bearer`).
	pub token_type: Option<String>,
	/// Grants the service asked for.
	pub requested_grants: GrantSet,
	/// Grants the provider issued.
	pub granted_grants: GrantSet,
	/// Expiry instant, when the provider communicated one.
	pub expires_at: Option<OffsetDateTime>,
	/// True when the payload carries a refresh secret.
	pub refreshable: bool,
	/// Scheduled rotation instant, when one is known.
	pub rotates_at: Option<OffsetDateTime>,
	/// Lifecycle status.
	pub status: CredentialStatus,
	/// Creation instant.
	pub created_at: OffsetDateTime,
}
impl Credential {
	/// Applies a status transition, enforcing the allowed-transition table.
	pub fn transition(
		&mut self,
		next: CredentialStatus,
	) -> Result<(), InvalidCredentialStatusTransition> {
		if self.status == next {
			return Ok(());
		}
		if !self.status.can_transition(next) {
			return Err(InvalidCredentialStatusTransition { from: self.status, to: next });
		}

		self.status = next;

		Ok(())
	}

	/// Returns true if the credential is expired relative to `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		self.expires_at.is_some_and(|expiry| now >= expiry)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn auth_kind_parsing_normalizes_labels() {
		assert_eq!(AuthKind::parse("OAuth2"), Some(AuthKind::Oauth2AuthCode));
		assert_eq!(AuthKind::parse("oauth2_auth_code"), Some(AuthKind::Oauth2AuthCode));
		assert_eq!(AuthKind::parse("APIKEY"), Some(AuthKind::ApiKey));
		assert_eq!(AuthKind::parse("aws_sigv4"), Some(AuthKind::AwsSigV4));
		assert_eq!(AuthKind::parse("kerberos"), None);
	}

	#[test]
	fn only_auth_code_requires_callback_state() {
		assert!(AuthKind::Oauth2AuthCode.requires_callback_state());
		assert!(!AuthKind::ApiKey.requires_callback_state());
		assert!(!AuthKind::Hmac.requires_callback_state());
		assert!(!AuthKind::AwsSigV4.requires_callback_state());
	}

	#[test]
	fn revoked_is_terminal() {
		use CredentialStatus::*;

		assert!(Active.can_transition(Revoked));
		assert!(Active.can_transition(Expired));
		assert!(Expired.can_transition(Active));
		assert!(Expired.can_transition(Revoked));
		assert!(!Revoked.can_transition(Active));
		assert!(!Revoked.can_transition(Expired));
	}
}
