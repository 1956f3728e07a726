//! Service-wide error taxonomy and the stable envelope surfaced to callers.
//!
//! Every public [`Service`](crate::flows::Service) method returns a
//! [`ServiceError`] so callers always receive a stable `text_code` +
//! `http_code` pair regardless of which subsystem failed. Nested component
//! errors convert through `From` implementations that preserve their
//! category; the message-heuristic classifier only runs when an opaque
//! error carries no structured envelope yet.

// self
use crate::_prelude::*;

/// Service-wide result type alias returning [`ServiceError`] by default.
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Transport-independent failure categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
	/// Caller supplied malformed or incomplete input.
	BadInput,
	/// The referenced entity does not exist.
	NotFound,
	/// Authentication failed or credentials are unusable.
	Auth,
	/// The caller is authenticated but not permitted.
	Authz,
	/// The operation conflicts with concurrent or persisted state.
	Conflict,
	/// An upstream or local rate limit rejected the call.
	RateLimit,
	/// The operation itself failed after passing validation.
	Operation,
	/// An external provider failed or misbehaved.
	External,
	/// Structured validation produced one or more issues.
	Validation,
	/// Unclassified internal failure.
	Internal,
}
impl ErrorCategory {
	/// Returns a stable label suitable for metadata and log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorCategory::BadInput => "bad_input",
			ErrorCategory::NotFound => "not_found",
			ErrorCategory::Auth => "auth",
			ErrorCategory::Authz => "authz",
			ErrorCategory::Conflict => "conflict",
			ErrorCategory::RateLimit => "rate_limit",
			ErrorCategory::Operation => "operation",
			ErrorCategory::External => "external",
			ErrorCategory::Validation => "validation",
			ErrorCategory::Internal => "internal",
		}
	}

	/// HTTP status code derived from the category.
	pub const fn http_code(self) -> u16 {
		match self {
			ErrorCategory::BadInput | ErrorCategory::Validation => 400,
			ErrorCategory::NotFound => 404,
			ErrorCategory::Auth => 401,
			ErrorCategory::Authz => 403,
			ErrorCategory::Conflict => 409,
			ErrorCategory::RateLimit => 429,
			ErrorCategory::External => 502,
			ErrorCategory::Operation | ErrorCategory::Internal => 500,
		}
	}

	/// Default text code assigned when a subsystem does not pick one itself.
	pub const fn default_text_code(self) -> TextCode {
		match self {
			ErrorCategory::BadInput | ErrorCategory::Validation => TextCode::BadInput,
			ErrorCategory::NotFound => TextCode::NotFound,
			ErrorCategory::Auth => TextCode::Unauthorized,
			ErrorCategory::Authz => TextCode::Forbidden,
			ErrorCategory::Conflict => TextCode::Conflict,
			ErrorCategory::RateLimit => TextCode::RateLimited,
			ErrorCategory::Operation => TextCode::OperationFailed,
			ErrorCategory::External => TextCode::ExternalFailure,
			ErrorCategory::Internal => TextCode::InternalError,
		}
	}
}
impl Display for ErrorCategory {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Stable machine-readable codes surfaced in the error envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextCode {
	/// `SERVICE_BAD_INPUT`.
	BadInput,
	/// `SERVICE_NOT_FOUND`.
	NotFound,
	/// `SERVICE_UNAUTHORIZED`.
	Unauthorized,
	/// `SERVICE_FORBIDDEN`.
	Forbidden,
	/// `SERVICE_CONFLICT`.
	Conflict,
	/// `SERVICE_OPERATION_FAILED`.
	OperationFailed,
	/// `SERVICE_EXTERNAL_FAILURE`.
	ExternalFailure,
	/// `SERVICE_PROVIDER_NOT_FOUND`.
	ProviderNotFound,
	/// `SERVICE_CAPABILITY_UNSUPPORTED`.
	CapabilityUnsupported,
	/// `SERVICE_OAUTH_STATE_INVALID`.
	OauthStateInvalid,
	/// `SERVICE_REPLAY_DETECTED`.
	ReplayDetected,
	/// `SERVICE_REFRESH_LOCKED`.
	RefreshLocked,
	/// `SERVICE_RATE_LIMITED`.
	RateLimited,
	/// `SERVICE_PROVIDER_OPERATION_FAILED`.
	ProviderOperationFailed,
	/// `SERVICE_SYNC_JOB_NOT_FOUND`.
	SyncJobNotFound,
	/// `SERVICE_SYNC_CURSOR_CONFLICT`.
	SyncCursorConflict,
	/// `SERVICE_EMBEDDED_AUTH_UNSUPPORTED`.
	EmbeddedAuthUnsupported,
	/// `SERVICE_INTERNAL_ERROR`.
	InternalError,
}
impl TextCode {
	/// Returns the wire representation of the code.
	pub const fn as_str(self) -> &'static str {
		match self {
			TextCode::BadInput => "SERVICE_BAD_INPUT",
			TextCode::NotFound => "SERVICE_NOT_FOUND",
			TextCode::Unauthorized => "SERVICE_UNAUTHORIZED",
			TextCode::Forbidden => "SERVICE_FORBIDDEN",
			TextCode::Conflict => "SERVICE_CONFLICT",
			TextCode::OperationFailed => "SERVICE_OPERATION_FAILED",
			TextCode::ExternalFailure => "SERVICE_EXTERNAL_FAILURE",
			TextCode::ProviderNotFound => "SERVICE_PROVIDER_NOT_FOUND",
			TextCode::CapabilityUnsupported => "SERVICE_CAPABILITY_UNSUPPORTED",
			TextCode::OauthStateInvalid => "SERVICE_OAUTH_STATE_INVALID",
			TextCode::ReplayDetected => "SERVICE_REPLAY_DETECTED",
			TextCode::RefreshLocked => "SERVICE_REFRESH_LOCKED",
			TextCode::RateLimited => "SERVICE_RATE_LIMITED",
			TextCode::ProviderOperationFailed => "SERVICE_PROVIDER_OPERATION_FAILED",
			TextCode::SyncJobNotFound => "SERVICE_SYNC_JOB_NOT_FOUND",
			TextCode::SyncCursorConflict => "SERVICE_SYNC_CURSOR_CONFLICT",
			TextCode::EmbeddedAuthUnsupported => "SERVICE_EMBEDDED_AUTH_UNSUPPORTED",
			TextCode::InternalError => "SERVICE_INTERNAL_ERROR",
		}
	}
}
impl Display for TextCode {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Severity attached to an error envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	/// Expected operational failure (bad input, not found).
	Warning,
	#[default]
	/// Failure the operator should look at.
	Error,
	/// Failure that indicates data loss or corruption risk.
	Critical,
}
impl Severity {
	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Severity::Warning => "warning",
			Severity::Error => "error",
			Severity::Critical => "critical",
		}
	}
}

/// Single structured validation issue inside an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
	/// Dotted path of the offending field.
	pub field: String,
	/// Human-readable description of the problem.
	pub message: String,
}
impl ValidationIssue {
	/// Creates a new issue for the provided field.
	pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self { field: field.into(), message: message.into() }
	}
}

/// Stable error envelope surfaced by every public service method.
#[derive(Clone, Debug, Serialize, Deserialize, ThisError)]
#[error("{}: {message}", text_code.as_str())]
pub struct ServiceError {
	/// Transport-independent failure category.
	pub category: ErrorCategory,
	/// Machine-readable code derived from the category unless overridden.
	pub text_code: TextCode,
	/// HTTP status derived from the category.
	pub http_code: u16,
	/// Human-readable message. Never contains secret material.
	pub message: String,
	/// Structured metadata; redacted before logging.
	pub metadata: BTreeMap<String, Json>,
	/// Request identifier propagated from the caller, when known.
	pub request_id: Option<String>,
	/// Operator-facing severity.
	pub severity: Severity,
	/// Logical location (module/operation) the failure originated in.
	pub location: Option<String>,
	/// Structured validation issues, when the category is `validation`.
	pub validation_errors: Vec<ValidationIssue>,
}
impl ServiceError {
	/// Creates an envelope for the provided category with its default text code.
	pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
		Self {
			category,
			text_code: category.default_text_code(),
			http_code: category.http_code(),
			message: message.into(),
			metadata: BTreeMap::new(),
			request_id: None,
			severity: default_severity(category),
			location: None,
			validation_errors: Vec::new(),
		}
	}

	/// Shorthand for a `bad_input` envelope.
	pub fn bad_input(message: impl Into<String>) -> Self {
		Self::new(ErrorCategory::BadInput, message)
	}

	/// Shorthand for a `not_found` envelope.
	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorCategory::NotFound, message)
	}

	/// Shorthand for a `conflict` envelope.
	pub fn conflict(message: impl Into<String>) -> Self {
		Self::new(ErrorCategory::Conflict, message)
	}

	/// Shorthand for an `internal` envelope.
	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorCategory::Internal, message)
	}

	/// Overrides the text code while keeping the category-derived HTTP status.
	pub fn with_text_code(mut self, code: TextCode) -> Self {
		self.text_code = code;

		self
	}

	/// Overrides the severity.
	pub fn with_severity(mut self, severity: Severity) -> Self {
		self.severity = severity;

		self
	}

	/// Records the logical location the failure originated in.
	pub fn with_location(mut self, location: impl Into<String>) -> Self {
		self.location = Some(location.into());

		self
	}

	/// Attaches the request identifier for traceability.
	pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
		self.request_id = Some(request_id.into());

		self
	}

	/// Adds a metadata entry. Values flow through redaction before logging.
	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Json>) -> Self {
		self.metadata.insert(key.into(), value.into());

		self
	}

	/// Appends a structured validation issue.
	pub fn with_validation_issue(mut self, issue: ValidationIssue) -> Self {
		self.validation_errors.push(issue);

		self
	}

	/// Returns true if the failure is worth retrying by policy defaults.
	pub fn is_retryable(&self) -> bool {
		matches!(self.category, ErrorCategory::RateLimit | ErrorCategory::External)
	}
}

/// Classifies an opaque error message into a category.
///
/// Only used when no structured envelope exists yet; a message containing a
/// throttling hint maps to `rate_limit`, everything else to `external`.
pub fn classify_message(message: &str) -> ErrorCategory {
	let lowered = message.to_ascii_lowercase();

	if lowered.contains("throttl") || lowered.contains("rate limit") {
		ErrorCategory::RateLimit
	} else if lowered.contains("not found") {
		ErrorCategory::NotFound
	} else if lowered.contains("timeout") || lowered.contains("unavailable") {
		ErrorCategory::External
	} else {
		ErrorCategory::External
	}
}

/// Wraps an opaque error into an envelope exactly once.
///
/// [`ServiceError`] values pass through untouched so category, text code, and
/// metadata assigned closer to the failure are preserved.
pub fn ensure_envelope(err: impl Into<EnvelopeSource>) -> ServiceError {
	match err.into() {
		EnvelopeSource::Enveloped(inner) => inner,
		EnvelopeSource::Opaque(message) => {
			let category = classify_message(&message);

			ServiceError::new(category, message)
		},
	}
}

/// Input accepted by [`ensure_envelope`].
#[derive(Debug)]
pub enum EnvelopeSource {
	/// Already carries the stable envelope.
	Enveloped(ServiceError),
	/// Free-form message from a component without structured mapping.
	Opaque(String),
}
impl From<ServiceError> for EnvelopeSource {
	fn from(value: ServiceError) -> Self {
		Self::Enveloped(value)
	}
}
impl From<String> for EnvelopeSource {
	fn from(value: String) -> Self {
		Self::Opaque(value)
	}
}
impl From<&str> for EnvelopeSource {
	fn from(value: &str) -> Self {
		Self::Opaque(value.to_owned())
	}
}

const fn default_severity(category: ErrorCategory) -> Severity {
	match category {
		ErrorCategory::BadInput
		| ErrorCategory::NotFound
		| ErrorCategory::Validation
		| ErrorCategory::Conflict
		| ErrorCategory::RateLimit => Severity::Warning,
		ErrorCategory::Internal => Severity::Critical,
		_ => Severity::Error,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn categories_map_to_stable_http_codes() {
		assert_eq!(ErrorCategory::BadInput.http_code(), 400);
		assert_eq!(ErrorCategory::NotFound.http_code(), 404);
		assert_eq!(ErrorCategory::Auth.http_code(), 401);
		assert_eq!(ErrorCategory::Authz.http_code(), 403);
		assert_eq!(ErrorCategory::Conflict.http_code(), 409);
		assert_eq!(ErrorCategory::RateLimit.http_code(), 429);
		assert_eq!(ErrorCategory::External.http_code(), 502);
		assert_eq!(ErrorCategory::Internal.http_code(), 500);
	}

	#[test]
	fn envelope_passes_through_unchanged() {
		let original = ServiceError::bad_input("missing scope")
			.with_text_code(TextCode::OauthStateInvalid)
			.with_metadata("provider_id", "github");
		let wrapped = ensure_envelope(original.clone());

		assert_eq!(wrapped.text_code, TextCode::OauthStateInvalid);
		assert_eq!(wrapped.metadata, original.metadata);
	}

	#[test]
	fn heuristic_classifier_detects_throttling() {
		let wrapped = ensure_envelope("upstream throttled the request");

		assert_eq!(wrapped.category, ErrorCategory::RateLimit);
		assert_eq!(wrapped.text_code, TextCode::RateLimited);
		assert_eq!(wrapped.http_code, 429);
	}

	#[test]
	fn default_text_codes_follow_categories() {
		assert_eq!(ErrorCategory::RateLimit.default_text_code().as_str(), "SERVICE_RATE_LIMITED");
		assert_eq!(ErrorCategory::Internal.default_text_code().as_str(), "SERVICE_INTERNAL_ERROR");
		assert_eq!(ErrorCategory::NotFound.default_text_code().as_str(), "SERVICE_NOT_FOUND");
	}
}
