// self
use crate::_prelude::*;

/// Replacement value inserted for redacted entries.
pub const REDACTED: &str = "<redacted>";

const SENSITIVE_FRAGMENTS: &[&str] = &[
	"password",
	"secret",
	"token",
	"authorization",
	"api_key",
	"apikey",
	"access_key",
	"refresh",
	"credential",
	"signature",
];

const TRACEABILITY_KEYS: &[&str] = &[
	"trace_id",
	"request_id",
	"provider_id",
	"connection_id",
	"sync_binding_id",
	"external_id",
	"source_version",
	"idempotency_key",
];

/// Returns true if the key must keep its value for traceability.
///
/// `scope_*` keys (scope_type, scope_id, …) always bypass redaction.
pub fn is_traceability_key(key: &str) -> bool {
	let lowered = key.to_ascii_lowercase();

	lowered.starts_with("scope_") || TRACEABILITY_KEYS.contains(&lowered.as_str())
}

/// Returns true if the key names sensitive material.
pub fn is_sensitive_key(key: &str) -> bool {
	if is_traceability_key(key) {
		return false;
	}

	let lowered = key.to_ascii_lowercase();

	SENSITIVE_FRAGMENTS.iter().any(|fragment| lowered.contains(fragment))
}

/// Single chokepoint that redacts sensitive entries from a metadata map.
///
/// Nested objects are traversed recursively; arrays are traversed element by
/// element. Traceability keys keep their values so logs stay correlatable.
pub fn redact_sensitive_map(metadata: &BTreeMap<String, Json>) -> BTreeMap<String, Json> {
	metadata
		.iter()
		.map(|(key, value)| {
			if is_sensitive_key(key) {
				(key.clone(), Json::String(REDACTED.into()))
			} else {
				(key.clone(), redact_value(value))
			}
		})
		.collect()
}

fn redact_value(value: &Json) -> Json {
	match value {
		Json::Object(map) => Json::Object(
			map.iter()
				.map(|(key, nested)| {
					if is_sensitive_key(key) {
						(key.clone(), Json::String(REDACTED.into()))
					} else {
						(key.clone(), redact_value(nested))
					}
				})
				.collect(),
		),
		Json::Array(items) => Json::Array(items.iter().map(redact_value).collect()),
		other => other.clone(),
	}
}
