//! Pure mapping compiler: schema/rule validation and the deterministic compile.
//!
//! The compiler never touches a clock, a store, or randomness; equal inputs
//! produce byte-equal compiled specs, hashes, and issue lists.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	mapping::{FieldType, MappingSpec, SchemaDef},
};

/// Issue codes emitted by the compiler.
pub mod codes {
	/// Declared schema reference differs from the derived one.
	pub const SCHEMA_DRIFT_DETECTED: &str = "schema_drift_detected";
	/// Source object does not exist in the schema.
	pub const SOURCE_OBJECT_NOT_FOUND: &str = "source_object_not_found";
	/// Source path does not exist on the source object.
	pub const SOURCE_PATH_UNKNOWN: &str = "source_path_unknown";
	/// Transform label is not supported.
	pub const TRANSFORM_UNKNOWN: &str = "transform_unknown";
	/// Source/target types are incompatible with the transform.
	pub const TYPE_INCOMPATIBLE: &str = "type_incompatible";
	/// Two rules write the same target path.
	pub const DUPLICATE_TARGET_PATH: &str = "duplicate_target_path";
	/// A required source field is not mapped by any rule.
	pub const REQUIRED_FIELD_UNMAPPED: &str = "required_field_unmapped";
	/// A sample record is missing a mapped source path (previewer).
	pub const PREVIEW_SOURCE_MISSING: &str = "preview_source_missing";
}

/// Transforms supported by the compiler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
	/// Pass the value through unchanged.
	Identity,
	/// Render the value as a string.
	ToString,
	/// Convert to a whole number.
	ToInt,
	/// Convert to a floating point number.
	ToFloat,
	/// Convert to a boolean.
	ToBool,
	/// Trim surrounding whitespace.
	Trim,
	/// Lowercase the string.
	Lowercase,
	/// Uppercase the string.
	Uppercase,
	/// Convert unix seconds to an RFC 3339 timestamp string.
	UnixTimeToRfc3339,
}
impl Transform {
	/// Parses a normalized (lowercase) transform label.
	pub fn parse(label: &str) -> Option<Self> {
		match label {
			"identity" => Some(Transform::Identity),
			"to_string" => Some(Transform::ToString),
			"to_int" => Some(Transform::ToInt),
			"to_float" => Some(Transform::ToFloat),
			"to_bool" => Some(Transform::ToBool),
			"trim" => Some(Transform::Trim),
			"lowercase" => Some(Transform::Lowercase),
			"uppercase" => Some(Transform::Uppercase),
			"unix_time_to_rfc3339" => Some(Transform::UnixTimeToRfc3339),
			_ => None,
		}
	}

	/// Returns the lowercase label for the transform.
	pub const fn as_str(self) -> &'static str {
		match self {
			Transform::Identity => "identity",
			Transform::ToString => "to_string",
			Transform::ToInt => "to_int",
			Transform::ToFloat => "to_float",
			Transform::ToBool => "to_bool",
			Transform::Trim => "trim",
			Transform::Lowercase => "lowercase",
			Transform::Uppercase => "uppercase",
			Transform::UnixTimeToRfc3339 => "unix_time_to_rfc3339",
		}
	}

	/// Returns true when the transform accepts the source type.
	pub fn accepts(self, source: FieldType) -> bool {
		use FieldType::*;

		match self {
			Transform::Identity => true,
			Transform::ToString => matches!(source, String | Integer | Number | Boolean | Timestamp),
			Transform::ToInt => matches!(source, String | Integer | Number | Boolean),
			Transform::ToFloat => matches!(source, String | Integer | Number),
			Transform::ToBool => matches!(source, String | Boolean | Integer),
			Transform::Trim | Transform::Lowercase | Transform::Uppercase =>
				matches!(source, String),
			Transform::UnixTimeToRfc3339 => matches!(source, Integer | Number | String),
		}
	}

	/// Type the transform produces for the given source type.
	pub fn output_type(self, source: FieldType) -> FieldType {
		match self {
			Transform::Identity => source,
			Transform::ToString => FieldType::String,
			Transform::ToInt => FieldType::Integer,
			Transform::ToFloat => FieldType::Number,
			Transform::ToBool => FieldType::Boolean,
			Transform::Trim | Transform::Lowercase | Transform::Uppercase => FieldType::String,
			Transform::UnixTimeToRfc3339 => FieldType::Timestamp,
		}
	}

	/// Returns true when the declared target type is acceptable.
	pub fn target_compatible(self, source: FieldType, declared: FieldType) -> bool {
		match self {
			// RFC 3339 output is commonly stored as either a timestamp or a string.
			Transform::UnixTimeToRfc3339 =>
				matches!(declared, FieldType::Timestamp | FieldType::String),
			_ => declared == self.output_type(source),
		}
	}
}
impl Display for Transform {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Severity of a compile issue. Errors block compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
	/// Blocks compilation.
	Error,
	/// Surfaced but non-blocking.
	Warning,
}
impl IssueSeverity {
	/// Returns the lowercase label for the severity.
	pub const fn as_str(self) -> &'static str {
		match self {
			IssueSeverity::Error => "error",
			IssueSeverity::Warning => "warning",
		}
	}
}

/// One validation finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingIssue {
	/// Severity.
	pub severity: IssueSeverity,
	/// Stable machine-readable code (see [`codes`]).
	pub code: String,
	/// Rule the issue belongs to, when rule-scoped.
	pub rule_id: Option<String>,
	/// Source path involved.
	pub source_path: Option<String>,
	/// Target path involved.
	pub target_path: Option<String>,
	/// Human-readable description.
	pub message: String,
}
impl MappingIssue {
	fn sort_key(&self) -> (IssueSeverity, &str, &str, &str, &str, &str) {
		(
			self.severity,
			&self.code,
			self.rule_id.as_deref().unwrap_or(""),
			self.source_path.as_deref().unwrap_or(""),
			self.target_path.as_deref().unwrap_or(""),
			&self.message,
		)
	}
}

/// One compiled rule, type-annotated and sorted deterministically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledRule {
	/// Rule identifier.
	pub rule_id: String,
	/// Source path.
	pub source_path: String,
	/// Target path.
	pub target_path: String,
	/// Source field type.
	pub source_type: FieldType,
	/// Target field type.
	pub target_type: FieldType,
	/// Transform applied.
	pub transform: Transform,
}

/// Deterministic compilation output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledMappingSpec {
	/// Spec identifier.
	pub spec_id: String,
	/// Spec version.
	pub version: u32,
	/// Source object.
	pub source_object: String,
	/// Target model.
	pub target_model: String,
	/// Compiled rules sorted by (target path, source path, rule id).
	pub rules: Vec<CompiledRule>,
	/// SHA-256 over the canonical JSON of the fields above, hex-encoded.
	pub deterministic_hash: String,
}

/// Result of a compile pass: sorted issues plus the compile output when no
/// error-severity issue was found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingCompileReport {
	/// Issues sorted by (severity, code, rule, source path, target path, message).
	pub issues: Vec<MappingIssue>,
	/// Compiled spec, absent when errors were found.
	pub compiled: Option<CompiledMappingSpec>,
}
impl MappingCompileReport {
	/// Returns true when any issue blocks compilation.
	pub fn has_errors(&self) -> bool {
		self.issues.iter().any(|issue| issue.severity == IssueSeverity::Error)
	}
}

#[derive(Serialize)]
struct HashInput<'a> {
	spec_id: &'a str,
	version: u32,
	source_object: &'a str,
	target_model: &'a str,
	rules: &'a [CompiledRule],
}

/// Validates and compiles a mapping spec against a schema.
///
/// The input spec is normalized on a copy; the function is pure and
/// deterministic across invocations.
pub fn compile_mapping_spec(spec: &MappingSpec, schema: &SchemaDef) -> MappingCompileReport {
	let mut spec = spec.clone();

	spec.normalize();

	let mut issues = Vec::new();

	if let Some(declared) = spec.schema_ref.as_deref() {
		let derived = schema.schema_ref();

		if declared != derived {
			issues.push(MappingIssue {
				severity: IssueSeverity::Warning,
				code: codes::SCHEMA_DRIFT_DETECTED.into(),
				rule_id: None,
				source_path: None,
				target_path: None,
				message: format!(
					"Spec pins schema {declared} but the schema resolves to {derived}.",
				),
			});
		}
	}

	let Some(object) = schema.object(&spec.source_object) else {
		issues.push(MappingIssue {
			severity: IssueSeverity::Error,
			code: codes::SOURCE_OBJECT_NOT_FOUND.into(),
			rule_id: None,
			source_path: None,
			target_path: None,
			message: format!(
				"Source object {} does not exist in schema {}.",
				spec.source_object,
				schema.schema_ref(),
			),
		});
		issues.sort_by(|lhs, rhs| lhs.sort_key().cmp(&rhs.sort_key()));

		return MappingCompileReport { issues, compiled: None };
	};
	let mut compiled_rules = Vec::new();
	let mut seen_targets: BTreeMap<String, String> = BTreeMap::new();

	for rule in &spec.rules {
		let Some(transform) = Transform::parse(&rule.transform) else {
			issues.push(MappingIssue {
				severity: IssueSeverity::Error,
				code: codes::TRANSFORM_UNKNOWN.into(),
				rule_id: Some(rule.id.clone()),
				source_path: Some(rule.source_path.clone()),
				target_path: Some(rule.target_path.clone()),
				message: format!("Transform {} is not supported.", rule.transform),
			});

			continue;
		};
		let Some(field) = object.field(&rule.source_path) else {
			issues.push(MappingIssue {
				severity: IssueSeverity::Error,
				code: codes::SOURCE_PATH_UNKNOWN.into(),
				rule_id: Some(rule.id.clone()),
				source_path: Some(rule.source_path.clone()),
				target_path: Some(rule.target_path.clone()),
				message: format!(
					"Source path {} does not exist on object {}.",
					rule.source_path, object.name,
				),
			});

			continue;
		};

		if !transform.accepts(field.field_type) {
			issues.push(MappingIssue {
				severity: IssueSeverity::Error,
				code: codes::TYPE_INCOMPATIBLE.into(),
				rule_id: Some(rule.id.clone()),
				source_path: Some(rule.source_path.clone()),
				target_path: Some(rule.target_path.clone()),
				message: format!(
					"Transform {transform} cannot read a {} source.",
					field.field_type,
				),
			});

			continue;
		}

		let target_type = match rule.target_type {
			Some(declared) => {
				if !transform.target_compatible(field.field_type, declared) {
					issues.push(MappingIssue {
						severity: IssueSeverity::Error,
						code: codes::TYPE_INCOMPATIBLE.into(),
						rule_id: Some(rule.id.clone()),
						source_path: Some(rule.source_path.clone()),
						target_path: Some(rule.target_path.clone()),
						message: format!(
							"Transform {transform} produces {} but the rule declares {declared}.",
							transform.output_type(field.field_type),
						),
					});

					continue;
				}

				declared
			},
			None => transform.output_type(field.field_type),
		};

		if let Some(previous) = seen_targets.insert(rule.target_path.clone(), rule.id.clone()) {
			issues.push(MappingIssue {
				severity: IssueSeverity::Error,
				code: codes::DUPLICATE_TARGET_PATH.into(),
				rule_id: Some(rule.id.clone()),
				source_path: Some(rule.source_path.clone()),
				target_path: Some(rule.target_path.clone()),
				message: format!(
					"Target path {} is already written by rule {previous}.",
					rule.target_path,
				),
			});

			continue;
		}

		compiled_rules.push(CompiledRule {
			rule_id: rule.id.clone(),
			source_path: rule.source_path.clone(),
			target_path: rule.target_path.clone(),
			source_type: field.field_type,
			target_type,
			transform,
		});
	}

	for field in object.required_fields() {
		if !spec.rules.iter().any(|rule| rule.source_path == field.path) {
			issues.push(MappingIssue {
				severity: IssueSeverity::Error,
				code: codes::REQUIRED_FIELD_UNMAPPED.into(),
				rule_id: None,
				source_path: Some(field.path.clone()),
				target_path: None,
				message: format!("Required source field {} is not mapped.", field.path),
			});
		}
	}

	issues.sort_by(|lhs, rhs| lhs.sort_key().cmp(&rhs.sort_key()));

	if issues.iter().any(|issue| issue.severity == IssueSeverity::Error) {
		return MappingCompileReport { issues, compiled: None };
	}

	compiled_rules.sort_by(|lhs, rhs| {
		(&lhs.target_path, &lhs.source_path, &lhs.rule_id)
			.cmp(&(&rhs.target_path, &rhs.source_path, &rhs.rule_id))
	});

	let hash_input = HashInput {
		spec_id: spec.spec_id.as_ref(),
		version: spec.version,
		source_object: &spec.source_object,
		target_model: &spec.target_model,
		rules: &compiled_rules,
	};
	let canonical = serde_json::to_vec(&hash_input)
		.expect("Compiled rules serialize to JSON without error.");
	let deterministic_hash = hex::encode(Sha256::digest(&canonical));

	MappingCompileReport {
		issues,
		compiled: Some(CompiledMappingSpec {
			spec_id: spec.spec_id.to_string(),
			version: spec.version,
			source_object: spec.source_object.clone(),
			target_model: spec.target_model.clone(),
			rules: compiled_rules,
			deterministic_hash,
		}),
	}
}

/// Cache of compiled specs keyed by their deterministic hash.
///
/// Compilation is pure, so a hash hit can serve the cached value without
/// revalidating. Reports with blocking errors are never cached.
#[derive(Debug, Default)]
pub struct CompiledSpecCache {
	entries: Mutex<HashMap<String, Arc<CompiledMappingSpec>>>,
}
impl CompiledSpecCache {
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Compiles the spec, serving a cached copy when the hash is known.
	pub fn get_or_compile(
		&self,
		spec: &MappingSpec,
		schema: &SchemaDef,
	) -> (MappingCompileReport, Option<Arc<CompiledMappingSpec>>) {
		let report = compile_mapping_spec(spec, schema);
		let Some(compiled) = &report.compiled else {
			return (report, None);
		};
		let mut entries = self.entries.lock();
		let shared = entries
			.entry(compiled.deterministic_hash.clone())
			.or_insert_with(|| Arc::new(compiled.clone()))
			.clone();

		(report, Some(shared))
	}

	/// Number of cached compiled specs.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// Returns true when the cache is empty.
	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}
