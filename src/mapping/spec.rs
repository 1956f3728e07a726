//! Mapping specifications and their draft → validated → published lifecycle.

// self
use crate::{
	_prelude::*,
	domain::{MappingSpecId, ProviderId, Scope},
	error::ErrorCategory,
	flows::Service,
	mapping::{SchemaDef, compile_mapping_spec},
	obs::{OpKind, OpOutcome, OpSpan, record_op_outcome},
};

/// Lifecycle status of a mapping spec version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSpecStatus {
	/// Editable working copy.
	Draft,
	/// Compiled cleanly against its schema.
	Validated,
	/// Frozen; published versions are immutable.
	Published,
}
impl MappingSpecStatus {
	/// Returns the lowercase label for the status.
	pub const fn as_str(self) -> &'static str {
		match self {
			MappingSpecStatus::Draft => "draft",
			MappingSpecStatus::Validated => "validated",
			MappingSpecStatus::Published => "published",
		}
	}
}

/// One source-to-target rule of a mapping spec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
	/// Rule identifier, unique within the spec.
	pub id: String,
	/// Dotted path into the source object.
	pub source_path: String,
	/// Dotted path into the target model.
	pub target_path: String,
	/// Transform label (see the compiler's supported set).
	pub transform: String,
	/// Declared target type; inferred from the transform when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_type: Option<crate::mapping::FieldType>,
}

/// Data-synchronization mapping between an external schema and an internal model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSpec {
	/// Spec identifier.
	pub spec_id: MappingSpecId,
	/// Provider the source schema belongs to.
	pub provider_id: ProviderId,
	/// Internal actor owning the spec.
	pub scope: Scope,
	/// Monotonic version, starting at 1.
	pub version: u32,
	/// Lifecycle status.
	pub status: MappingSpecStatus,
	/// Mapping rules.
	pub rules: Vec<MappingRule>,
	/// Source object the rules read from.
	pub source_object: String,
	/// Target model the rules write into.
	pub target_model: String,
	/// Declared `name@version` schema reference, when pinned.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub schema_ref: Option<String>,
}
impl MappingSpec {
	/// Normalizes identifier-ish fields: trims paths/ids, lowercases transforms.
	pub fn normalize(&mut self) {
		self.source_object = self.source_object.trim().to_owned();
		self.target_model = self.target_model.trim().to_owned();
		self.schema_ref = self.schema_ref.as_ref().map(|r| r.trim().to_owned());

		for rule in &mut self.rules {
			rule.id = rule.id.trim().to_owned();
			rule.source_path = rule.source_path.trim().to_owned();
			rule.target_path = rule.target_path.trim().to_owned();
			rule.transform = rule.transform.trim().to_ascii_lowercase();
		}
	}

	/// Basic structural validation, before schema-aware compilation.
	pub fn validate_shape(&self) -> Result<()> {
		if self.version < 1 {
			return Err(ServiceError::bad_input("Mapping spec version must be at least 1."));
		}
		if self.source_object.is_empty() {
			return Err(ServiceError::bad_input("Mapping spec source object is required."));
		}
		if self.target_model.is_empty() {
			return Err(ServiceError::bad_input("Mapping spec target model is required."));
		}

		Ok(())
	}
}

/// Parses a mapping spec from JSON with path-aware diagnostics.
pub fn parse_mapping_spec(raw: &str) -> Result<MappingSpec> {
	let deserializer = &mut serde_json::Deserializer::from_str(raw);

	serde_path_to_error::deserialize(deserializer).map_err(|err| {
		ServiceError::new(
			ErrorCategory::Validation,
			format!("Mapping spec is malformed at {}: {}.", err.path(), err.inner()),
		)
	})
}

impl Service {
	/// Persists a draft spec version.
	pub async fn save_mapping_spec(&self, mut spec: MappingSpec) -> Result<MappingSpec> {
		spec.normalize();
		spec.validate_shape()?;
		spec.scope.validate()?;

		self.mapping_specs.save(spec.clone()).await?;

		Ok(spec)
	}

	/// Compiles a stored spec against a schema and records the validated status.
	///
	/// Compilation is pure; only the status change touches the store. Specs
	/// with blocking issues stay in `draft`.
	pub async fn validate_mapping_spec(
		&self,
		spec_id: &MappingSpecId,
		version: u32,
		schema: &SchemaDef,
	) -> Result<crate::mapping::MappingCompileReport> {
		const KIND: OpKind = OpKind::MappingCompile;

		let span = OpSpan::new(KIND, "validate_mapping_spec");

		record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async move {
				let mut spec = self
					.mapping_specs
					.get(spec_id, version)
					.await?
					.ok_or_else(|| {
						ServiceError::not_found(format!("Mapping spec not found: {spec_id} v{version}."))
					})?;
				let report = compile_mapping_spec(&spec, schema);

				if spec.status == MappingSpecStatus::Draft && !report.has_errors() {
					spec.status = MappingSpecStatus::Validated;

					self.mapping_specs.save(spec).await?;
				}

				Ok(report)
			})
			.await;

		match &result {
			Ok(_) => record_op_outcome(KIND, OpOutcome::Success),
			Err(_) => record_op_outcome(KIND, OpOutcome::Failure),
		}

		result
	}

	/// Publishes a validated spec version, freezing it.
	pub async fn publish_mapping_spec(
		&self,
		spec_id: &MappingSpecId,
		version: u32,
	) -> Result<MappingSpec> {
		let mut spec = self
			.mapping_specs
			.get(spec_id, version)
			.await?
			.ok_or_else(|| {
				ServiceError::not_found(format!("Mapping spec not found: {spec_id} v{version}."))
			})?;

		match spec.status {
			MappingSpecStatus::Published => Err(ServiceError::conflict(format!(
				"Mapping spec {spec_id} v{version} is already published.",
			))),
			MappingSpecStatus::Draft => Err(ServiceError::conflict(format!(
				"Mapping spec {spec_id} v{version} must be validated before publishing.",
			))),
			MappingSpecStatus::Validated => {
				spec.status = MappingSpecStatus::Published;

				self.mapping_specs.save(spec.clone()).await?;

				Ok(spec)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn normalization_trims_and_lowercases() {
		let mut spec = MappingSpec {
			spec_id: MappingSpecId::new("spec-1").expect("Spec fixture should be valid."),
			provider_id: ProviderId::new("hubspot").expect("Provider fixture should be valid."),
			scope: Scope::org("acme").expect("Scope fixture should be valid."),
			version: 1,
			status: MappingSpecStatus::Draft,
			rules: vec![MappingRule {
				id: " r1 ".into(),
				source_path: " email ".into(),
				target_path: " contact.email ".into(),
				transform: " Identity ".into(),
				target_type: None,
			}],
			source_object: " Contacts ".into(),
			target_model: " contact ".into(),
			schema_ref: Some(" contacts_schema@v1 ".into()),
		};

		spec.normalize();

		assert_eq!(spec.source_object, "Contacts");
		assert_eq!(spec.rules[0].transform, "identity");
		assert_eq!(spec.rules[0].target_path, "contact.email");
		assert_eq!(spec.schema_ref.as_deref(), Some("contacts_schema@v1"));
	}

	#[test]
	fn malformed_spec_reports_json_path() {
		let err = parse_mapping_spec("{\"spec_id\": 42}")
			.expect_err("Malformed spec must be rejected.");

		assert_eq!(err.category, ErrorCategory::Validation);
		assert!(err.message.contains("spec_id"));
	}
}
