//! Mapping previewer: applies a compiled spec to sample records.

// crates.io
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	mapping::{
		CompiledMappingSpec, IssueSeverity, MappingCompileReport, MappingIssue, MappingSpec,
		SchemaDef, Transform, codes, compile_mapping_spec,
	},
};

/// Issue code for sample values a transform could not convert.
pub const PREVIEW_TRANSFORM_FAILED: &str = "preview_transform_failed";

/// One written target field in a preview record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewDiff {
	/// Target path that was written.
	pub target_path: String,
	/// Value written at the path.
	pub value: Json,
}

/// Projection of one sample record through the compiled rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRecord {
	/// Index of the sample in the input slice.
	pub index: usize,
	/// Assembled target object.
	pub output: Json,
	/// Per-field writes, in compiled rule order.
	pub diffs: Vec<PreviewDiff>,
	/// Source paths the sample was missing.
	pub missing_sources: Vec<String>,
}

/// Result of previewing a spec against sample records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingPreviewReport {
	/// Underlying compile report.
	pub compile: MappingCompileReport,
	/// Projected records, in sample order. Empty when compilation failed.
	pub records: Vec<PreviewRecord>,
	/// Preview-stage issues, sorted like compiler issues.
	pub issues: Vec<MappingIssue>,
	/// SHA-256 over the compile hash, records, and issues, hex-encoded.
	pub deterministic_hash: String,
}

#[derive(Serialize)]
struct HashInput<'a> {
	compile_hash: &'a str,
	records: &'a [PreviewRecord],
	issues: &'a [MappingIssue],
}

/// Compiles a spec and applies it to sample records.
///
/// Pure and deterministic: equal inputs yield equal reports and hashes.
/// Samples missing a mapped source path produce a `preview_source_missing`
/// warning instead of failing the preview.
pub fn preview_mapping_spec(
	spec: &MappingSpec,
	schema: &SchemaDef,
	samples: &[Json],
) -> MappingPreviewReport {
	let compile = compile_mapping_spec(spec, schema);
	let mut records = Vec::new();
	let mut issues = Vec::new();

	if let Some(compiled) = &compile.compiled {
		for (index, sample) in samples.iter().enumerate() {
			records.push(project_record(compiled, index, sample, &mut issues));
		}
	}

	issues.sort_by(|lhs, rhs| {
		(
			lhs.severity,
			&lhs.code,
			&lhs.rule_id,
			&lhs.source_path,
			&lhs.target_path,
			&lhs.message,
		)
			.cmp(&(
				rhs.severity,
				&rhs.code,
				&rhs.rule_id,
				&rhs.source_path,
				&rhs.target_path,
				&rhs.message,
			))
	});

	let compile_hash = compile
		.compiled
		.as_ref()
		.map(|compiled| compiled.deterministic_hash.clone())
		.unwrap_or_default();
	let canonical = serde_json::to_vec(&HashInput {
		compile_hash: &compile_hash,
		records: &records,
		issues: &issues,
	})
	.expect("Preview report serializes to JSON without error.");
	let deterministic_hash = hex::encode(Sha256::digest(&canonical));

	MappingPreviewReport { compile, records, issues, deterministic_hash }
}

fn project_record(
	compiled: &CompiledMappingSpec,
	index: usize,
	sample: &Json,
	issues: &mut Vec<MappingIssue>,
) -> PreviewRecord {
	let mut output = Json::Object(serde_json::Map::new());
	let mut diffs = Vec::new();
	let mut missing_sources = Vec::new();

	for rule in &compiled.rules {
		let Some(value) = lookup_path(sample, &rule.source_path) else {
			missing_sources.push(rule.source_path.clone());
			issues.push(MappingIssue {
				severity: IssueSeverity::Warning,
				code: codes::PREVIEW_SOURCE_MISSING.into(),
				rule_id: Some(rule.rule_id.clone()),
				source_path: Some(rule.source_path.clone()),
				target_path: Some(rule.target_path.clone()),
				message: format!(
					"Sample {index} is missing source path {}.",
					rule.source_path,
				),
			});

			continue;
		};

		match apply_transform(rule.transform, value) {
			Ok(converted) => {
				write_path(&mut output, &rule.target_path, converted.clone());
				diffs.push(PreviewDiff { target_path: rule.target_path.clone(), value: converted });
			},
			Err(reason) => issues.push(MappingIssue {
				severity: IssueSeverity::Warning,
				code: PREVIEW_TRANSFORM_FAILED.into(),
				rule_id: Some(rule.rule_id.clone()),
				source_path: Some(rule.source_path.clone()),
				target_path: Some(rule.target_path.clone()),
				message: format!("Sample {index}: {reason}."),
			}),
		}
	}

	PreviewRecord { index, output, diffs, missing_sources }
}

fn lookup_path<'a>(record: &'a Json, path: &str) -> Option<&'a Json> {
	let mut current = record;

	for segment in path.split('.') {
		current = current.as_object()?.get(segment)?;
	}

	Some(current)
}

fn write_path(target: &mut Json, path: &str, value: Json) {
	let mut current = target;

	let segments: Vec<&str> = path.split('.').collect();

	for (position, segment) in segments.iter().enumerate() {
		let map = match current {
			Json::Object(map) => map,
			_ => return,
		};

		if position == segments.len() - 1 {
			map.insert((*segment).to_owned(), value);

			return;
		}

		current = map
			.entry((*segment).to_owned())
			.or_insert_with(|| Json::Object(serde_json::Map::new()));
	}
}

/// Applies a transform to a sample value.
pub fn apply_transform(transform: Transform, value: &Json) -> Result<Json, String> {
	match transform {
		Transform::Identity => Ok(value.clone()),
		Transform::ToString => match value {
			Json::String(s) => Ok(Json::String(s.clone())),
			Json::Number(n) => Ok(Json::String(n.to_string())),
			Json::Bool(b) => Ok(Json::String(b.to_string())),
			other => Err(format!("cannot render {other} as a string")),
		},
		Transform::ToInt => match value {
			Json::Number(n) => n
				.as_i64()
				.or_else(|| n.as_f64().map(|f| f as i64))
				.map(Json::from)
				.ok_or_else(|| format!("{n} does not fit an integer")),
			Json::String(s) => s
				.trim()
				.parse::<i64>()
				.map(Json::from)
				.map_err(|_| format!("{s:?} is not an integer")),
			Json::Bool(b) => Ok(Json::from(i64::from(*b))),
			other => Err(format!("cannot convert {other} to an integer")),
		},
		Transform::ToFloat => match value {
			Json::Number(n) =>
				n.as_f64().map(Json::from).ok_or_else(|| format!("{n} is not representable")),
			Json::String(s) => s
				.trim()
				.parse::<f64>()
				.map(Json::from)
				.map_err(|_| format!("{s:?} is not a number")),
			other => Err(format!("cannot convert {other} to a number")),
		},
		Transform::ToBool => match value {
			Json::Bool(b) => Ok(Json::Bool(*b)),
			Json::Number(n) => Ok(Json::Bool(n.as_i64().unwrap_or(0) != 0)),
			Json::String(s) => match s.trim().to_ascii_lowercase().as_str() {
				"true" | "1" | "yes" => Ok(Json::Bool(true)),
				"false" | "0" | "no" => Ok(Json::Bool(false)),
				other => Err(format!("{other:?} is not a boolean")),
			},
			other => Err(format!("cannot convert {other} to a boolean")),
		},
		Transform::Trim => string_transform(value, |s| s.trim().to_owned()),
		Transform::Lowercase => string_transform(value, str::to_lowercase),
		Transform::Uppercase => string_transform(value, str::to_uppercase),
		Transform::UnixTimeToRfc3339 => {
			let seconds = match value {
				Json::Number(n) => n.as_i64(),
				Json::String(s) => s.trim().parse::<i64>().ok(),
				_ => None,
			}
			.ok_or_else(|| format!("{value} is not a unix timestamp"))?;
			let instant = OffsetDateTime::from_unix_timestamp(seconds)
				.map_err(|_| format!("{seconds} is out of the supported time range"))?;

			instant
				.format(&Rfc3339)
				.map(Json::String)
				.map_err(|_| format!("{seconds} cannot be formatted as RFC 3339"))
		},
	}
}

fn string_transform(value: &Json, op: impl Fn(&str) -> String) -> Result<Json, String> {
	match value {
		Json::String(s) => Ok(Json::String(op(s))),
		other => Err(format!("expected a string, got {other}")),
	}
}
