//! External schema model the mapping compiler validates against.

// self
use crate::_prelude::*;

/// Semantic type of a schema field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
	/// UTF-8 string.
	String,
	/// Whole number.
	Integer,
	/// Floating point number.
	Number,
	/// Boolean flag.
	Boolean,
	/// Point in time.
	Timestamp,
	/// Nested object.
	Object,
	/// Homogeneous list.
	Array,
}
impl FieldType {
	/// Returns the lowercase label for the type.
	pub const fn as_str(self) -> &'static str {
		match self {
			FieldType::String => "string",
			FieldType::Integer => "integer",
			FieldType::Number => "number",
			FieldType::Boolean => "boolean",
			FieldType::Timestamp => "timestamp",
			FieldType::Object => "object",
			FieldType::Array => "array",
		}
	}
}
impl Display for FieldType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One field of a schema object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
	/// Dotted path of the field within its object.
	pub path: String,
	/// Semantic type.
	#[serde(rename = "type")]
	pub field_type: FieldType,
	/// True when every source record must carry the field.
	#[serde(default)]
	pub required: bool,
}

/// One object (table, resource) of an external schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaObject {
	/// Object name.
	pub name: String,
	/// Declared fields.
	pub fields: Vec<SchemaField>,
}
impl SchemaObject {
	/// Finds a field by its dotted path.
	pub fn field(&self, path: &str) -> Option<&SchemaField> {
		self.fields.iter().find(|field| field.path == path)
	}

	/// Iterator over required fields.
	pub fn required_fields(&self) -> impl Iterator<Item = &SchemaField> {
		self.fields.iter().filter(|field| field.required)
	}
}

/// Versioned external schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
	/// Schema name.
	pub name: String,
	/// Schema version label.
	pub version: String,
	/// Declared objects.
	pub objects: Vec<SchemaObject>,
}
impl SchemaDef {
	/// Canonical `name@version` reference derived from the schema.
	pub fn schema_ref(&self) -> String {
		format!("{}@{}", self.name, self.version)
	}

	/// Finds an object by name, case-insensitively.
	pub fn object(&self, name: &str) -> Option<&SchemaObject> {
		self.objects.iter().find(|object| object.name.eq_ignore_ascii_case(name))
	}
}
