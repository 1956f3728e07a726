//! Internal actor coordinates: the (type, id) pair every connection hangs off.

// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeError {
	/// Scope identifiers cannot be empty.
	#[error("Scope identifier cannot be empty.")]
	EmptyId,
	/// Scope identifiers cannot contain whitespace.
	#[error("Scope identifier contains whitespace: {id}.")]
	IdContainsWhitespace {
		/// The offending identifier.
		id: String,
	},
	/// The scope type label is not recognized.
	#[error("Unknown scope type: {label}.")]
	UnknownType {
		/// The offending label.
		label: String,
	},
}
impl From<ScopeError> for ServiceError {
	fn from(value: ScopeError) -> Self {
		ServiceError::bad_input(value.to_string())
	}
}

/// Kind of internal actor a scope points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
	/// Individual user scope.
	User,
	/// Organization scope.
	Org,
}
impl ScopeType {
	/// Returns the lowercase label for the scope type.
	pub const fn as_str(self) -> &'static str {
		match self {
			ScopeType::User => "user",
			ScopeType::Org => "org",
		}
	}
}
impl Display for ScopeType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for ScopeType {
	type Err = ScopeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"user" => Ok(ScopeType::User),
			"org" | "organization" => Ok(ScopeType::Org),
			other => Err(ScopeError::UnknownType { label: other.to_owned() }),
		}
	}
}

/// Identifies the internal actor (user or org) that owns a connection.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
	/// Actor kind.
	pub scope_type: ScopeType,
	/// Actor identifier within that kind.
	pub scope_id: String,
}
impl Scope {
	/// Creates a validated scope.
	pub fn new(scope_type: ScopeType, scope_id: impl Into<String>) -> Result<Self, ScopeError> {
		let scope_id = scope_id.into();

		if scope_id.is_empty() {
			return Err(ScopeError::EmptyId);
		}
		if scope_id.chars().any(char::is_whitespace) {
			return Err(ScopeError::IdContainsWhitespace { id: scope_id });
		}

		Ok(Self { scope_type, scope_id })
	}

	/// Convenience constructor for user scopes.
	pub fn user(scope_id: impl Into<String>) -> Result<Self, ScopeError> {
		Self::new(ScopeType::User, scope_id)
	}

	/// Convenience constructor for org scopes.
	pub fn org(scope_id: impl Into<String>) -> Result<Self, ScopeError> {
		Self::new(ScopeType::Org, scope_id)
	}

	/// Re-validates the scope, for values deserialized from untrusted input.
	pub fn validate(&self) -> Result<(), ScopeError> {
		Self::new(self.scope_type, self.scope_id.clone()).map(|_| ())
	}
}
impl Display for Scope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}:{}", self.scope_type, self.scope_id)
	}
}
impl FromStr for Scope {
	type Err = ScopeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (kind, id) = s.split_once(':').ok_or(ScopeError::EmptyId)?;
		let scope_type = ScopeType::from_str(kind)?;

		Self::new(scope_type, id)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scope_validates_identifier() {
		assert!(Scope::user("").is_err());
		assert!(Scope::org("o 1").is_err());

		let scope = Scope::user("u1").expect("Scope fixture should be valid.");

		assert_eq!(scope.to_string(), "user:u1");
	}

	#[test]
	fn scope_parses_from_display_form() {
		let scope = Scope::from_str("org:acme").expect("Scope string should parse.");

		assert_eq!(scope.scope_type, ScopeType::Org);
		assert_eq!(scope.scope_id, "acme");
		assert!(Scope::from_str("team:x").is_err());
		assert!(Scope::from_str("user").is_err());
	}

	#[test]
	fn scope_type_parsing_is_case_insensitive() {
		assert_eq!(ScopeType::from_str("USER").expect("Label should parse."), ScopeType::User);
		assert_eq!(ScopeType::from_str("Organization").expect("Label should parse."), ScopeType::Org);
	}
}
