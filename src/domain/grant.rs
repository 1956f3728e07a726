//! Grant modeling: normalized grant sets, delta math, and the journaled history.

// std
use std::{cmp::Ordering, collections::BTreeSet, sync::OnceLock};
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, domain::ConnectionId};

/// Errors emitted when validating grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum GrantValidationError {
	/// Empty grant entries are not allowed.
	#[error("Grant entries cannot be empty.")]
	Empty,
	/// Grants cannot contain embedded whitespace characters.
	#[error("Grant contains whitespace: {grant}.")]
	ContainsWhitespace {
		/// The offending grant string.
		grant: String,
	},
}
impl From<GrantValidationError> for ServiceError {
	fn from(value: GrantValidationError) -> Self {
		ServiceError::bad_input(value.to_string())
	}
}

/// Normalized set of provider grants with a stable fingerprint cache.
///
/// Grants are deduplicated and sorted so equality, ordering, and hashing
/// remain consistent across platforms. The [`fingerprint`](Self::fingerprint)
/// helper lazily caches a base64 (no padding) SHA-256 digest of the
/// normalized string; the [`Hash`] implementation reuses that cache.
#[derive(Default)]
pub struct GrantSet {
	/// The normalized grants.
	pub grants: Arc<[String]>,
	/// The fingerprint of the normalized grants.
	pub fingerprint_cache: OnceLock<String>,
}
impl GrantSet {
	/// Creates a normalized grant set from any iterator.
	pub fn new<I, S>(grants: I) -> Result<Self, GrantValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Ok(Self { grants: normalize(grants)?, fingerprint_cache: OnceLock::new() })
	}

	/// Number of distinct grants.
	pub fn len(&self) -> usize {
		self.grants.len()
	}

	/// Returns true if no grants are present.
	pub fn is_empty(&self) -> bool {
		self.grants.is_empty()
	}

	/// Returns true if the normalized set contains the provided grant.
	pub fn contains(&self, grant: &str) -> bool {
		self.grants.binary_search_by(|candidate| candidate.as_str().cmp(grant)).is_ok()
	}

	/// Iterator over normalized grants.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.grants.iter().map(|g| g.as_str())
	}

	/// Returns the normalized string representation (space-delimited).
	pub fn normalized(&self) -> String {
		self.grants.join(" ")
	}

	/// Grants present in `self` but absent from `other`, sorted.
	pub fn difference(&self, other: &GrantSet) -> Vec<String> {
		self.iter().filter(|grant| !other.contains(grant)).map(str::to_owned).collect()
	}

	/// Stable fingerprint derived from the normalized grant list.
	pub fn fingerprint(&self) -> String {
		self.fingerprint_cache.get_or_init(|| compute_fingerprint(&self.grants)).clone()
	}

	/// Returns the underlying slice of grant strings.
	pub fn as_slice(&self) -> &[String] {
		&self.grants
	}
}
impl Clone for GrantSet {
	fn clone(&self) -> Self {
		Self { grants: self.grants.clone(), fingerprint_cache: OnceLock::new() }
	}
}
impl PartialEq for GrantSet {
	fn eq(&self, other: &Self) -> bool {
		self.grants == other.grants
	}
}
impl Eq for GrantSet {}
impl PartialOrd for GrantSet {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for GrantSet {
	fn cmp(&self, other: &Self) -> Ordering {
		self.grants.cmp(&other.grants)
	}
}
impl Hash for GrantSet {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.fingerprint_cache.get_or_init(|| compute_fingerprint(&self.grants)).hash(state);
	}
}
impl Debug for GrantSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("GrantSet").field(&self.grants).finish()
	}
}
impl Display for GrantSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl TryFrom<Vec<String>> for GrantSet {
	type Error = GrantValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl FromStr for GrantSet {
	type Err = GrantValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(GrantValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for GrantSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.grants.len()))?;

		for grant in self.grants.iter() {
			seq.serialize_element(grant)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for GrantSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		GrantSet::new(values).map_err(DeError::custom)
	}
}

/// Kind of change observed between two granted sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantDeltaKind {
	/// No prior snapshot existed.
	InitialGranted,
	/// Grants were only added.
	Expanded,
	/// At least one grant was removed.
	Downgraded,
	/// The sets are equal.
	Unchanged,
}
impl GrantDeltaKind {
	/// Returns the journal label for the delta kind.
	pub const fn as_str(self) -> &'static str {
		match self {
			GrantDeltaKind::InitialGranted => "initial_granted",
			GrantDeltaKind::Expanded => "expanded",
			GrantDeltaKind::Downgraded => "downgraded",
			GrantDeltaKind::Unchanged => "unchanged",
		}
	}
}

/// Outcome of comparing a prior granted set against a new one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantDelta {
	/// Classification of the change.
	pub kind: GrantDeltaKind,
	/// Grants present now but not before, sorted.
	pub added: Vec<String>,
	/// Grants present before but not now, sorted.
	pub removed: Vec<String>,
}

/// Computes the delta between the previously granted set and the new one.
///
/// `expanded` requires additions without removals; any removal classifies the
/// delta as `downgraded` even when grants were also added.
pub fn compute_grant_delta(prior: Option<&GrantSet>, next: &GrantSet) -> GrantDelta {
	let Some(prior) = prior else {
		return GrantDelta {
			kind: GrantDeltaKind::InitialGranted,
			added: next.iter().map(str::to_owned).collect(),
			removed: Vec::new(),
		};
	};
	let added = next.difference(prior);
	let removed = prior.difference(next);
	let kind = if !removed.is_empty() {
		GrantDeltaKind::Downgraded
	} else if !added.is_empty() {
		GrantDeltaKind::Expanded
	} else {
		GrantDeltaKind::Unchanged
	};

	GrantDelta { kind, added, removed }
}

/// Event types journaled alongside grant snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantEventKind {
	/// First snapshot for the connection.
	InitialGranted,
	/// Grants were only added.
	Expanded,
	/// At least one grant was removed.
	Downgraded,
	/// A reconsent flow finished and re-established the granted set.
	ReconsentCompleted,
}
impl GrantEventKind {
	/// Returns the journal label for the event kind.
	pub const fn as_str(self) -> &'static str {
		match self {
			GrantEventKind::InitialGranted => "initial_granted",
			GrantEventKind::Expanded => "expanded",
			GrantEventKind::Downgraded => "downgraded",
			GrantEventKind::ReconsentCompleted => "reconsent_completed",
		}
	}
}

/// Versioned snapshot of the requested and granted sets for a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSnapshot {
	/// Owning connection.
	pub connection_id: ConnectionId,
	/// Monotonic version, starting at 1.
	pub version: u32,
	/// Grants the service asked for.
	pub requested: GrantSet,
	/// Grants the provider actually issued.
	pub granted: GrantSet,
	/// Instant the snapshot was taken.
	pub created_at: OffsetDateTime,
}

/// Journal entry describing one observed grant change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantEvent {
	/// Owning connection.
	pub connection_id: ConnectionId,
	/// Classification of the change.
	pub kind: GrantEventKind,
	/// Grants added by the change, sorted.
	pub added: Vec<String>,
	/// Grants removed by the change, sorted.
	pub removed: Vec<String>,
	/// Snapshot version the event belongs to.
	pub version: u32,
	/// Instant the change was journaled.
	pub occurred_at: OffsetDateTime,
}

fn normalize<I, S>(grants: I) -> Result<Arc<[String]>, GrantValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut set = BTreeSet::new();

	for grant in grants {
		let owned: String = grant.into();

		if owned.is_empty() {
			return Err(GrantValidationError::Empty);
		}
		if owned.chars().any(char::is_whitespace) {
			return Err(GrantValidationError::ContainsWhitespace { grant: owned });
		}

		set.insert(owned);
	}

	Ok(Arc::from(set.into_iter().collect::<Vec<_>>()))
}

fn compute_fingerprint(grants: &[String]) -> String {
	let normalized = grants.join(" ");
	let mut hasher = Sha256::new();

	hasher.update(normalized.as_bytes());

	let digest = hasher.finalize();

	STANDARD_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn grants(values: &[&str]) -> GrantSet {
		GrantSet::new(values.iter().copied()).expect("Grant fixture should be valid.")
	}

	#[test]
	fn grants_normalize_and_fingerprint_stably() {
		let lhs = grants(&["repo:write", "repo:read", "repo:read"]);
		let rhs = grants(&["repo:read", "repo:write"]);

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.normalized(), "repo:read repo:write");
		assert_eq!(lhs.fingerprint(), rhs.fingerprint());
	}

	#[test]
	fn invalid_grants_error() {
		assert!(GrantSet::new([""]).is_err());
		assert!(GrantSet::new(["contains space"]).is_err());
	}

	#[test]
	fn delta_classifies_initial_grant() {
		let delta = compute_grant_delta(None, &grants(&["a", "b"]));

		assert_eq!(delta.kind, GrantDeltaKind::InitialGranted);
		assert_eq!(delta.added, vec!["a", "b"]);
		assert!(delta.removed.is_empty());
	}

	#[test]
	fn delta_classifies_expansion() {
		let delta = compute_grant_delta(Some(&grants(&["a"])), &grants(&["a", "b"]));

		assert_eq!(delta.kind, GrantDeltaKind::Expanded);
		assert_eq!(delta.added, vec!["b"]);
		assert!(delta.removed.is_empty());
	}

	#[test]
	fn delta_prefers_downgrade_when_anything_was_removed() {
		let delta = compute_grant_delta(Some(&grants(&["a", "b"])), &grants(&["a", "c"]));

		assert_eq!(delta.kind, GrantDeltaKind::Downgraded);
		assert_eq!(delta.added, vec!["c"]);
		assert_eq!(delta.removed, vec!["b"]);
	}

	#[test]
	fn delta_detects_unchanged_sets() {
		let delta = compute_grant_delta(Some(&grants(&["a", "b"])), &grants(&["b", "a"]));

		assert_eq!(delta.kind, GrantDeltaKind::Unchanged);
		assert!(delta.added.is_empty());
		assert!(delta.removed.is_empty());
	}
}
