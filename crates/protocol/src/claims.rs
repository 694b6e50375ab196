//! The shared claim table document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mapping from endpoint path to its claimed flag.
///
/// Presence with `true` means claimed; on disk this is a plain JSON object:
///
/// ```text
/// { "/dev/ttyUSB0": true }
/// ```
///
/// Only `true` counts as claimed. Entries other tools wrote with any other
/// value are unclaimed but kept, so rewriting the file never drops them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimTable(BTreeMap<String, Value>);

impl ClaimTable {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Parses the on-disk representation.
	pub fn parse(content: &str) -> serde_json::Result<Self> {
		serde_json::from_str(content)
	}

	/// Serializes to the on-disk representation.
	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}

	/// Returns `true` when `path` is currently claimed.
	pub fn contains(&self, path: &str) -> bool {
		self.0.get(path).is_some_and(is_claimed)
	}

	/// Marks `path` claimed. Returns `false` if it already was.
	pub fn insert(&mut self, path: impl Into<String>) -> bool {
		!self.0.insert(path.into(), Value::Bool(true)).is_some_and(|prior| is_claimed(&prior))
	}

	/// Deletes the entry for `path`. Returns `true` if an entry existed.
	pub fn remove(&mut self, path: &str) -> bool {
		self.0.remove(path).is_some()
	}

	/// Deletes every listed path.
	pub fn remove_all<'a>(&mut self, paths: impl IntoIterator<Item = &'a str>) {
		for path in paths {
			self.0.remove(path);
		}
	}

	/// Iterates the claimed paths.
	pub fn paths(&self) -> impl Iterator<Item = &str> {
		self.0
			.iter()
			.filter(|(_, value)| is_claimed(value))
			.map(|(path, _)| path.as_str())
	}

	/// Number of entries, claimed or not.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` when the table has no entries.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl<S: Into<String>> FromIterator<S> for ClaimTable {
	fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
		Self(iter.into_iter().map(|path| (path.into(), Value::Bool(true))).collect())
	}
}

fn is_claimed(value: &Value) -> bool {
	*value == Value::Bool(true)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn claim_then_release() {
		let mut table = ClaimTable::new();
		assert!(!table.contains("/dev/ttyUSB0"));

		assert!(table.insert("/dev/ttyUSB0"));
		assert!(table.contains("/dev/ttyUSB0"));
		assert!(!table.insert("/dev/ttyUSB0"));

		assert!(table.remove("/dev/ttyUSB0"));
		assert!(!table.contains("/dev/ttyUSB0"));
		assert!(!table.remove("/dev/ttyUSB0"));
	}

	#[test]
	fn parses_claim_file_format() {
		let table = ClaimTable::parse(r#"{"/dev/ttyUSB0":true,"/dev/ttyACM0":false}"#).unwrap();
		assert!(table.contains("/dev/ttyUSB0"));
		assert!(!table.contains("/dev/ttyACM0"));
		assert_eq!(table.paths().collect::<Vec<_>>(), vec!["/dev/ttyUSB0"]);
	}

	#[test]
	fn writes_claim_file_format() {
		let table: ClaimTable = ["/dev/ttyUSB0"].into_iter().collect();
		assert_eq!(table.to_json().unwrap(), r#"{"/dev/ttyUSB0":true}"#);
	}

	#[test]
	fn foreign_values_survive_a_rewrite() {
		let mut table = ClaimTable::parse(r#"{"/dev/ttyS0":1,"/dev/ttyS1":{"pid":42},"/dev/ttyUSB0":true}"#).unwrap();
		assert_eq!(table.paths().collect::<Vec<_>>(), vec!["/dev/ttyUSB0"]);
		assert!(!table.contains("/dev/ttyS0"));

		assert!(table.insert("/dev/ttyS0"));
		table.remove("/dev/ttyUSB0");
		assert_eq!(table.to_json().unwrap(), r#"{"/dev/ttyS0":true,"/dev/ttyS1":{"pid":42}}"#);
	}

	#[test]
	fn malformed_content_is_an_error() {
		assert!(ClaimTable::parse("{not json").is_err());
		assert!(ClaimTable::parse(r#"["/dev/ttyUSB0"]"#).is_err());
	}

	#[test]
	fn remove_all_only_touches_listed_paths() {
		let mut table: ClaimTable = ["/dev/a", "/dev/b", "/dev/c"].into_iter().collect();
		table.remove_all(["/dev/a", "/dev/c"]);
		assert_eq!(table.paths().collect::<Vec<_>>(), vec!["/dev/b"]);
	}
}
