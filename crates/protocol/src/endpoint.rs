//! Endpoint descriptors and the signature predicate used to select them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One serial endpoint as reported by a lister on a single poll.
///
/// Descriptors carry no identity beyond `path` and are re-fetched every tick.
/// On the wire the attributes sit next to `path`:
///
/// ```text
/// { "path": "/dev/ttyUSB0", "manufacturer": "FTDI", "vendorId": "0403" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
	/// Device path, unique per host at listing time.
	pub path: String,
	/// Discoverable attributes (manufacturer, vendor id, ...).
	#[serde(flatten)]
	pub attributes: BTreeMap<String, String>,
}

impl EndpointDescriptor {
	/// Creates a descriptor without attributes.
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			attributes: BTreeMap::new(),
		}
	}

	/// Adds one attribute, builder style.
	pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(key.into(), value.into());
		self
	}

	/// Looks up a reported attribute by name. The device path is not an
	/// attribute.
	pub fn attribute(&self, key: &str) -> Option<&str> {
		self.attributes.get(key).map(String::as_str)
	}
}

/// Caller-supplied attribute equality predicate.
///
/// An endpoint matches iff every key of the signature is present on the
/// endpoint with an equal value. The empty signature matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(BTreeMap<String, String>);

impl Signature {
	/// Signature that matches every endpoint.
	pub fn any() -> Self {
		Self::default()
	}

	/// Adds one required attribute, builder style.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	/// Returns `true` when no attribute is required.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Iterates required `(attribute, value)` pairs.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	/// Exact, side-effect-free match of this signature against `endpoint`.
	pub fn matches(&self, endpoint: &EndpointDescriptor) -> bool {
		self.0
			.iter()
			.all(|(key, expected)| endpoint.attribute(key) == Some(expected.as_str()))
	}
}

impl<K, V> FromIterator<(K, V)> for Signature
where
	K: Into<String>,
	V: Into<String>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}
