//! Engine options and well-known paths.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use portclaim_protocol::Signature;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Name of the shared claim file under the user's home directory.
pub const CLAIM_FILE_NAME: &str = ".serialport";

/// Delay between discovery ticks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Options recognized by [`crate::Engine`].
///
/// Serialized in camelCase so the same JSON file can be shared with other
/// tooling:
///
/// ```text
/// {
///   "signature": { "manufacturer": "tmpvar" },
///   "header": 4,
///   "config": { "baudRate": 115200 },
///   "pollInterval": 500
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
	/// Attribute predicate selecting candidate endpoints; empty matches all.
	#[serde(default)]
	pub signature: Signature,
	/// Minimum number of bytes to read before handing a connection over.
	///
	/// Accepts a number or, for compatibility, a string whose length is used.
	/// Zero means immediate handoff.
	#[serde(default, deserialize_with = "deserialize_header", skip_serializing_if = "Option::is_none")]
	pub header: Option<usize>,
	/// Opaque options forwarded verbatim to [`crate::Transport::open`].
	#[serde(default)]
	pub config: serde_json::Value,
	/// Milliseconds between discovery ticks.
	#[serde(default = "default_poll_interval")]
	pub poll_interval: u64,
	/// Resume discovery after the active connection closes.
	#[serde(default = "default_reconnect")]
	pub reconnect: bool,
	/// Claim file override; defaults to [`default_claim_file`].
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub claim_file: Option<PathBuf>,
	/// Claim broker socket; when set, claims go through the broker.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub broker: Option<PathBuf>,
}

fn default_poll_interval() -> u64 {
	DEFAULT_POLL_INTERVAL_MS
}

fn default_reconnect() -> bool {
	true
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self {
			signature: Signature::default(),
			header: None,
			config: serde_json::Value::Null,
			poll_interval: DEFAULT_POLL_INTERVAL_MS,
			reconnect: true,
			claim_file: None,
			broker: None,
		}
	}
}

impl EngineOptions {
	/// Loads options from a JSON file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path)?;
		serde_json::from_str(&content).map_err(|err| Error::Config(format!("{}: {err}", path.display())))
	}

	/// Sets the endpoint signature.
	pub fn with_signature(mut self, signature: Signature) -> Self {
		self.signature = signature;
		self
	}

	/// Sets the minimum header length.
	pub fn with_header(mut self, header: usize) -> Self {
		self.header = Some(header);
		self
	}

	/// Sets the transport pass-through options.
	pub fn with_config(mut self, config: serde_json::Value) -> Self {
		self.config = config;
		self
	}

	/// Sets the tick interval.
	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval.as_millis().try_into().unwrap_or(u64::MAX);
		self
	}

	/// Sets the claim file location.
	pub fn with_claim_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.claim_file = Some(path.into());
		self
	}

	/// Routes claims through the broker listening on `socket`.
	pub fn with_broker(mut self, socket: impl Into<PathBuf>) -> Self {
		self.broker = Some(socket.into());
		self
	}

	/// Tick interval as a [`Duration`].
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval)
	}

	/// Effective header threshold; `None` means immediate handoff.
	pub fn header_len(&self) -> Option<usize> {
		self.header.filter(|len| *len > 0)
	}

	/// Effective claim file path.
	pub fn claim_file_path(&self) -> PathBuf {
		self.claim_file.clone().unwrap_or_else(default_claim_file)
	}
}

/// Returns `~/.serialport`, the claim file shared by every instance on the host.
pub fn default_claim_file() -> PathBuf {
	dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(CLAIM_FILE_NAME)
}

/// Returns the claim broker socket path for the current user.
///
/// Uses `$XDG_RUNTIME_DIR/portclaim.sock` if available (already user-permissioned),
/// otherwise falls back to `/tmp/portclaim-{uid}.sock`.
#[cfg(unix)]
pub fn default_broker_socket() -> PathBuf {
	if let Some(runtime_dir) = dirs::runtime_dir() {
		return runtime_dir.join("portclaim.sock");
	}

	let uid = unsafe { libc::getuid() };
	PathBuf::from(format!("/tmp/portclaim-{uid}.sock"))
}

fn deserialize_header<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum HeaderSpec {
		Length(usize),
		Sample(String),
	}

	Ok(match Option::<HeaderSpec>::deserialize(deserializer)? {
		Some(HeaderSpec::Length(len)) => Some(len),
		Some(HeaderSpec::Sample(sample)) => Some(sample.len()),
		None => None,
	})
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn defaults_match_all_with_immediate_handoff() {
		let options: EngineOptions = serde_json::from_str("{}").unwrap();
		assert_eq!(options, EngineOptions::default());
		assert!(options.signature.is_empty());
		assert_eq!(options.header_len(), None);
		assert_eq!(options.poll_interval(), Duration::from_millis(500));
		assert!(options.reconnect);
		assert!(options.claim_file_path().ends_with(".serialport"));
	}

	#[test]
	fn header_accepts_number_or_sample_string() {
		let numeric: EngineOptions = serde_json::from_str(r#"{"header": 5}"#).unwrap();
		assert_eq!(numeric.header_len(), Some(5));

		let sample: EngineOptions = serde_json::from_str(r#"{"header": "HELLO"}"#).unwrap();
		assert_eq!(sample.header_len(), Some(5));

		let zero: EngineOptions = serde_json::from_str(r#"{"header": 0}"#).unwrap();
		assert_eq!(zero.header_len(), None);
	}

	#[test]
	fn config_is_passed_through_untouched() {
		let options: EngineOptions =
			serde_json::from_str(r#"{"config": {"baudRate": 9600, "parser": "readline"}}"#).unwrap();
		assert_eq!(options.config, serde_json::json!({"baudRate": 9600, "parser": "readline"}));
	}

	#[test]
	fn load_reads_camel_case_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("portclaim.json");
		fs::write(
			&path,
			r#"{"signature":{"vendorId":"2341"},"pollInterval":50,"reconnect":false,"claimFile":"/tmp/claims"}"#,
		)
		.unwrap();

		let options = EngineOptions::load(&path).unwrap();
		assert_eq!(options.signature, Signature::any().with("vendorId", "2341"));
		assert_eq!(options.poll_interval(), Duration::from_millis(50));
		assert!(!options.reconnect);
		assert_eq!(options.claim_file_path(), PathBuf::from("/tmp/claims"));
	}

	#[test]
	fn load_reports_malformed_file_as_config_error() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("bad.json");
		fs::write(&path, "{ nope").unwrap();

		let err = EngineOptions::load(&path).unwrap_err();
		assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
	}
}
