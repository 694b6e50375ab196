//! Drives the `portclaim` binary against a scratch claim file.

use std::path::Path;
use std::process::Command;

use serde_json::{Value, json};
use tempfile::TempDir;

fn portclaim(args: &[&str], claim_file: &Path) -> (Value, String, bool) {
	let output = Command::new(env!("CARGO_BIN_EXE_portclaim"))
		.args(args)
		.arg("--claim-file")
		.arg(claim_file)
		.output()
		.expect("failed to execute portclaim");

	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	let parsed = serde_json::from_str::<Value>(&stdout).unwrap_or_else(|_| json!({ "raw": stdout }));
	(parsed, stderr, output.status.success())
}

#[test]
fn claims_prints_the_table() {
	let dir = TempDir::new().unwrap();
	let claim_file = dir.path().join(".serialport");
	std::fs::write(&claim_file, r#"{"/dev/ttyUSB0":true}"#).unwrap();

	let (table, stderr, ok) = portclaim(&["claims"], &claim_file);
	assert!(ok, "claims failed: {stderr}");
	assert_eq!(table, json!({"/dev/ttyUSB0": true}));
}

#[test]
fn claims_tolerates_a_malformed_file() {
	let dir = TempDir::new().unwrap();
	let claim_file = dir.path().join(".serialport");
	std::fs::write(&claim_file, "][").unwrap();

	let (table, stderr, ok) = portclaim(&["claims"], &claim_file);
	assert!(ok, "claims failed: {stderr}");
	assert_eq!(table, json!({}));
}

#[test]
fn release_drops_stale_entries() {
	let dir = TempDir::new().unwrap();
	let claim_file = dir.path().join(".serialport");
	std::fs::write(&claim_file, r#"{"/dev/ttyUSB0":true,"/dev/ttyACM0":true}"#).unwrap();

	let (report, stderr, ok) = portclaim(&["release", "/dev/ttyUSB0", "/dev/ttyS3"], &claim_file);
	assert!(ok, "release failed: {stderr}");
	assert_eq!(report["released"], json!(["/dev/ttyUSB0"]));

	let (table, _, _) = portclaim(&["claims"], &claim_file);
	assert_eq!(table, json!({"/dev/ttyACM0": true}));
}
