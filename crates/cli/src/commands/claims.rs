use std::path::PathBuf;

use anyhow::{Context, Result};
use portclaim::config::default_claim_file;
use portclaim::{BrokerClaimStore, ClaimStore, FileClaimTable};
use serde_json::json;

use super::print_json;

pub async fn show(claim_file: Option<PathBuf>, broker: Option<PathBuf>) -> Result<()> {
	let table = match broker {
		Some(socket) => BrokerClaimStore::connect(&socket)
			.await
			.with_context(|| format!("Failed to reach claim broker at {}", socket.display()))?
			.load()
			.await,
		None => FileClaimTable::new(claim_file.unwrap_or_else(default_claim_file)).read(),
	};
	print_json(&serde_json::to_value(&table)?)
}

pub fn release(paths: Vec<String>, claim_file: Option<PathBuf>) -> Result<()> {
	let table = FileClaimTable::new(claim_file.unwrap_or_else(default_claim_file));
	let released = remove_entries(&table, &paths)
		.with_context(|| format!("Failed to update {}", table.path().display()))?;
	print_json(&json!({
		"claimFile": table.path().display().to_string(),
		"released": released,
	}))
}

/// Removes `paths` and returns the ones that were actually present.
fn remove_entries(table: &FileClaimTable, paths: &[String]) -> portclaim::Result<Vec<String>> {
	table.update(|claims| {
		paths
			.iter()
			.filter(|path| claims.remove(path))
			.cloned()
			.collect()
	})
}
