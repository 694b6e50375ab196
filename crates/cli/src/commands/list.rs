use anyhow::{Context, Result};
use portclaim::{EndpointLister, Signature, SysfsLister};

use super::print_json;

pub async fn run(signature: Vec<(String, String)>) -> Result<()> {
	let signature: Signature = signature.into_iter().collect();
	let endpoints: Vec<_> = SysfsLister::new()
		.list()
		.await
		.context("Failed to list endpoints")?
		.into_iter()
		.filter(|endpoint| signature.matches(endpoint))
		.collect();
	print_json(&serde_json::to_value(&endpoints)?)
}
