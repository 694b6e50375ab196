use std::path::PathBuf;

use anyhow::{Context, Result};
use portclaim::broker::ClaimBroker;
use portclaim::config::{default_broker_socket, default_claim_file};
use portclaim::FileClaimTable;
use tracing::info;

pub async fn run(socket: Option<PathBuf>, claim_file: Option<PathBuf>, no_mirror: bool) -> Result<()> {
	let socket = socket.unwrap_or_else(default_broker_socket);
	let mirror = (!no_mirror).then(|| FileClaimTable::new(claim_file.unwrap_or_else(default_claim_file)));

	let broker = ClaimBroker::bind(&socket, mirror)
		.await
		.with_context(|| format!("Failed to start claim broker on {}", socket.display()))?;
	broker.run().await.context("Claim broker failed")?;
	info!(target = "portclaim.broker", "claim broker stopped");
	Ok(())
}
