use std::path::{Path, PathBuf};

use async_trait::async_trait;
use portclaim_protocol::{BrokerRequest, BrokerResponse, ClaimTable};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ClaimStore;
use crate::broker::{BrokerClient, unexpected};
use crate::error::{Error, Result};

/// Claims arbitrated by a [`crate::broker::ClaimBroker`].
///
/// Holds one connection for the life of the store. If that connection breaks,
/// the broker has already dropped its claims; the next request reconnects.
/// There is no blocking release: a dying process closes its socket, which
/// releases everything it held.
#[derive(Debug)]
pub struct BrokerClaimStore {
	socket: PathBuf,
	client: Mutex<Option<BrokerClient>>,
}

impl BrokerClaimStore {
	/// Connects now and checks the broker answers.
	pub async fn connect(socket: impl Into<PathBuf>) -> Result<Self> {
		let socket = socket.into();
		let mut client = BrokerClient::connect(&socket).await?;
		match client.request(&BrokerRequest::Ping).await? {
			BrokerResponse::Pong => {}
			other => return Err(unexpected(other)),
		}
		debug!(target = "portclaim.claims", socket = %socket.display(), "connected to claim broker");
		Ok(Self {
			socket,
			client: Mutex::new(Some(client)),
		})
	}

	pub fn socket(&self) -> &Path {
		&self.socket
	}

	async fn request(&self, request: BrokerRequest) -> Result<BrokerResponse> {
		let mut guard = self.client.lock().await;
		if guard.is_none() {
			*guard = Some(BrokerClient::connect(&self.socket).await?);
		}
		let Some(client) = guard.as_mut() else {
			return Err(Error::BrokerUnavailable(self.socket.display().to_string()));
		};

		match client.request(&request).await {
			Ok(response) => Ok(response),
			Err(err @ Error::Broker { .. }) => Err(err),
			Err(err) => {
				*guard = None;
				Err(err)
			}
		}
	}
}

#[async_trait]
impl ClaimStore for BrokerClaimStore {
	async fn load(&self) -> ClaimTable {
		match self.request(BrokerRequest::List).await {
			Ok(BrokerResponse::Claims { table }) => table,
			Ok(other) => {
				warn!(target = "portclaim.claims", response = ?other, "unexpected broker response");
				ClaimTable::new()
			}
			Err(err) => {
				warn!(target = "portclaim.claims", error = %err, "claim broker unreachable; treating table as empty");
				ClaimTable::new()
			}
		}
	}

	async fn claim(&self, path: &str) -> Result<bool> {
		match self.request(BrokerRequest::Claim { path: path.to_string() }).await? {
			BrokerResponse::Claim { granted, .. } => Ok(granted),
			other => Err(unexpected(other)),
		}
	}

	async fn release(&self, path: &str) -> Result<()> {
		match self.request(BrokerRequest::Release { path: path.to_string() }).await? {
			BrokerResponse::Ok => Ok(()),
			other => Err(unexpected(other)),
		}
	}

	async fn release_all(&self, paths: &[String]) -> Result<()> {
		match self.request(BrokerRequest::ReleaseAll { paths: paths.to_vec() }).await? {
			BrokerResponse::Ok => Ok(()),
			other => Err(unexpected(other)),
		}
	}
}
