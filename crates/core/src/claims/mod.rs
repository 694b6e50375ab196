//! Cross-process claim arbitration.
//!
//! Two stores implement [`ClaimStore`]:
//!
//! - [`FileClaimTable`]: advisory. Every instance reads and rewrites the same
//!   JSON file; two instances racing on one path can both see it unclaimed,
//!   so the exclusive open remains the final arbiter.
//! - [`BrokerClaimStore`]: race-free. A single [`crate::broker::ClaimBroker`]
//!   owns the table and grants claims with compare-and-set semantics. Claims
//!   die with the client's socket.

mod file;
#[cfg(unix)]
mod broker;

use std::sync::Arc;

use async_trait::async_trait;
use portclaim_protocol::ClaimTable;

use crate::config::EngineOptions;
use crate::error::Result;

#[cfg(unix)]
pub use broker::BrokerClaimStore;
pub use file::FileClaimTable;

/// Builds the store `options` ask for: the broker when a socket is
/// configured, the claim file otherwise.
pub async fn open_store(options: &EngineOptions) -> Result<Arc<dyn ClaimStore>> {
	#[cfg(unix)]
	{
		if let Some(socket) = &options.broker {
			return Ok(Arc::new(BrokerClaimStore::connect(socket.clone()).await?));
		}
	}
	Ok(Arc::new(FileClaimTable::new(options.claim_file_path())))
}

/// Shared record of which endpoint paths are claimed.
#[async_trait]
pub trait ClaimStore: Send + Sync {
	/// Reads the current table. Never fails: unreadable state is logged and
	/// treated as empty.
	async fn load(&self) -> ClaimTable;

	/// Records a claim on `path` for this instance.
	///
	/// Returns `false` when the store knows someone else owns `path`.
	async fn claim(&self, path: &str) -> Result<bool>;

	/// Drops this instance's claim on `path`.
	async fn release(&self, path: &str) -> Result<()>;

	/// Drops this instance's claims on every listed path in one write.
	async fn release_all(&self, paths: &[String]) -> Result<()>;

	/// Synchronous variant of [`ClaimStore::release_all`] for contexts that
	/// cannot await, such as a panic hook.
	fn release_all_blocking(&self, _paths: &[String]) {}
}
