//! Seams to the byte-stream transport and the endpoint enumerator.

use async_trait::async_trait;
use portclaim_protocol::EndpointDescriptor;

use crate::connection::Connection;
use crate::error::Result;

/// Opens endpoints as exclusive byte streams.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Opens `path` with the caller's pass-through `options`.
	///
	/// Resolves once the endpoint reported open. A synchronous failure and an
	/// error notification before open both surface as `Err`.
	async fn open(&self, path: &str, options: &serde_json::Value) -> Result<Connection>;
}

/// Placeholder used where no tty transport exists.
#[cfg(not(unix))]
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

#[cfg(not(unix))]
#[async_trait]
impl Transport for Unsupported {
	async fn open(&self, path: &str, _options: &serde_json::Value) -> Result<Connection> {
		Err(crate::error::Error::open(path, std::io::ErrorKind::Unsupported.into()))
	}
}

/// Enumerates the endpoints currently present on the host.
#[async_trait]
pub trait EndpointLister: Send + Sync {
	/// Returns the current descriptor set in listing order.
	async fn list(&self) -> Result<Vec<EndpointDescriptor>>;
}
