//! Claim broker: a single process that owns the claim table.
//!
//! Clients talk newline-delimited JSON ([`BrokerRequest`] / [`BrokerResponse`])
//! over a unix socket and keep their connection open for as long as they hold
//! claims.

mod server;

use std::io;
use std::path::Path;

use portclaim_protocol::{BrokerRequest, BrokerResponse};
pub use server::ClaimBroker;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::trace;

use crate::error::{Error, Result};

/// One persistent connection to a [`ClaimBroker`].
///
/// Claims granted through a client belong to it; dropping the client releases
/// them on the broker side.
#[derive(Debug)]
pub struct BrokerClient {
	reader: BufReader<OwnedReadHalf>,
	writer: OwnedWriteHalf,
	line: String,
}

impl BrokerClient {
	/// Connects to the broker listening on `socket`.
	pub async fn connect(socket: &Path) -> Result<Self> {
		let stream = UnixStream::connect(socket).await.map_err(|err| {
			if is_not_running(&err) {
				Error::BrokerUnavailable(socket.display().to_string())
			} else {
				Error::Io(err)
			}
		})?;
		let (read_half, writer) = stream.into_split();
		Ok(Self {
			reader: BufReader::new(read_half),
			writer,
			line: String::new(),
		})
	}

	/// Sends one request and waits for its response.
	///
	/// A [`BrokerResponse::Error`] is returned as [`Error::Broker`].
	pub async fn request(&mut self, request: &BrokerRequest) -> Result<BrokerResponse> {
		let mut payload = serde_json::to_string(request)?;
		payload.push('\n');
		self.writer.write_all(payload.as_bytes()).await?;
		self.writer.flush().await?;

		self.line.clear();
		let read = self.reader.read_line(&mut self.line).await?;
		if read == 0 {
			return Err(Error::BrokerUnavailable("broker closed the connection".into()));
		}
		trace!(target = "portclaim.broker", response = %self.line.trim_end(), "broker response");

		match serde_json::from_str(self.line.trim_end())? {
			BrokerResponse::Error { code, message } => Err(Error::Broker { code, message }),
			response => Ok(response),
		}
	}
}

/// Returns true when `err` means nothing is listening on the socket.
pub(crate) fn is_not_running(err: &io::Error) -> bool {
	matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused)
}

pub(crate) fn unexpected(response: BrokerResponse) -> Error {
	Error::Broker {
		code: "unexpected_response".into(),
		message: format!("{response:?}"),
	}
}
