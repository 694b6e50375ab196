use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use portclaim_protocol::{BrokerRequest, BrokerResponse, ClaimTable};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::claims::{ClaimStore, FileClaimTable};
use crate::error::{Error, Result};

type ClientId = u64;

struct BrokerState {
	/// Claimed path -> owning client.
	owners: BTreeMap<String, ClientId>,
	/// Claim file kept in sync for instances running in file mode.
	mirror: Option<FileClaimTable>,
}

/// Serializes claims for every engine on the host.
///
/// A claim is granted only if no other connected client holds the path, and is
/// released when its client disconnects, however that happens.
pub struct ClaimBroker {
	listener: UnixListener,
	socket: PathBuf,
	state: Arc<Mutex<BrokerState>>,
	shutdown_tx: watch::Sender<bool>,
}

impl ClaimBroker {
	/// Binds `socket`, replacing a stale socket file left by a dead broker.
	///
	/// With `mirror` set, every grant and release is also written to that
	/// claim file.
	pub async fn bind(socket: impl Into<PathBuf>, mirror: Option<FileClaimTable>) -> Result<Self> {
		let socket = socket.into();
		if socket.exists() {
			if UnixStream::connect(&socket).await.is_ok() {
				return Err(Error::Broker {
					code: "already_running".into(),
					message: format!("a claim broker is already listening on {}", socket.display()),
				});
			}
			std::fs::remove_file(&socket)?;
		}
		if let Some(parent) = socket.parent() {
			if !parent.exists() {
				std::fs::create_dir_all(parent)?;
			}
		}

		let listener = UnixListener::bind(&socket)?;
		info!(
			target = "portclaim.broker",
			socket = %socket.display(),
			mirror = ?mirror.as_ref().map(|table| table.path().display().to_string()),
			"claim broker listening"
		);

		let (shutdown_tx, _) = watch::channel(false);
		Ok(Self {
			listener,
			socket,
			state: Arc::new(Mutex::new(BrokerState {
				owners: BTreeMap::new(),
				mirror,
			})),
			shutdown_tx,
		})
	}

	pub fn socket(&self) -> &Path {
		&self.socket
	}

	/// Serves clients until SIGINT, SIGTERM or a shutdown request.
	///
	/// On the way out every outstanding claim is dropped from the mirror and
	/// the socket file is removed.
	pub async fn run(self) -> Result<()> {
		use tokio::signal::unix::{SignalKind, signal};

		let mut sigterm = signal(SignalKind::terminate())?;
		let mut sigint = signal(SignalKind::interrupt())?;
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		let mut next_client: ClientId = 0;

		loop {
			tokio::select! {
				_ = shutdown_rx.changed() => {
					if *shutdown_rx.borrow() {
						info!(target = "portclaim.broker", "shutdown requested via message");
						break;
					}
				}
				_ = sigterm.recv() => {
					info!(target = "portclaim.broker", "received SIGTERM, shutting down");
					break;
				}
				_ = sigint.recv() => {
					info!(target = "portclaim.broker", "received SIGINT, shutting down");
					break;
				}
				accept = self.listener.accept() => {
					let (stream, _) = accept?;
					next_client += 1;
					let client = next_client;
					let state = Arc::clone(&self.state);
					let shutdown_tx = self.shutdown_tx.clone();
					tokio::spawn(async move {
						if let Err(err) = handle_client(stream, client, state, shutdown_tx).await {
							warn!(target = "portclaim.broker", client, error = %err, "broker connection error");
						}
					});
				}
			}
		}

		self.state.lock().await.release_everything().await;
		if let Err(err) = std::fs::remove_file(&self.socket) {
			debug!(target = "portclaim.broker", error = %err, "socket already gone");
		}
		Ok(())
	}
}

async fn handle_client(
	stream: UnixStream,
	client: ClientId,
	state: Arc<Mutex<BrokerState>>,
	shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
	debug!(target = "portclaim.broker", client, "client connected");
	let outcome = serve_client(stream, client, &state, &shutdown_tx).await;

	let released = state.lock().await.release_client(client).await;
	if released.is_empty() {
		debug!(target = "portclaim.broker", client, "client disconnected");
	} else {
		info!(target = "portclaim.broker", client, released = ?released, "client disconnected; claims released");
	}
	outcome
}

async fn serve_client(
	stream: UnixStream,
	client: ClientId,
	state: &Mutex<BrokerState>,
	shutdown_tx: &watch::Sender<bool>,
) -> Result<()> {
	let (read_half, mut write_half) = stream.into_split();
	let mut reader = BufReader::new(read_half);
	let mut line = String::new();

	loop {
		line.clear();
		if reader.read_line(&mut line).await? == 0 {
			return Ok(());
		}

		let response = match serde_json::from_str::<BrokerRequest>(line.trim_end()) {
			Ok(request) => handle_request(state, client, request, shutdown_tx).await,
			Err(err) => BrokerResponse::Error {
				code: "invalid_request".to_string(),
				message: err.to_string(),
			},
		};
		write_response(&mut write_half, &response).await?;
	}
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &BrokerResponse) -> Result<()> {
	let mut payload = serde_json::to_string(response)?;
	payload.push('\n');
	writer.write_all(payload.as_bytes()).await?;
	writer.flush().await?;
	Ok(())
}

async fn handle_request(
	state: &Mutex<BrokerState>,
	client: ClientId,
	request: BrokerRequest,
	shutdown_tx: &watch::Sender<bool>,
) -> BrokerResponse {
	match request {
		BrokerRequest::Ping => BrokerResponse::Pong,
		BrokerRequest::List => BrokerResponse::Claims {
			table: state.lock().await.snapshot().await,
		},
		BrokerRequest::Claim { path } => {
			let granted = state.lock().await.claim(client, &path).await;
			BrokerResponse::Claim { path, granted }
		}
		BrokerRequest::Release { path } => {
			let mut state = state.lock().await;
			if matches!(state.owners.get(&path), Some(owner) if *owner != client) {
				return BrokerResponse::Error {
					code: "not_owner".into(),
					message: format!("{path} is claimed by another client"),
				};
			}
			state.release(client, vec![path]).await;
			BrokerResponse::Ok
		}
		BrokerRequest::ReleaseAll { paths } => {
			state.lock().await.release(client, paths).await;
			BrokerResponse::Ok
		}
		BrokerRequest::Shutdown => {
			let _ = shutdown_tx.send(true);
			BrokerResponse::Ok
		}
	}
}

impl BrokerState {
	/// Mirror file contents overlaid with live grants.
	async fn snapshot(&self) -> ClaimTable {
		let mut table = match &self.mirror {
			Some(mirror) => mirror.load().await,
			None => ClaimTable::new(),
		};
		for path in self.owners.keys() {
			table.insert(path.as_str());
		}
		table
	}

	async fn claim(&mut self, client: ClientId, path: &str) -> bool {
		match self.owners.get(path) {
			Some(owner) => return *owner == client,
			None => {
				self.owners.insert(path.to_string(), client);
			}
		}
		debug!(target = "portclaim.broker", client, path, "claim granted");

		if let Some(mirror) = &self.mirror {
			if let Err(err) = mirror.claim(path).await {
				warn!(target = "portclaim.broker", path, error = %err, "failed to mirror claim");
			}
		}
		true
	}

	/// Drops the listed paths this client owns; others are left alone.
	async fn release(&mut self, client: ClientId, paths: Vec<String>) -> Vec<String> {
		let released: Vec<String> = paths
			.into_iter()
			.filter(|path| self.owners.get(path) == Some(&client))
			.collect();
		for path in &released {
			self.owners.remove(path);
		}
		self.mirror_release(&released).await;
		released
	}

	async fn release_client(&mut self, client: ClientId) -> Vec<String> {
		let owned = self
			.owners
			.iter()
			.filter(|(_, owner)| **owner == client)
			.map(|(path, _)| path.clone())
			.collect();
		self.release(client, owned).await
	}

	async fn release_everything(&mut self) {
		let paths: Vec<String> = std::mem::take(&mut self.owners).into_keys().collect();
		self.mirror_release(&paths).await;
	}

	async fn mirror_release(&self, paths: &[String]) {
		if paths.is_empty() {
			return;
		}
		if let Some(mirror) = &self.mirror {
			if let Err(err) = mirror.release_all(paths).await {
				warn!(target = "portclaim.broker", error = %err, "failed to mirror release");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tempfile::TempDir;
	use tokio::task::JoinHandle;

	use super::*;
	use crate::broker::BrokerClient;

	async fn start(dir: &TempDir, mirror: bool) -> (PathBuf, JoinHandle<Result<()>>) {
		let socket = dir.path().join("broker.sock");
		let mirror = mirror.then(|| FileClaimTable::new(dir.path().join(".serialport")));
		let broker = ClaimBroker::bind(&socket, mirror).await.unwrap();
		(socket, tokio::spawn(broker.run()))
	}

	async fn claim(client: &mut BrokerClient, path: &str) -> bool {
		match client.request(&BrokerRequest::Claim { path: path.into() }).await.unwrap() {
			BrokerResponse::Claim { granted, .. } => granted,
			other => panic!("unexpected response: {other:?}"),
		}
	}

	async fn list(client: &mut BrokerClient) -> ClaimTable {
		match client.request(&BrokerRequest::List).await.unwrap() {
			BrokerResponse::Claims { table } => table,
			other => panic!("unexpected response: {other:?}"),
		}
	}

	#[tokio::test]
	async fn claim_is_compare_and_set() {
		let dir = TempDir::new().unwrap();
		let (socket, _broker) = start(&dir, false).await;
		let mut a = BrokerClient::connect(&socket).await.unwrap();
		let mut b = BrokerClient::connect(&socket).await.unwrap();

		assert!(claim(&mut a, "/dev/ttyUSB0").await);
		assert!(!claim(&mut b, "/dev/ttyUSB0").await);
		assert!(claim(&mut a, "/dev/ttyUSB0").await, "re-claim by the owner is granted");
		assert!(claim(&mut b, "/dev/ttyUSB1").await);
		assert!(list(&mut a).await.contains("/dev/ttyUSB1"));
	}

	#[tokio::test]
	async fn disconnect_releases_claims() {
		let dir = TempDir::new().unwrap();
		let (socket, _broker) = start(&dir, true).await;
		let mut a = BrokerClient::connect(&socket).await.unwrap();
		let mut b = BrokerClient::connect(&socket).await.unwrap();

		assert!(claim(&mut a, "/dev/ttyUSB0").await);
		drop(a);

		tokio::time::timeout(Duration::from_secs(2), async {
			while !claim(&mut b, "/dev/ttyUSB0").await {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.unwrap();
	}

	#[tokio::test]
	async fn release_of_foreign_claim_is_refused() {
		let dir = TempDir::new().unwrap();
		let (socket, _broker) = start(&dir, false).await;
		let mut a = BrokerClient::connect(&socket).await.unwrap();
		let mut b = BrokerClient::connect(&socket).await.unwrap();

		assert!(claim(&mut a, "/dev/ttyUSB0").await);
		let err = b
			.request(&BrokerRequest::Release {
				path: "/dev/ttyUSB0".into(),
			})
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Broker { ref code, .. } if code == "not_owner"), "unexpected error: {err}");

		// Releasing something nobody holds is a no-op.
		let response = b
			.request(&BrokerRequest::Release {
				path: "/dev/ttyACM0".into(),
			})
			.await
			.unwrap();
		assert_eq!(response, BrokerResponse::Ok);
	}

	#[tokio::test]
	async fn mirror_tracks_grants_and_foreign_entries() {
		let dir = TempDir::new().unwrap();
		let mirror = FileClaimTable::new(dir.path().join(".serialport"));
		mirror.write(&["/dev/ttyS9"].into_iter().collect()).unwrap();

		let (socket, _broker) = start(&dir, true).await;
		let mut client = BrokerClient::connect(&socket).await.unwrap();

		assert!(claim(&mut client, "/dev/ttyUSB0").await);
		assert!(mirror.read().contains("/dev/ttyUSB0"));

		let table = list(&mut client).await;
		assert!(table.contains("/dev/ttyS9"), "file-mode claims are visible to broker clients");
		assert!(table.contains("/dev/ttyUSB0"));

		client
			.request(&BrokerRequest::ReleaseAll {
				paths: vec!["/dev/ttyUSB0".into(), "/dev/ttyS9".into()],
			})
			.await
			.unwrap();
		let table = mirror.read();
		assert!(!table.contains("/dev/ttyUSB0"));
		assert!(table.contains("/dev/ttyS9"), "only owned paths are released");
	}

	#[tokio::test]
	async fn shutdown_request_stops_and_cleans_up() {
		let dir = TempDir::new().unwrap();
		let (socket, broker) = start(&dir, true).await;
		let mut client = BrokerClient::connect(&socket).await.unwrap();
		assert!(claim(&mut client, "/dev/ttyUSB0").await);

		assert_eq!(client.request(&BrokerRequest::Shutdown).await.unwrap(), BrokerResponse::Ok);
		tokio::time::timeout(Duration::from_secs(2), broker)
			.await
			.unwrap()
			.unwrap()
			.unwrap();

		assert!(!socket.exists());
		assert!(!FileClaimTable::new(dir.path().join(".serialport")).read().contains("/dev/ttyUSB0"));
	}

	#[tokio::test]
	async fn second_broker_on_live_socket_is_refused() {
		let dir = TempDir::new().unwrap();
		let (socket, _broker) = start(&dir, false).await;
		let err = ClaimBroker::bind(&socket, None).await.err().unwrap();
		assert!(matches!(err, Error::Broker { ref code, .. } if code == "already_running"));
	}

	#[tokio::test]
	async fn stale_socket_file_is_replaced() {
		let dir = TempDir::new().unwrap();
		let socket = dir.path().join("broker.sock");
		std::fs::write(&socket, b"").unwrap();
		let broker = ClaimBroker::bind(&socket, None).await.unwrap();
		assert_eq!(broker.socket(), socket.as_path());
	}

	#[tokio::test]
	async fn garbage_lines_get_an_error_response() {
		let dir = TempDir::new().unwrap();
		let (socket, _broker) = start(&dir, false).await;
		let mut stream = UnixStream::connect(&socket).await.unwrap();
		stream.write_all(b"not json\n").await.unwrap();

		let mut reader = BufReader::new(stream);
		let mut line = String::new();
		reader.read_line(&mut line).await.unwrap();
		let response: BrokerResponse = serde_json::from_str(line.trim_end()).unwrap();
		assert!(matches!(response, BrokerResponse::Error { ref code, .. } if code == "invalid_request"));
	}
}
