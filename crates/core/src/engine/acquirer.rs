use portclaim_protocol::EndpointDescriptor;
use tracing::{debug, info, trace, warn};

use super::{Active, EngineEvent, EngineTask, Handoff, Handshake};
use crate::connection::ConnectionState;
use crate::handshake::HeaderAccumulator;

impl EngineTask {
	/// One discovery pass.
	///
	/// Candidates are tried strictly one after another, last listed first.
	/// The timer stays suspended if a connection was acquired and is re-armed
	/// otherwise.
	pub(super) async fn tick(&mut self) {
		self.emit(EngineEvent::Searching);

		let endpoints = match self.lister.list().await {
			Ok(endpoints) if !endpoints.is_empty() => endpoints,
			Ok(_) => {
				trace!(target = "portclaim.engine", "no endpoints listed");
				self.arm();
				return;
			}
			Err(err) => {
				debug!(target = "portclaim.engine", error = %err, "listing failed; skipping tick");
				self.arm();
				return;
			}
		};

		let candidates: Vec<EndpointDescriptor> = endpoints
			.into_iter()
			.filter(|endpoint| self.options.signature.matches(endpoint))
			.collect();
		trace!(target = "portclaim.engine", matched = candidates.len(), "endpoints matched");

		if self.consumer.is_some() && !candidates.is_empty() {
			let claims = self.store.load().await;
			for endpoint in candidates.iter().rev() {
				if claims.contains(&endpoint.path) {
					trace!(target = "portclaim.engine", path = %endpoint.path, "already claimed");
					continue;
				}
				if self.acquire(&endpoint.path).await {
					return;
				}
			}
		}

		self.arm();
	}

	/// Opens and claims `path`. Returns true when the connection is now managed.
	async fn acquire(&mut self, path: &str) -> bool {
		let connection = match self.transport.open(path, &self.options.config).await {
			Ok(connection) => connection,
			Err(err) => {
				debug!(target = "portclaim.engine", path, busy = err.is_busy(), error = %err, "open failed");
				return false;
			}
		};

		match self.store.claim(path).await {
			Ok(true) => {}
			Ok(false) => {
				info!(target = "portclaim.engine", path, "claim refused; endpoint owned elsewhere");
				let _ = connection.close().await;
				return false;
			}
			Err(err) => {
				warn!(target = "portclaim.engine", path, error = %err, "failed to record claim");
				let _ = connection.close().await;
				return false;
			}
		}

		self.managed.lock().insert(path.to_string(), connection.control());
		let monitor = connection.monitor();
		info!(target = "portclaim.engine", path, "endpoint acquired");

		match self.options.header_len() {
			Some(threshold) => {
				connection.set_state(ConnectionState::Handshaking);
				self.active = Some(Active {
					path: path.to_string(),
					monitor,
					handshake: Some(Handshake {
						connection,
						accumulator: HeaderAccumulator::new(threshold),
					}),
				});
			}
			None => {
				self.active = Some(Active {
					path: path.to_string(),
					monitor,
					handshake: None,
				});
				self.hand_off(Handoff {
					connection,
					header: None,
				});
			}
		}
		true
	}

	/// Marks the connection active, announces it and passes it on.
	pub(super) fn hand_off(&self, handoff: Handoff) {
		handoff.connection.set_state(ConnectionState::Active);
		let path = handoff.connection.path().to_string();
		self.emit(EngineEvent::Connected { path });

		if let Some(consumer) = &self.consumer {
			consumer(handoff);
		}
	}
}
