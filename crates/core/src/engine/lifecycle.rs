use tracing::{debug, info, trace, warn};

use super::{EngineEvent, EngineTask, Handoff};
use crate::handshake::Progress;

impl EngineTask {
	pub(super) fn on_handshake_data(&mut self, bytes: &[u8]) {
		let Some(active) = self.active.as_mut() else {
			return;
		};
		let Some(handshake) = active.handshake.as_mut() else {
			return;
		};

		match handshake.accumulator.push(bytes) {
			Progress::Accumulating => {
				trace!(
					target = "portclaim.engine",
					path = %active.path,
					buffered = handshake.accumulator.buffered(),
					threshold = handshake.accumulator.threshold(),
					"header incomplete"
				);
			}
			Progress::Complete { header, overflow } => {
				let Some(mut handshake) = active.handshake.take() else {
					return;
				};
				debug!(target = "portclaim.engine", path = %active.path, overflow = overflow.len(), "header complete");
				handshake.connection.unread(overflow);
				self.hand_off(Handoff {
					connection: handshake.connection,
					header: Some(header),
				});
			}
		}
	}

	/// The managed connection closed: release its claim, announce it, and
	/// resume discovery unless reconnecting was disabled.
	pub(super) async fn on_closed(&mut self) {
		let Some(active) = self.active.take() else {
			return;
		};

		let control = self.managed.lock().remove(&active.path);
		if let Some(control) = control {
			if let Err(err) = control.close().await {
				debug!(target = "portclaim.engine", path = %active.path, error = %err, "close after disconnect failed");
			}
		}
		if let Err(err) = self.store.release(&active.path).await {
			warn!(target = "portclaim.engine", path = %active.path, error = %err, "failed to release claim");
		}

		info!(target = "portclaim.engine", path = %active.path, "endpoint disconnected");
		self.emit(EngineEvent::Disconnected { path: active.path });

		if self.reconnect_enabled() {
			self.arm();
		} else {
			debug!(target = "portclaim.engine", "reconnect disabled; discovery stopped");
		}
	}

	/// Cleanup requested through the handle while the engine keeps running.
	///
	/// Every released path is announced like any other disconnect, and
	/// discovery resumes unless reconnecting was disabled.
	pub(super) async fn on_cleanup(&mut self) {
		let released = self.cleanup().await;
		if released.is_empty() {
			return;
		}
		for path in released {
			self.emit(EngineEvent::Disconnected { path });
		}

		if self.reconnect_enabled() {
			self.arm();
		} else {
			debug!(target = "portclaim.engine", "reconnect disabled; discovery stopped");
		}
	}

	/// Closes every managed connection, then releases all claims in one write.
	/// Returns the released paths.
	///
	/// The poll timer is left as it was.
	pub(super) async fn cleanup(&mut self) -> Vec<String> {
		self.active = None;
		let drained = std::mem::take(&mut *self.managed.lock());
		if drained.is_empty() {
			return Vec::new();
		}

		let paths: Vec<String> = drained.keys().cloned().collect();
		for (path, control) in &drained {
			if let Err(err) = control.close().await {
				debug!(target = "portclaim.engine", path = %path, error = %err, "close during cleanup failed");
			}
		}
		if let Err(err) = self.store.release_all(&paths).await {
			warn!(target = "portclaim.engine", error = %err, "failed to release claims");
		}
		info!(target = "portclaim.engine", released = ?paths, "claims released");
		paths
	}
}
