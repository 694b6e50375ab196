//! Exclusive byte-stream handle for one acquired endpoint.
//!
//! A transport builds a [`Connection`] from its write half ([`PortWriter`])
//! and feeds notifications through the paired [`EventSender`]:
//!
//! ```text
//! transport reader ──EventSender──► mpsc ──► Connection::recv ──► consumer
//!                          │
//!                          └──► watch<ConnectionState> ──► ConnectionMonitor (engine)
//! ```
//!
//! The engine keeps only a [`ConnectionControl`], so it learns about close and
//! error notifications even while the consumer owns the handle.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};

use crate::error::{Error, Result};

/// Notification delivered on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
	/// Bytes read from the endpoint.
	Data(Vec<u8>),
	/// The endpoint was closed.
	Close,
	/// The endpoint failed; no further data follows.
	Error(String),
}

/// Per-connection lifecycle.
///
/// `Opening → Handshaking → Active → Closed`; `Handshaking` is skipped when no
/// header is required and any state may jump straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Opening,
	Handshaking,
	Active,
	Closed,
}

/// Write half supplied by a transport.
#[async_trait]
pub trait PortWriter: Send {
	/// Writes all of `data` to the endpoint.
	async fn write(&mut self, data: &[u8]) -> std::io::Result<()>;

	/// Releases the underlying endpoint.
	async fn close(&mut self) -> std::io::Result<()>;
}

struct Shared {
	path: String,
	state: watch::Sender<ConnectionState>,
	writer: Mutex<Option<Box<dyn PortWriter>>>,
}

impl Shared {
	fn mark_closed(&self) {
		self.state.send_if_modified(|state| {
			if *state == ConnectionState::Closed {
				false
			} else {
				*state = ConnectionState::Closed;
				true
			}
		});
	}

	async fn close(&self) -> Result<()> {
		let writer = self.writer.lock().await.take();
		self.mark_closed();
		match writer {
			Some(mut writer) => writer.close().await.map_err(Error::Io),
			None => Ok(()),
		}
	}
}

/// Transport-side producer of [`ConnectionEvent`]s.
#[derive(Clone)]
pub struct EventSender {
	tx: mpsc::UnboundedSender<ConnectionEvent>,
	shared: Arc<Shared>,
}

impl EventSender {
	/// Delivers a chunk of bytes. Returns `false` once the connection is closed.
	pub fn data(&self, bytes: impl Into<Vec<u8>>) -> bool {
		if self.is_closed() {
			return false;
		}
		self.tx.send(ConnectionEvent::Data(bytes.into())).is_ok()
	}

	/// Signals that the endpoint closed.
	pub fn close(&self) {
		if !self.is_closed() {
			let _ = self.tx.send(ConnectionEvent::Close);
		}
		self.shared.mark_closed();
	}

	/// Signals an endpoint failure; the connection is considered closed.
	pub fn error(&self, message: impl Into<String>) {
		if !self.is_closed() {
			let _ = self.tx.send(ConnectionEvent::Error(message.into()));
		}
		self.shared.mark_closed();
	}

	/// Returns true once either side has closed the connection.
	pub fn is_closed(&self) -> bool {
		*self.shared.state.borrow() == ConnectionState::Closed
	}
}

/// Exclusive handle to an open endpoint.
///
/// Dropping the handle marks it [`ConnectionState::Closed`], which releases the
/// claim the engine holds for it.
pub struct Connection {
	shared: Arc<Shared>,
	events: mpsc::UnboundedReceiver<ConnectionEvent>,
	replay: VecDeque<Vec<u8>>,
}

impl Connection {
	/// Creates a connection for `path` in the `Opening` state.
	pub fn new(path: impl Into<String>, writer: Box<dyn PortWriter>) -> (Self, EventSender) {
		let (tx, events) = mpsc::unbounded_channel();
		let (state, _) = watch::channel(ConnectionState::Opening);
		let shared = Arc::new(Shared {
			path: path.into(),
			state,
			writer: Mutex::new(Some(writer)),
		});

		let sender = EventSender {
			tx,
			shared: Arc::clone(&shared),
		};
		let connection = Self {
			shared,
			events,
			replay: VecDeque::new(),
		};
		(connection, sender)
	}

	/// Device path this connection was opened on.
	pub fn path(&self) -> &str {
		&self.shared.path
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ConnectionState {
		*self.shared.state.borrow()
	}

	/// Receives the next notification.
	///
	/// Replayed bytes are delivered first. Returns `None` once the transport
	/// side is gone and every queued event was consumed. Cancel safe.
	pub async fn recv(&mut self) -> Option<ConnectionEvent> {
		if let Some(bytes) = self.replay.pop_front() {
			return Some(ConnectionEvent::Data(bytes));
		}

		match self.events.recv().await {
			Some(event) => Some(event),
			None => {
				self.shared.mark_closed();
				None
			}
		}
	}

	/// Writes `data` to the endpoint.
	pub async fn write(&self, data: &[u8]) -> Result<()> {
		let mut writer = self.shared.writer.lock().await;
		match writer.as_mut() {
			Some(writer) => writer.write(data).await.map_err(Error::Io),
			None => Err(Error::ChannelClosed),
		}
	}

	/// Closes the endpoint. Idempotent.
	pub async fn close(&self) -> Result<()> {
		self.shared.close().await
	}

	/// Queues `bytes` to be delivered as the next [`ConnectionEvent::Data`].
	pub fn unread(&mut self, bytes: Vec<u8>) {
		if !bytes.is_empty() {
			self.replay.push_front(bytes);
		}
	}

	/// Returns a monitor that resolves when this connection closes.
	pub fn monitor(&self) -> ConnectionMonitor {
		ConnectionMonitor {
			state: self.shared.state.subscribe(),
		}
	}

	pub(crate) fn control(&self) -> ConnectionControl {
		ConnectionControl {
			shared: Arc::clone(&self.shared),
		}
	}

	pub(crate) fn set_state(&self, state: ConnectionState) {
		self.shared.state.send_if_modified(|current| {
			if *current == ConnectionState::Closed || *current == state {
				false
			} else {
				*current = state;
				true
			}
		});
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.shared.mark_closed();
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("path", &self.shared.path)
			.field("state", &self.state())
			.field("replay", &self.replay.len())
			.finish()
	}
}

/// Observer that resolves once a connection reaches [`ConnectionState::Closed`].
#[derive(Clone)]
pub struct ConnectionMonitor {
	state: watch::Receiver<ConnectionState>,
}

impl ConnectionMonitor {
	/// Waits until the connection is closed. Cancel safe.
	pub async fn closed(&mut self) {
		let _ = self.state.wait_for(|state| *state == ConnectionState::Closed).await;
	}

	/// Current lifecycle state.
	pub fn state(&self) -> ConnectionState {
		*self.state.borrow()
	}
}

/// Engine-side handle used to force-close a handed-off connection.
#[derive(Clone)]
pub(crate) struct ConnectionControl {
	shared: Arc<Shared>,
}

impl ConnectionControl {
	pub(crate) async fn close(&self) -> Result<()> {
		self.shared.close().await
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::testing::RecordingWriter;

	fn open(path: &str) -> (Connection, EventSender, RecordingWriter) {
		let writer = RecordingWriter::default();
		let (conn, events) = Connection::new(path, Box::new(writer.clone()));
		(conn, events, writer)
	}

	#[tokio::test]
	async fn events_arrive_in_order() {
		let (mut conn, events, _) = open("/dev/ttyUSB0");
		assert!(events.data(b"ab".to_vec()));
		assert!(events.data(b"cd".to_vec()));
		events.close();

		assert_eq!(conn.recv().await, Some(ConnectionEvent::Data(b"ab".to_vec())));
		assert_eq!(conn.recv().await, Some(ConnectionEvent::Data(b"cd".to_vec())));
		assert_eq!(conn.recv().await, Some(ConnectionEvent::Close));
		assert_eq!(conn.state(), ConnectionState::Closed);
	}

	#[tokio::test]
	async fn unread_bytes_come_before_transport_data() {
		let (mut conn, events, _) = open("/dev/ttyUSB0");
		events.data(b"later".to_vec());
		conn.unread(b"first".to_vec());

		assert_eq!(conn.recv().await, Some(ConnectionEvent::Data(b"first".to_vec())));
		assert_eq!(conn.recv().await, Some(ConnectionEvent::Data(b"later".to_vec())));
	}

	#[tokio::test]
	async fn close_is_idempotent_and_closes_writer_once() {
		let (conn, events, writer) = open("/dev/ttyUSB0");
		conn.write(b"ping").await.unwrap();
		conn.close().await.unwrap();
		conn.close().await.unwrap();

		assert_eq!(writer.written(), b"ping".to_vec());
		assert_eq!(writer.close_count(), 1);
		assert!(events.is_closed());
		assert!(!events.data(b"ignored".to_vec()));
		assert!(matches!(conn.write(b"x").await, Err(Error::ChannelClosed)));
	}

	#[tokio::test]
	async fn monitor_sees_transport_error() {
		let (conn, events, _) = open("/dev/ttyUSB0");
		conn.set_state(ConnectionState::Active);
		let mut monitor = conn.monitor();
		assert_eq!(monitor.state(), ConnectionState::Active);

		events.error("device unplugged");
		tokio::time::timeout(Duration::from_secs(1), monitor.closed()).await.unwrap();
	}

	#[tokio::test]
	async fn dropping_the_handle_marks_it_closed() {
		let (conn, _events, _) = open("/dev/ttyUSB0");
		let mut monitor = conn.monitor();
		drop(conn);
		tokio::time::timeout(Duration::from_secs(1), monitor.closed()).await.unwrap();
	}

	#[tokio::test]
	async fn state_cannot_leave_closed() {
		let (conn, events, _) = open("/dev/ttyUSB0");
		events.close();
		conn.set_state(ConnectionState::Active);
		assert_eq!(conn.state(), ConnectionState::Closed);
	}
}
