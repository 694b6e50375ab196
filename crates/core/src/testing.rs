//! In-memory doubles for driving the engine without hardware.
//!
//! Used by this crate's unit tests and by the integration tests under
//! `tests/`.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use portclaim_protocol::{ClaimTable, EndpointDescriptor};
use tokio::sync::Notify;

use crate::claims::ClaimStore;
use crate::connection::{Connection, EventSender, PortWriter};
use crate::error::{Error, Result};
use crate::transport::{EndpointLister, Transport};

#[derive(Debug, Default)]
struct Recording {
	written: Vec<u8>,
	closes: usize,
}

/// [`PortWriter`] that records writes and close calls.
#[derive(Debug, Clone, Default)]
pub struct RecordingWriter {
	inner: Arc<Mutex<Recording>>,
}

impl RecordingWriter {
	/// Every byte written so far.
	pub fn written(&self) -> Vec<u8> {
		self.inner.lock().written.clone()
	}

	/// How many times the writer was closed.
	pub fn close_count(&self) -> usize {
		self.inner.lock().closes
	}
}

#[async_trait]
impl PortWriter for RecordingWriter {
	async fn write(&mut self, data: &[u8]) -> io::Result<()> {
		self.inner.lock().written.extend_from_slice(data);
		Ok(())
	}

	async fn close(&mut self) -> io::Result<()> {
		self.inner.lock().closes += 1;
		Ok(())
	}
}

#[derive(Debug, Default)]
struct ListerState {
	endpoints: Vec<EndpointDescriptor>,
	failing: bool,
	calls: usize,
}

/// [`EndpointLister`] returning a settable endpoint set.
#[derive(Debug, Clone, Default)]
pub struct MockLister {
	inner: Arc<Mutex<ListerState>>,
}

impl MockLister {
	pub fn new(endpoints: Vec<EndpointDescriptor>) -> Self {
		let lister = Self::default();
		lister.set_endpoints(endpoints);
		lister
	}

	/// Convenience for endpoints without attributes.
	pub fn with_paths<I, S>(paths: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::new(paths.into_iter().map(EndpointDescriptor::new).collect())
	}

	pub fn set_endpoints(&self, endpoints: Vec<EndpointDescriptor>) {
		self.inner.lock().endpoints = endpoints;
	}

	/// Makes every subsequent listing fail until reset.
	pub fn set_failing(&self, failing: bool) {
		self.inner.lock().failing = failing;
	}

	/// Number of listings performed.
	pub fn calls(&self) -> usize {
		self.inner.lock().calls
	}
}

#[async_trait]
impl EndpointLister for MockLister {
	async fn list(&self) -> Result<Vec<EndpointDescriptor>> {
		let mut state = self.inner.lock();
		state.calls += 1;
		if state.failing {
			return Err(Error::Listing("mock listing failure".into()));
		}
		Ok(state.endpoints.clone())
	}
}

/// Transport-side view of a connection opened through [`MockTransport`].
#[derive(Clone)]
pub struct MockPort {
	/// Feeds data/close/error notifications to the connection.
	pub events: EventSender,
	/// Everything the consumer wrote.
	pub writer: RecordingWriter,
}

#[derive(Default)]
struct TransportState {
	opens: Vec<String>,
	busy: BTreeSet<String>,
	ports: BTreeMap<String, MockPort>,
}

/// [`Transport`] whose connections are driven by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
	inner: Arc<Mutex<TransportState>>,
	opened: Arc<Notify>,
}

impl MockTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes opens of `path` fail as if another process held it.
	pub fn set_busy(&self, path: &str, busy: bool) {
		let mut state = self.inner.lock();
		if busy {
			state.busy.insert(path.to_string());
		} else {
			state.busy.remove(path);
		}
	}

	/// Every open attempt, in order, including failed ones.
	pub fn opens(&self) -> Vec<String> {
		self.inner.lock().opens.clone()
	}

	/// Paths whose most recent connection is still open.
	pub fn live(&self) -> Vec<String> {
		self.inner
			.lock()
			.ports
			.iter()
			.filter(|(_, port)| !port.events.is_closed())
			.map(|(path, _)| path.clone())
			.collect()
	}

	/// The most recent connection opened on `path`.
	pub fn port(&self, path: &str) -> Option<MockPort> {
		self.inner.lock().ports.get(path).cloned()
	}

	/// Waits until an open of `path` has succeeded.
	pub async fn wait_for_port(&self, path: &str) -> MockPort {
		loop {
			let notified = self.opened.notified();
			if let Some(port) = self.port(path) {
				return port;
			}
			notified.await;
		}
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn open(&self, path: &str, _options: &serde_json::Value) -> Result<Connection> {
		let connection = {
			let mut state = self.inner.lock();
			state.opens.push(path.to_string());
			if state.busy.contains(path) {
				return Err(Error::open(path, io::Error::from(io::ErrorKind::ResourceBusy)));
			}

			let writer = RecordingWriter::default();
			let (connection, events) = Connection::new(path, Box::new(writer.clone()));
			state.ports.insert(path.to_string(), MockPort { events, writer });
			connection
		};
		self.opened.notify_waiters();
		Ok(connection)
	}
}

#[derive(Debug, Default)]
struct StoreState {
	table: ClaimTable,
	refused: BTreeSet<String>,
	blocking_releases: Vec<String>,
}

/// Compare-and-set [`ClaimStore`] held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryClaimStore {
	inner: Arc<Mutex<StoreState>>,
}

impl MemoryClaimStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Refuses future claims of `path` while still reporting it unclaimed,
	/// as if another instance won the race between load and claim.
	pub fn refuse(&self, path: &str) {
		self.inner.lock().refused.insert(path.to_string());
	}

	/// Snapshot of the table.
	pub fn table(&self) -> ClaimTable {
		self.inner.lock().table.clone()
	}

	/// Paths released through [`ClaimStore::release_all_blocking`].
	pub fn blocking_releases(&self) -> Vec<String> {
		self.inner.lock().blocking_releases.clone()
	}
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
	async fn load(&self) -> ClaimTable {
		self.table()
	}

	async fn claim(&self, path: &str) -> Result<bool> {
		let mut state = self.inner.lock();
		if state.refused.contains(path) {
			return Ok(false);
		}
		Ok(state.table.insert(path))
	}

	async fn release(&self, path: &str) -> Result<()> {
		self.inner.lock().table.remove(path);
		Ok(())
	}

	async fn release_all(&self, paths: &[String]) -> Result<()> {
		self.inner.lock().table.remove_all(paths.iter().map(String::as_str));
		Ok(())
	}

	fn release_all_blocking(&self, paths: &[String]) {
		let mut state = self.inner.lock();
		state.table.remove_all(paths.iter().map(String::as_str));
		state.blocking_releases.extend(paths.iter().cloned());
	}
}
