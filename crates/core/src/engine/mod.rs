//! The acquisition engine.
//!
//! One tokio task owns all mutable engine state and multiplexes four inputs:
//! handle commands, the poll timer, bytes of a connection that is still
//! handshaking, and the close notification of the managed connection.
//!
//! ```text
//! timer ──► tick: list → match → load claims → open/claim (reverse order)
//!                                                  │
//!                         header configured? ──────┤
//!                          yes: Handshaking        no: Active ──► consumer
//!                          bytes ≥ threshold ──────────► Active ──► consumer
//!
//! connection closed ──► release claim ──► Disconnected ──► re-arm timer
//! ```

mod acquirer;
mod lifecycle;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::claims::{ClaimStore, FileClaimTable};
use crate::config::EngineOptions;
use crate::connection::{Connection, ConnectionControl, ConnectionEvent, ConnectionMonitor};
use crate::handshake::HeaderAccumulator;
use crate::lister::SysfsLister;
use crate::transport::{EndpointLister, Transport};

const EVENT_CAPACITY: usize = 64;

/// What the consumer receives for each acquired connection.
#[derive(Debug)]
pub struct Handoff {
	pub connection: Connection,
	/// The first `header` bytes, when a header length was configured.
	pub header: Option<Vec<u8>>,
}

/// Callback invoked once per acquired connection.
pub type Consumer = Arc<dyn Fn(Handoff) + Send + Sync>;

/// Lifecycle notifications broadcast by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
	/// A discovery tick started.
	Searching,
	/// A connection was handed to the consumer.
	Connected { path: String },
	/// A managed connection closed and its claim was released.
	Disconnected { path: String },
}

/// Whether [`EngineHandle::cleanup`] terminates the process afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
	/// Exit with status 0 once claims are released.
	Exit,
	/// Release claims and keep running.
	Stay,
}

enum Command {
	Cleanup { ack: oneshot::Sender<()> },
	Shutdown { ack: oneshot::Sender<()> },
}

type Managed = Arc<Mutex<BTreeMap<String, ConnectionControl>>>;

/// Entry point for configuring and starting an engine.
pub struct Engine;

impl Engine {
	pub fn builder(options: EngineOptions) -> EngineBuilder {
		EngineBuilder {
			options,
			lister: None,
			transport: None,
			store: None,
			consumer: None,
		}
	}
}

/// Collaborators for one engine instance.
///
/// Unset collaborators default to [`SysfsLister`], [`crate::TtyTransport`] and a
/// [`FileClaimTable`] at the configured claim file. Without a consumer the
/// engine only discovers and never opens anything.
pub struct EngineBuilder {
	options: EngineOptions,
	lister: Option<Arc<dyn EndpointLister>>,
	transport: Option<Arc<dyn Transport>>,
	store: Option<Arc<dyn ClaimStore>>,
	consumer: Option<Consumer>,
}

impl EngineBuilder {
	pub fn lister(mut self, lister: impl EndpointLister + 'static) -> Self {
		self.lister = Some(Arc::new(lister));
		self
	}

	pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
		self.transport = Some(Arc::new(transport));
		self
	}

	pub fn store(mut self, store: impl ClaimStore + 'static) -> Self {
		self.store = Some(Arc::new(store));
		self
	}

	/// Uses an already shared store, e.g. one from [`crate::claims::open_store`].
	pub fn shared_store(mut self, store: Arc<dyn ClaimStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn consumer(mut self, consumer: impl Fn(Handoff) + Send + Sync + 'static) -> Self {
		self.consumer = Some(Arc::new(consumer));
		self
	}

	/// Starts the engine task on the current tokio runtime.
	///
	/// The first tick runs immediately.
	pub fn spawn(self) -> EngineHandle {
		let lister = self.lister.unwrap_or_else(|| Arc::new(SysfsLister::new()));
		let transport = self.transport.unwrap_or_else(default_transport);
		let store = self
			.store
			.unwrap_or_else(|| Arc::new(FileClaimTable::new(self.options.claim_file_path())));

		let (commands_tx, commands) = mpsc::unbounded_channel();
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		let managed: Managed = Arc::default();
		let reconnect = Arc::new(AtomicBool::new(self.options.reconnect));

		let handle = EngineHandle {
			commands: commands_tx,
			events: events.clone(),
			managed: Arc::clone(&managed),
			store: Arc::clone(&store),
			reconnect: Arc::clone(&reconnect),
		};

		if self.consumer.is_none() {
			info!(target = "portclaim.engine", "no consumer supplied; discovery only");
		}

		let task = EngineTask {
			options: self.options,
			lister,
			transport,
			store,
			consumer: self.consumer,
			events,
			managed,
			reconnect,
			commands,
			deadline: Some(Instant::now()),
			active: None,
		};
		tokio::spawn(task.run());
		handle
	}
}

#[cfg(unix)]
fn default_transport() -> Arc<dyn Transport> {
	Arc::new(crate::tty::TtyTransport)
}

#[cfg(not(unix))]
fn default_transport() -> Arc<dyn Transport> {
	Arc::new(crate::transport::Unsupported)
}

/// Cloneable control surface of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
	commands: mpsc::UnboundedSender<Command>,
	events: broadcast::Sender<EngineEvent>,
	managed: Managed,
	store: Arc<dyn ClaimStore>,
	reconnect: Arc<AtomicBool>,
}

impl EngineHandle {
	/// Receives lifecycle notifications emitted from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
		self.events.subscribe()
	}

	/// Stops re-arming discovery after a disconnect. Permanent.
	pub fn disable_reconnect(&self) {
		self.reconnect.store(false, Ordering::SeqCst);
	}

	pub fn reconnect_enabled(&self) -> bool {
		self.reconnect.load(Ordering::SeqCst)
	}

	/// Paths this instance currently holds claims for.
	pub fn managed(&self) -> Vec<String> {
		self.managed.lock().keys().cloned().collect()
	}

	/// Returns false once the engine task has stopped.
	pub fn is_running(&self) -> bool {
		!self.commands.is_closed()
	}

	/// Closes every managed connection and releases its claim.
	///
	/// With [`ExitMode::Stay`] each released path is announced as
	/// [`EngineEvent::Disconnected`] and discovery resumes unless reconnecting
	/// was disabled. With [`ExitMode::Exit`] the process exits with status 0
	/// afterwards.
	pub async fn cleanup(&self, mode: ExitMode) {
		let (ack, done) = oneshot::channel();
		let handled = self.commands.send(Command::Cleanup { ack }).is_ok() && done.await.is_ok();
		if !handled {
			self.release_directly().await;
		}

		if mode == ExitMode::Exit {
			info!(target = "portclaim.engine", "claims released; exiting");
			std::process::exit(0);
		}
	}

	/// Runs [`ExitMode::Stay`] cleanup and stops the engine task.
	pub async fn shutdown(&self) {
		let (ack, done) = oneshot::channel();
		if self.commands.send(Command::Shutdown { ack }).is_err() || done.await.is_err() {
			self.release_directly().await;
		}
	}

	/// Best-effort release from a context that cannot await.
	///
	/// Asks the engine task to clean up and, because the caller may be the
	/// engine's own panicking thread, also releases through the store's
	/// blocking path.
	pub(crate) fn cleanup_blocking(&self) {
		let (ack, _) = oneshot::channel();
		let _ = self.commands.send(Command::Cleanup { ack });

		// A panic while the lock is held must not deadlock the hook.
		let paths: Vec<String> = match self.managed.try_lock() {
			Some(managed) => managed.keys().cloned().collect(),
			None => return,
		};
		if !paths.is_empty() {
			self.store.release_all_blocking(&paths);
		}
	}

	async fn release_directly(&self) {
		let drained = std::mem::take(&mut *self.managed.lock());
		if drained.is_empty() {
			return;
		}
		let paths: Vec<String> = drained.keys().cloned().collect();
		for control in drained.values() {
			let _ = control.close().await;
		}
		if let Err(err) = self.store.release_all(&paths).await {
			warn!(target = "portclaim.engine", error = %err, "failed to release claims");
		}
	}
}

/// Connection that is claimed but not yet released.
struct Active {
	path: String,
	monitor: ConnectionMonitor,
	/// Present while the header is still being accumulated.
	handshake: Option<Handshake>,
}

struct Handshake {
	connection: Connection,
	accumulator: HeaderAccumulator,
}

enum Watched {
	Handshake(Option<ConnectionEvent>),
	Closed,
}

struct EngineTask {
	options: EngineOptions,
	lister: Arc<dyn EndpointLister>,
	transport: Arc<dyn Transport>,
	store: Arc<dyn ClaimStore>,
	consumer: Option<Consumer>,
	events: broadcast::Sender<EngineEvent>,
	managed: Managed,
	reconnect: Arc<AtomicBool>,
	commands: mpsc::UnboundedReceiver<Command>,
	/// Next tick; `None` while suspended.
	deadline: Option<Instant>,
	active: Option<Active>,
}

impl EngineTask {
	async fn run(mut self) {
		debug!(target = "portclaim.engine", signature = ?self.options.signature, header = ?self.options.header_len(), "engine started");
		loop {
			tokio::select! {
				command = self.commands.recv() => match command {
					Some(Command::Cleanup { ack }) => {
						self.on_cleanup().await;
						let _ = ack.send(());
					}
					Some(Command::Shutdown { ack }) => {
						self.cleanup().await;
						let _ = ack.send(());
						break;
					}
					None => {
						self.cleanup().await;
						break;
					}
				},
				_ = wait_until(self.deadline) => {
					self.deadline = None;
					self.tick().await;
				}
				watched = watch(&mut self.active) => match watched {
					Watched::Handshake(Some(ConnectionEvent::Data(bytes))) => self.on_handshake_data(&bytes),
					Watched::Handshake(event) => {
						if let Some(ConnectionEvent::Error(message)) = event {
							warn!(target = "portclaim.engine", error = %message, "connection failed during handshake");
						}
						self.on_closed().await;
					}
					Watched::Closed => self.on_closed().await,
				},
			}
		}
		debug!(target = "portclaim.engine", "engine stopped");
	}

	fn emit(&self, event: EngineEvent) {
		let _ = self.events.send(event);
	}

	/// Schedules the next tick one poll interval from now.
	fn arm(&mut self) {
		self.deadline = Some(Instant::now() + self.options.poll_interval());
	}

	fn reconnect_enabled(&self) -> bool {
		self.reconnect.load(Ordering::SeqCst)
	}
}

async fn wait_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

async fn watch(active: &mut Option<Active>) -> Watched {
	let Some(active) = active else {
		return std::future::pending().await;
	};
	match &mut active.handshake {
		Some(handshake) => Watched::Handshake(handshake.connection.recv().await),
		None => {
			active.monitor.closed().await;
			Watched::Closed
		}
	}
}
