//! portclaim: exclusive acquisition of serial endpoints shared by
//! uncoordinated processes.
//!
//! An [`Engine`] polls the host's endpoints, picks the ones whose attributes
//! match a [`Signature`], and takes the first one no other instance has
//! claimed. The connection is handed to a consumer, optionally after a fixed
//! number of header bytes arrived. Claims are released when the connection
//! closes, when the process receives a termination signal, or when it panics.
//!
//! # Example
//!
//! ```ignore
//! use portclaim::{Engine, EngineOptions, Signature, termination};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = EngineOptions::default()
//!         .with_signature(Signature::any().with("vendorId", "2341"))
//!         .with_header(4);
//!
//!     let handle = Engine::builder(options)
//!         .consumer(|handoff| {
//!             println!("{} says {:?}", handoff.connection.path(), handoff.header);
//!         })
//!         .spawn();
//!
//!     termination::watch_signals(handle.clone())?;
//!     termination::install_fault_hook(handle.clone());
//!
//!     let mut events = handle.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Claim arbitration
//!
//! By default claims live in `~/.serialport`, shared advisory-style by every
//! instance on the host. Setting [`EngineOptions::broker`] routes them through
//! a [`broker::ClaimBroker`] instead, which grants each path to one client at a
//! time.

#[cfg(unix)]
pub mod broker;
pub mod claims;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod handshake;
pub mod lister;
pub mod termination;
pub mod testing;
pub mod transport;
#[cfg(unix)]
pub mod tty;

pub use claims::{ClaimStore, FileClaimTable};
#[cfg(unix)]
pub use claims::BrokerClaimStore;
pub use config::EngineOptions;
pub use connection::{Connection, ConnectionEvent, ConnectionMonitor, ConnectionState, EventSender, PortWriter};
pub use engine::{Consumer, Engine, EngineBuilder, EngineEvent, EngineHandle, ExitMode, Handoff};
pub use error::{Error, Result};
pub use lister::SysfsLister;
pub use portclaim_protocol::{ClaimTable, EndpointDescriptor, Signature};
pub use transport::{EndpointLister, Transport};
#[cfg(unix)]
pub use tty::{TtyOptions, TtyTransport};
