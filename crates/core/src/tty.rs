//! Transport over local tty device nodes.

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serialport::{SerialPort, TTYPort};
use tracing::{debug, warn};

use crate::connection::{Connection, EventSender, PortWriter};
use crate::error::{Error, Result};
use crate::transport::Transport;

const READ_CHUNK: usize = 4096;
const DEFAULT_BAUD_RATE: u32 = 9600;
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Options understood by [`TtyTransport`] inside the pass-through `config`.
///
/// Unknown keys are ignored so the same `config` object can carry options
/// meant for other transports.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtyOptions {
	/// Line speed; 9600 when absent.
	#[serde(default)]
	pub baud_rate: Option<u32>,
	/// Take the kernel's exclusive-open lock (`TIOCEXCL`).
	#[serde(default = "default_exclusive")]
	pub exclusive: bool,
}

fn default_exclusive() -> bool {
	true
}

impl Default for TtyOptions {
	fn default() -> Self {
		Self {
			baud_rate: None,
			exclusive: true,
		}
	}
}

impl TtyOptions {
	/// Parses the pass-through `config`; `null` yields the defaults.
	pub fn from_config(config: &serde_json::Value) -> Result<Self> {
		if config.is_null() {
			return Ok(Self::default());
		}
		serde_json::from_value(config.clone()).map_err(|err| Error::Config(format!("tty options: {err}")))
	}

	pub fn line_speed(&self) -> u32 {
		self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE)
	}
}

/// Opens tty devices in raw 8N1 mode under an exclusive lock.
///
/// Reads are pumped on a blocking thread with a 100ms timeout; an I/O error or
/// the device node disappearing closes the connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtyTransport;

#[async_trait]
impl Transport for TtyTransport {
	async fn open(&self, path: &str, options: &serde_json::Value) -> Result<Connection> {
		let options = TtyOptions::from_config(options)?;
		let target = path.to_string();
		let (port, reader) = tokio::task::spawn_blocking(move || open_port(&target, &options))
			.await
			.map_err(|err| Error::open(path, io::Error::other(err)))?
			.map_err(|err| Error::open(path, err))?;

		let writer = TtyWriter { port: Some(port) };
		let (connection, events) = Connection::new(path, Box::new(writer));

		let pumped = path.to_string();
		tokio::task::spawn_blocking(move || pump(&pumped, reader, events));

		debug!(target = "portclaim.tty", path, "tty opened");
		Ok(connection)
	}
}

/// Returns the writing half and a cloned reading half of the opened port.
fn open_port(path: &str, options: &TtyOptions) -> io::Result<(TTYPort, TTYPort)> {
	// Opening takes TIOCEXCL; dropped again when not wanted.
	let mut port = serialport::new(path, options.line_speed())
		.timeout(READ_TIMEOUT)
		.open_native()?;
	if !options.exclusive {
		port.set_exclusive(false)?;
	}

	let reader = port.try_clone_native()?;
	port.set_timeout(WRITE_TIMEOUT)?;
	Ok((port, reader))
}

struct TtyWriter {
	port: Option<TTYPort>,
}

#[async_trait]
impl PortWriter for TtyWriter {
	async fn write(&mut self, data: &[u8]) -> io::Result<()> {
		let mut port = self.port.take().ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
		let data = data.to_vec();
		let (port, written) = tokio::task::spawn_blocking(move || {
			let written = port.write_all(&data).and_then(|()| port.flush());
			(port, written)
		})
		.await
		.map_err(io::Error::other)?;
		self.port = Some(port);
		written
	}

	async fn close(&mut self) -> io::Result<()> {
		// Dropping the port releases the exclusive lock.
		self.port.take();
		Ok(())
	}
}

fn pump(path: &str, mut port: TTYPort, events: EventSender) {
	let mut buf = [0u8; READ_CHUNK];
	loop {
		if events.is_closed() {
			break;
		}
		// Timeouts and hangup read as nothing; the node vanishing means unplugged.
		let idle = match port.read(&mut buf) {
			Ok(0) => true,
			Ok(n) => {
				if !events.data(buf[..n].to_vec()) {
					break;
				}
				false
			}
			Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => true,
			Err(err) => {
				warn!(target = "portclaim.tty", path, error = %err, "tty read failed");
				events.error(err.to_string());
				break;
			}
		};
		if idle && !Path::new(path).exists() {
			events.close();
			break;
		}
	}
	debug!(target = "portclaim.tty", path, "tty reader stopped");
}
