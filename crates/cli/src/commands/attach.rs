use anyhow::{Context, Result};
use portclaim::{
	ConnectionEvent, Engine, EngineEvent, EngineOptions, Handoff, SysfsLister, TtyTransport, claims, termination,
};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::cli::AttachArgs;

pub async fn run(args: AttachArgs) -> Result<()> {
	let options = build_options(&args)?;
	let store = claims::open_store(&options).await.context("Failed to open claim store")?;

	let (tx, mut handoffs) = mpsc::unbounded_channel();
	let handle = Engine::builder(options)
		.lister(SysfsLister::new())
		.transport(TtyTransport)
		.shared_store(store)
		.consumer(move |handoff| {
			let _ = tx.send(handoff);
		})
		.spawn();

	termination::watch_signals(handle.clone()).context("Failed to install signal handlers")?;
	termination::install_fault_hook(handle.clone());

	let mut events = handle.subscribe();
	loop {
		tokio::select! {
			Some(handoff) = handoffs.recv() => {
				tokio::spawn(copy_to_stdout(handoff));
			}
			event = events.recv() => match event {
				Ok(EngineEvent::Searching) => debug!(target = "portclaim.engine", "searching"),
				Ok(EngineEvent::Connected { path }) => info!(target = "portclaim.engine", path = %path, "connected"),
				Ok(EngineEvent::Disconnected { path }) => {
					info!(target = "portclaim.engine", path = %path, "disconnected");
					if args.once {
						break;
					}
				}
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					debug!(target = "portclaim.engine", skipped, "event stream lagged");
				}
				Err(broadcast::error::RecvError::Closed) => break,
			},
		}
	}

	handle.shutdown().await;
	Ok(())
}

/// Header first, then every chunk until the endpoint closes. Dropping the
/// connection at the end releases the claim.
async fn copy_to_stdout(mut handoff: Handoff) {
	let mut stdout = tokio::io::stdout();
	if let Some(header) = &handoff.header {
		if stdout.write_all(header).await.is_err() {
			return;
		}
	}

	while let Some(event) = handoff.connection.recv().await {
		match event {
			ConnectionEvent::Data(bytes) => {
				if stdout.write_all(&bytes).await.is_err() || stdout.flush().await.is_err() {
					break;
				}
			}
			ConnectionEvent::Close => break,
			ConnectionEvent::Error(message) => {
				warn!(target = "portclaim.engine", path = handoff.connection.path(), error = %message, "endpoint failed");
				break;
			}
		}
	}
}

fn build_options(args: &AttachArgs) -> Result<EngineOptions> {
	let mut options = match &args.config {
		Some(path) => EngineOptions::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
		None => EngineOptions::default(),
	};

	for (key, value) in &args.signature {
		options.signature = std::mem::take(&mut options.signature).with(key.clone(), value.clone());
	}
	if let Some(header) = args.header {
		options.header = Some(header);
	}
	if let Some(baud) = args.baud_rate {
		if !options.config.is_object() {
			options.config = json!({});
		}
		if let Some(config) = options.config.as_object_mut() {
			config.insert("baudRate".into(), json!(baud));
		}
	}
	if let Some(ms) = args.poll_ms {
		options.poll_interval = ms;
	}
	if args.no_reconnect || args.once {
		options.reconnect = false;
	}
	if let Some(path) = &args.claim_file {
		options.claim_file = Some(path.clone());
	}
	if let Some(socket) = &args.broker {
		options.broker = Some(socket.clone());
	}
	Ok(options)
}
