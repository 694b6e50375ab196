//! Releasing claims when the process is going away.
//!
//! The owning process installs both guards right after spawning the engine:
//!
//! ```ignore
//! let handle = Engine::builder(options).consumer(consume).spawn();
//! termination::watch_signals(handle.clone())?;
//! termination::install_fault_hook(handle.clone());
//! ```
//!
//! A SIGKILL cannot be intercepted. Claims taken through a broker still
//! disappear with the dead process's socket; file claims stay behind until
//! removed by hand.

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::engine::{EngineHandle, ExitMode};
use crate::error::Result;

/// Releases every claim and exits with status 0 on SIGHUP, SIGINT, SIGQUIT or
/// SIGTERM.
#[cfg(unix)]
pub fn watch_signals(handle: EngineHandle) -> Result<JoinHandle<()>> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut hangup = signal(SignalKind::hangup())?;
	let mut interrupt = signal(SignalKind::interrupt())?;
	let mut quit = signal(SignalKind::quit())?;
	let mut terminate = signal(SignalKind::terminate())?;

	Ok(tokio::spawn(async move {
		let name = tokio::select! {
			_ = hangup.recv() => "SIGHUP",
			_ = interrupt.recv() => "SIGINT",
			_ = quit.recv() => "SIGQUIT",
			_ = terminate.recv() => "SIGTERM",
		};
		info!(target = "portclaim.signal", signal = name, "termination signal received; releasing claims");
		handle.cleanup(ExitMode::Exit).await;
	}))
}

/// Releases every claim and exits with status 0 on Ctrl+C.
#[cfg(not(unix))]
pub fn watch_signals(handle: EngineHandle) -> Result<JoinHandle<()>> {
	Ok(tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!(target = "portclaim.signal", "received Ctrl+C; releasing claims");
			handle.cleanup(ExitMode::Exit).await;
		}
	}))
}

/// Chains a panic hook that releases this engine's claims before the previous
/// hook runs. The process is not terminated by the hook itself.
pub fn install_fault_hook(handle: EngineHandle) {
	let previous = std::panic::take_hook();
	std::panic::set_hook(Box::new(move |info| {
		error!(target = "portclaim.signal", "unhandled fault; releasing claims");
		handle.cleanup_blocking();
		previous(info);
	}));
}
