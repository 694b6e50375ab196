//! Signal handling ends the process, so the engine runs in a re-executed copy
//! of this test binary.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use portclaim::testing::{MockLister, MockTransport};
use portclaim::{Engine, EngineOptions, FileClaimTable, termination};
use tempfile::TempDir;
use tokio::sync::mpsc;

const CHILD_ENV: &str = "PORTCLAIM_SIGNAL_CHILD_CLAIM_FILE";
const READY: &str = "portclaim-child-ready";
const USB0: &str = "/dev/ttyUSB0";
const FOREIGN: &str = "/dev/ttyACM7";

#[test]
fn sigterm_releases_claims_and_exits_cleanly() {
	if let Some(claim_file) = std::env::var_os(CHILD_ENV) {
		run_engine_until_signalled(Path::new(&claim_file));
		return;
	}

	let dir = TempDir::new().unwrap();
	let claim_file = dir.path().join(".serialport");
	std::fs::write(&claim_file, format!(r#"{{"{FOREIGN}":true}}"#)).unwrap();

	let mut child = Command::new(std::env::current_exe().unwrap())
		.args(["sigterm_releases_claims_and_exits_cleanly", "--exact", "--nocapture", "--test-threads=1"])
		.env(CHILD_ENV, &claim_file)
		.stdout(Stdio::piped())
		.stderr(Stdio::inherit())
		.spawn()
		.unwrap();

	let stdout = child.stdout.take().unwrap();
	let (ready_tx, ready_rx) = std_mpsc::channel();
	std::thread::spawn(move || {
		for line in BufReader::new(stdout).lines().map_while(Result::ok) {
			if line.trim().ends_with(READY) {
				let _ = ready_tx.send(());
			}
		}
	});

	if ready_rx.recv_timeout(Duration::from_secs(10)).is_err() {
		let _ = child.kill();
		panic!("engine child never acquired {USB0}");
	}
	assert!(FileClaimTable::new(&claim_file).read().contains(USB0));

	let killed = Command::new("kill")
		.args(["-TERM", &child.id().to_string()])
		.status()
		.unwrap();
	assert!(killed.success());

	let status = child.wait().unwrap();
	assert_eq!(status.code(), Some(0), "child exited with {status}");

	let claims = FileClaimTable::new(&claim_file).read();
	assert!(!claims.contains(USB0));
	assert!(claims.contains(FOREIGN));
}

fn run_engine_until_signalled(claim_file: &Path) {
	let claim_file = PathBuf::from(claim_file);
	let runtime = tokio::runtime::Runtime::new().unwrap();
	runtime.block_on(async move {
		let (tx, mut handoffs) = mpsc::unbounded_channel();
		let handle = Engine::builder(
			EngineOptions::default()
				.with_claim_file(&claim_file)
				.with_poll_interval(Duration::from_millis(20)),
		)
		.lister(MockLister::with_paths([USB0]))
		.transport(MockTransport::new())
		.consumer(move |handoff| {
			let _ = tx.send(handoff);
		})
		.spawn();
		termination::watch_signals(handle.clone()).unwrap();

		let _handoff = handoffs.recv().await.unwrap();
		println!("{READY}");
		std::io::stdout().flush().unwrap();

		std::future::pending::<()>().await;
	});
}
