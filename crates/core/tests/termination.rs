//! Panic hooks are process-global, so these run in their own test binary.

use std::time::Duration;

use portclaim::testing::{MemoryClaimStore, MockLister, MockTransport};
use portclaim::{Engine, EngineOptions, termination};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn fault_hook_releases_claims() {
	let store = MemoryClaimStore::new();
	let (tx, mut handoffs) = mpsc::unbounded_channel();
	let handle = Engine::builder(EngineOptions::default())
		.lister(MockLister::with_paths(["/dev/ttyUSB0"]))
		.transport(MockTransport::new())
		.store(store.clone())
		.consumer(move |handoff| {
			let _ = tx.send(handoff);
		})
		.spawn();
	termination::install_fault_hook(handle.clone());

	let _handoff = timeout(Duration::from_secs(2), handoffs.recv()).await.unwrap().unwrap();
	assert!(store.table().contains("/dev/ttyUSB0"));

	let crashed = std::thread::spawn(|| panic!("simulated fault")).join();
	assert!(crashed.is_err());

	// The blocking path ran inside the hook, before the thread finished unwinding.
	assert_eq!(store.blocking_releases(), vec!["/dev/ttyUSB0".to_string()]);
	assert!(!store.table().contains("/dev/ttyUSB0"));

	// The engine also processed the cleanup request.
	timeout(Duration::from_secs(2), async {
		while !handle.managed().is_empty() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap();
}
