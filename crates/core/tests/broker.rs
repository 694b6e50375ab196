#![cfg(unix)]

use std::time::Duration;

use portclaim::broker::ClaimBroker;
use portclaim::testing::{MockLister, MockTransport};
use portclaim::{BrokerClaimStore, ClaimStore, Engine, EngineOptions, FileClaimTable};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const USB0: &str = "/dev/ttyUSB0";

/// Both engines can open the device; only the broker keeps them apart.
#[tokio::test]
async fn broker_grants_an_endpoint_to_one_engine() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let dir = TempDir::new().unwrap();
	let socket = dir.path().join("broker.sock");
	let mirror = FileClaimTable::new(dir.path().join(".serialport"));
	let broker = ClaimBroker::bind(&socket, Some(mirror.clone())).await.unwrap();
	tokio::spawn(broker.run());

	let (tx, mut handoffs) = mpsc::unbounded_channel();
	let mut transports = Vec::new();
	let mut handles = Vec::new();
	for _ in 0..2 {
		let transport = MockTransport::new();
		let tx = tx.clone();
		let handle = Engine::builder(EngineOptions::default().with_poll_interval(Duration::from_millis(10)))
			.lister(MockLister::with_paths([USB0]))
			.transport(transport.clone())
			.store(BrokerClaimStore::connect(&socket).await.unwrap())
			.consumer(move |handoff| {
				let _ = tx.send(handoff);
			})
			.spawn();
		transports.push(transport);
		handles.push(handle);
	}

	let winner = timeout(Duration::from_secs(2), handoffs.recv()).await.unwrap().unwrap();
	assert_eq!(winner.connection.path(), USB0);
	assert!(mirror.read().contains(USB0));

	tokio::time::sleep(Duration::from_millis(150)).await;
	assert!(handoffs.try_recv().is_err(), "the endpoint was handed out twice");
	let live: usize = transports.iter().map(|transport| transport.live().len()).sum();
	assert_eq!(live, 1);

	// The loser takes over once the winner lets go.
	let winner_index = handles.iter().position(|handle| !handle.managed().is_empty()).unwrap();
	handles[winner_index].disable_reconnect();
	drop(winner);

	let successor = timeout(Duration::from_secs(2), handoffs.recv()).await.unwrap().unwrap();
	assert_eq!(successor.connection.path(), USB0);
	assert!(handles[winner_index].managed().is_empty());
	assert!(!handles[1 - winner_index].managed().is_empty());
}

#[tokio::test]
async fn crashed_client_claims_are_released() {
	let dir = TempDir::new().unwrap();
	let socket = dir.path().join("broker.sock");
	let broker = ClaimBroker::bind(&socket, None).await.unwrap();
	tokio::spawn(broker.run());

	let doomed = BrokerClaimStore::connect(&socket).await.unwrap();
	let survivor = BrokerClaimStore::connect(&socket).await.unwrap();

	assert!(doomed.claim(USB0).await.unwrap());
	assert!(!survivor.claim(USB0).await.unwrap());

	// Dropping the store closes its socket without any release request.
	drop(doomed);
	timeout(Duration::from_secs(2), async {
		while !survivor.claim(USB0).await.unwrap() {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.unwrap();
}
