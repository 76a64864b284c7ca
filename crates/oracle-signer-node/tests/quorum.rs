//! End-to-end quorum test: spawns real `oracle-signer-node` processes and
//! drives an in-process coordinator across a real loopback GossipSub mesh.
//!
//! The read API is out of scope for this system, so verification reads the
//! coordinator's own state (`Coordinator::signature_count`,
//! `Coordinator::pending_count`, and the underlying `Store`) instead of
//! polling an RPC endpoint.

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use oracle_core::{OracleHash, SignRequest, TrustedSet};
use oracle_coordinator::Coordinator;
use oracle_crypto::{canonical_hash, KeyPair};
use oracle_p2p::{P2pConfig, P2pNetwork};
use oracle_store::Store;

struct SignerGuard(Child);

impl Drop for SignerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_signer(private_key_hex: &str, bootstrap: &str, topic: &str) -> SignerGuard {
    let bin = env!("CARGO_BIN_EXE_oracle-signer-node");
    let child = Command::new(bin)
        .env("PRIVATE_KEY", private_key_hex)
        .env("P2P_LISTEN", "/ip4/127.0.0.1/tcp/0")
        .env("BOOTSTRAP_NODE", bootstrap)
        .env("TOPIC", topic)
        .env("RUST_LOG", "error")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn oracle-signer-node");
    SignerGuard(child)
}

/// Poll `cond` until it's true or `timeout` elapses; returns the final value.
async fn wait_until(timeout: Duration, poll_every: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return cond();
        }
        tokio::time::sleep(poll_every).await;
    }
}

/// Spin up an in-process coordinator bound to a known loopback port and
/// return it alongside its bootstrap multiaddr and the raw 32-byte private
/// keys of the `n` trusted signer slots (hex-encoded, ready for `PRIVATE_KEY`).
fn start_coordinator(n: u8, topic: &str) -> (Arc<Coordinator>, String, Vec<String>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();

    let raw_keys: Vec<[u8; 32]> = (0..n).map(|i| [0x30 + i; 32]).collect();
    let keys: Vec<KeyPair> = raw_keys.iter().map(|b| KeyPair::from_bytes(b).unwrap()).collect();
    let trusted = TrustedSet::new(keys.iter().map(|k| k.address()));

    let port = free_port();
    let config = P2pConfig {
        listen_addr: format!("/ip4/127.0.0.1/tcp/{port}"),
        bootstrap_peers: Vec::new(),
        protocol_version: "/oracle-net/1.0.0".into(),
        topic: topic.into(),
    };
    let (network, handle) = P2pNetwork::new(&config).expect("coordinator p2p network");
    let bootstrap = format!("/ip4/127.0.0.1/tcp/{port}/p2p/{}", handle.local_peer_id);

    let coordinator = Arc::new(Coordinator::new(store, trusted, &handle));

    tokio::spawn(network.run());
    let mut inbound_rx = handle.inbound_rx;
    let dispatch = coordinator.clone();
    tokio::spawn(async move {
        while let Some(envelope) = inbound_rx.recv().await {
            dispatch.handle_envelope(envelope).await;
        }
    });

    let key_hexes: Vec<String> = raw_keys.iter().map(hex::encode).collect();
    (coordinator, bootstrap, key_hexes, dir)
}

fn observation_request(nonce: u8) -> SignRequest {
    let data = vec![serde_json::json!(format!("101.{nonce}"))];
    let timestamp = 1_700_000_000 + nonce as i64;
    let json = serde_json::to_string(&data).unwrap();
    let hash: OracleHash = canonical_hash(&json, timestamp);
    SignRequest {
        hash,
        data,
        data_structure: vec!["uint256".into()],
        data_structure_meta: vec!["price".into()],
        data_structure_id: 1,
        timestamp,
    }
}

#[tokio::test]
async fn all_signers_online_reaches_quorum_and_retires_the_pending_entry() {
    let topic = format!("oracle-quorum-test-{}", std::process::id());
    let (coordinator, bootstrap, key_hexes, _dir) = start_coordinator(3, &topic);

    let _signers: Vec<SignerGuard> = key_hexes
        .iter()
        .map(|k| spawn_signer(k, &bootstrap, &topic))
        .collect();

    // Let the GossipSub mesh form before publishing anything onto it.
    tokio::time::sleep(Duration::from_secs(4)).await;

    let request = observation_request(1);
    let hash = request.hash;
    assert_eq!(coordinator.threshold(), 2);
    coordinator.broadcast_sign_request(request).await.unwrap();

    let reached = wait_until(Duration::from_secs(20), Duration::from_millis(300), || {
        coordinator.signature_count(&hash) >= 3
    })
    .await;
    assert!(reached, "all three signers should have responded within the deadline");

    // S1: once every trusted signer has responded the pending entry is
    // retired immediately, ahead of the expiry sweep.
    assert_eq!(coordinator.pending_count(), 0);

    let sigs = coordinator.store().get_signatures(&hash).unwrap().unwrap();
    assert_eq!(sigs.len(), 3);
}

#[tokio::test]
async fn quorum_is_reached_with_a_strict_majority_of_signers() {
    let topic = format!("oracle-quorum-majority-{}", std::process::id());
    let (coordinator, bootstrap, key_hexes, _dir) = start_coordinator(3, &topic);

    // Only two of the three trusted signers are actually running; the third
    // never comes online for this test.
    let _signers: Vec<SignerGuard> = key_hexes[..2]
        .iter()
        .map(|k| spawn_signer(k, &bootstrap, &topic))
        .collect();

    tokio::time::sleep(Duration::from_secs(4)).await;

    let request = observation_request(2);
    let hash = request.hash;
    coordinator.broadcast_sign_request(request).await.unwrap();

    let reached = wait_until(Duration::from_secs(20), Duration::from_millis(300), || {
        coordinator.signature_count(&hash) >= coordinator.threshold()
    })
    .await;
    assert!(reached, "quorum (2 of 3) should be reachable with two live signers");

    // S2: quorum was met but the third trusted signer never responded, so
    // the pending entry survives until the expiry sweep rather than being
    // retired immediately.
    assert_eq!(coordinator.pending_count(), 1);

    let sigs = coordinator.store().get_signatures(&hash).unwrap().unwrap();
    assert_eq!(sigs.len(), 2);
}
