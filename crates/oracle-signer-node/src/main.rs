//! oracle-signer-node — the signer binary.
//!
//! Startup sequence:
//!   1. Load or generate the signing keypair
//!   2. Start the P2P network on the shared signing topic
//!   3. Spawn the peer eviction and health monitor background tasks
//!   4. Dispatch every inbound `sign_request` to the signer for validation,
//!      signing, and response publication

use clap::Parser;
use tracing::info;

use oracle_core::OracleError;
use oracle_crypto::KeyPair;
use oracle_p2p::{P2pConfig, P2pNetwork};
use oracle_signer::Signer;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "oracle-signer-node", version, about = "Threshold-signature oracle signer")]
struct Args {
    /// Hex secp256k1 private key; a fresh one is generated if absent.
    #[arg(long, env = "PRIVATE_KEY")]
    private_key: Option<String>,

    /// P2P listen address.
    #[arg(long, env = "P2P_LISTEN", default_value = "/ip4/0.0.0.0/tcp/0")]
    p2p_listen: String,

    /// Bootstrap peer multiaddresses (comma-separated).
    #[arg(long, env = "BOOTSTRAP_NODE", value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// GossipSub topic shared with the coordinator.
    #[arg(long, env = "TOPIC")]
    topic: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,oracle=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("oracle signer starting");

    if args.topic.is_empty() {
        anyhow::bail!("TOPIC must be set (configuration error)");
    }

    let keypair = match &args.private_key {
        Some(hex_key) => KeyPair::from_hex(hex_key).map_err(|e| anyhow::anyhow!("invalid PRIVATE_KEY: {e}"))?,
        None => {
            tracing::warn!("no PRIVATE_KEY given — generating an ephemeral signing key");
            KeyPair::generate()
        }
    };
    info!(address = %keypair.address(), "signer identity");

    let p2p_config = P2pConfig {
        listen_addr: args.p2p_listen.clone(),
        bootstrap_peers: args.bootstrap.clone(),
        protocol_version: "/oracle-net/1.0.0".into(),
        topic: args.topic.clone(),
    };
    let (p2p_network, p2p_handle) =
        P2pNetwork::new(&p2p_config).map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %p2p_handle.local_peer_id, "P2P identity");

    let signer = Signer::new(keypair, &p2p_handle);
    let cancel = CancellationToken::new();

    let mut tasks = Vec::new();

    let peers = p2p_handle.peers.clone();
    let eviction_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        oracle_p2p::run_peer_eviction(peers, eviction_cancel).await;
    }));

    let supervisor_peers = p2p_handle.peers.clone();
    let supervisor_control_tx = p2p_handle.control_tx.clone();
    let supervisor_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        oracle_p2p::run_peer_supervisor(supervisor_peers, supervisor_control_tx, supervisor_cancel).await;
    }));

    let (resubscribe_tx, resubscribe_rx) = tokio::sync::watch::channel(0u64);

    let health_peers = p2p_handle.peers.clone();
    let health_control_tx = p2p_handle.control_tx.clone();
    let health_cancel = cancel.clone();
    let health_resubscribe_tx = resubscribe_tx.clone();
    tasks.push(tokio::spawn(async move {
        oracle_p2p::run_health_monitor(health_peers, health_control_tx, health_resubscribe_tx, health_cancel)
            .await;
    }));

    let resubscribe_control_tx = p2p_handle.control_tx.clone();
    let resubscribe_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        oracle_p2p::run_resubscribe_supervisor(
            resubscribe_rx,
            move || {
                let control_tx = resubscribe_control_tx.clone();
                async move {
                    control_tx
                        .send(oracle_p2p::ControlMsg::Resubscribe)
                        .await
                        .map_err(|_| OracleError::Transport("p2p network task gone".into()))
                }
            },
            resubscribe_cancel,
        )
        .await;
    }));

    tasks.push(tokio::spawn(async move { p2p_network.run().await }));

    let mut inbound_rx = p2p_handle.inbound_rx;
    info!("signer ready");
    while let Some(envelope) = inbound_rx.recv().await {
        signer.handle_envelope(envelope).await;
    }

    Ok(())
}
