//! oracle-node — the coordinator binary.
//!
//! Startup sequence:
//!   1. Open the state store
//!   2. Parse the trusted signer set
//!   3. Start the P2P network (libp2p GossipSub + Kademlia)
//!   4. Spawn the retry broadcaster, expiry sweeper, peer eviction and
//!      health monitor background tasks
//!   5. Run the data collection loop: fetch prices → build `SignRequest`s →
//!      broadcast for signing

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use oracle_aggregator::{get_average_price, price_to_wei, PriceSource};
use oracle_core::{constants, Address, OracleError, OracleHash, SignRequest, TrustedSet};
use oracle_coordinator::Coordinator;
use oracle_crypto::{build_message_data, canonical_hash, PackedValue};
use oracle_p2p::{P2pConfig, P2pNetwork};
use oracle_store::Store;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "oracle-node", version, about = "Threshold-signature oracle coordinator")]
struct Args {
    /// P2P listen address.
    #[arg(long, env = "P2P_LISTEN", default_value = "/ip4/0.0.0.0/tcp/4001")]
    p2p_listen: String,

    /// Bootstrap peer multiaddresses (comma-separated).
    #[arg(long, env = "BOOTSTRAP_NODE", value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// GossipSub topic shared with signers.
    #[arg(long, env = "TOPIC")]
    topic: String,

    /// Trusted signer addresses, comma-separated hex.
    #[arg(long, env = "TRUSTED_ADDRESSES", value_delimiter = ',')]
    trusted_addresses: Vec<String>,

    /// Directory for the persistent KV store.
    #[arg(long, env = "DB_PATH", default_value = "./data/coordinator")]
    db_path: PathBuf,

    /// Reserved for the out-of-scope HTTP surface; accepted but unused.
    #[arg(long, env = "RPC_PORT", default_value_t = constants::DEFAULT_HTTP_PORT)]
    rpc_port: u16,

    /// Tickers to collect prices for, comma-separated.
    #[arg(long, env = "TICKERS", value_delimiter = ',')]
    tickers: Vec<String>,

    /// Seconds between data collection ticks.
    #[arg(long, env = "DATA_COLLECTION_INTERVAL", default_value_t = 30)]
    data_collection_interval: u64,

    /// JSON file describing data structure ids (see `DataStructureSpec`).
    #[arg(long, env = "DATA_STRUCTURES_PATH")]
    data_structures_path: Option<PathBuf>,
}

/// One row of the `DATA_STRUCTURES_PATH` schema file: the ticker to watch
/// and the `dsId` / solidity-type schema its observations are recorded under.
#[derive(Debug, Clone, serde::Deserialize)]
struct DataStructureSpec {
    id: u64,
    ticker: String,
    structure: Vec<String>,
    meta: Vec<String>,
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
    info!("oracle coordinator starting");

    if args.topic.is_empty() {
        anyhow::bail!("TOPIC must be set (configuration error)");
    }

    let trusted_addresses: Vec<Address> = args
        .trusted_addresses
        .iter()
        .map(|s| Address::from_hex(s).map_err(|e| anyhow::anyhow!("invalid trusted address {s}: {e}")))
        .collect::<anyhow::Result<_>>()?;
    if trusted_addresses.is_empty() {
        anyhow::bail!("TRUSTED_ADDRESSES must list at least one signer (configuration error)");
    }
    let trusted = TrustedSet::new(trusted_addresses);
    info!(count = trusted.len(), threshold = trusted.threshold(), "trusted signer set loaded");

    std::fs::create_dir_all(&args.db_path)
        .with_context(|| format!("creating data dir {}", args.db_path.display()))?;
    let store = Store::open(&args.db_path).context("opening state store")?;

    let specs = load_data_structure_specs(args.data_structures_path.as_deref())?;

    let p2p_config = P2pConfig {
        listen_addr: args.p2p_listen.clone(),
        bootstrap_peers: args.bootstrap.clone(),
        protocol_version: "/oracle-net/1.0.0".into(),
        topic: args.topic.clone(),
    };
    let (p2p_network, p2p_handle) =
        P2pNetwork::new(&p2p_config).map_err(|e| anyhow::anyhow!("building P2P network: {e}"))?;
    info!(peer_id = %p2p_handle.local_peer_id, "P2P identity");

    let coordinator = Arc::new(Coordinator::new(store, trusted, &p2p_handle));
    let cancel = CancellationToken::new();

    // Register every join handle before spawning its task, so a panic
    // during spawn setup never leaves an untracked background task running.
    let mut tasks = Vec::new();

    let retry_coordinator = coordinator.clone();
    let retry_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        retry_coordinator.run_retry_broadcaster(retry_cancel).await;
    }));

    let sweep_coordinator = coordinator.clone();
    let sweep_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        sweep_coordinator.run_expiry_sweeper(sweep_cancel).await;
    }));

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

    let mut inbound_rx = p2p_handle.inbound_rx;
    let dispatch_coordinator = coordinator.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(envelope) = inbound_rx.recv().await {
            dispatch_coordinator.handle_envelope(envelope).await;
        }
    }));

    tasks.push(tokio::spawn(async move { p2p_network.run().await }));

    // Concrete HTTP/exchange price collectors are out of scope for this
    // implementation; an embedder wires real `PriceSource`s in here.
    let sources: Vec<Box<dyn PriceSource>> = Vec::new();
    let collection_interval = Duration::from_secs(args.data_collection_interval);

    info!("coordinator ready");
    let mut ticker = tokio::time::interval(collection_interval);
    loop {
        ticker.tick().await;
        for spec in &specs {
            if let Err(e) = collect_and_broadcast(&coordinator, &sources, spec).await {
                warn!(ticker = %spec.ticker, error = %e, "data collection tick skipped");
            }
        }
    }
}

async fn collect_and_broadcast(
    coordinator: &Coordinator,
    sources: &[Box<dyn PriceSource>],
    spec: &DataStructureSpec,
) -> anyhow::Result<()> {
    let price = get_average_price(sources, &spec.ticker, constants::PUBLISH_TIMEOUT).await?;
    let timestamp = chrono::Utc::now().timestamp();

    // This collector only ever observes one field (the aggregated price),
    // so it names it by the schema's first `meta` entry — a schema with
    // more fields than this collector can observe fails in `build_message_data`
    // below rather than silently omitting them.
    let field_name = spec
        .meta
        .first()
        .context("data structure schema has no fields to observe")?;
    let field_type = spec
        .structure
        .first()
        .context("data structure schema has no fields to observe")?;

    let mut values = HashMap::new();
    values.insert(field_name.clone(), price_packed_value(field_type, price)?);

    let data = build_message_data(&spec.structure, &spec.meta, &values)
        .map_err(|e| anyhow::anyhow!("building message data: {e}"))?;

    let hash: OracleHash = canonical_hash(
        &serde_json::to_string(&data).context("serializing observation data")?,
        timestamp,
    );

    let request = SignRequest {
        hash,
        data,
        data_structure: spec.structure.clone(),
        data_structure_meta: spec.meta.clone(),
        data_structure_id: spec.id,
        timestamp,
    };

    coordinator
        .broadcast_sign_request(request)
        .await
        .map_err(|e| anyhow::anyhow!("broadcasting sign request: {e}"))
}

/// Converts an aggregated price into the `PackedValue` its schema's
/// declared solidity type expects. `build_message_data` validates the type
/// itself; this only decides how to represent the one value this collector
/// produces.
fn price_packed_value(solidity_type: &str, price: f64) -> anyhow::Result<PackedValue> {
    let wei = price_to_wei(price);
    match solidity_type {
        "uint256" | "uint64" => {
            let parsed: u128 = wei
                .parse()
                .with_context(|| format!("wei value {wei} does not fit a u128"))?;
            Ok(PackedValue::Uint256(parsed))
        }
        "string" => Ok(PackedValue::String(wei)),
        other => anyhow::bail!("price field schema uses an unsupported solidity type: {other}"),
    }
}

fn load_data_structure_specs(path: Option<&std::path::Path>) -> anyhow::Result<Vec<DataStructureSpec>> {
    let Some(path) = path else {
        warn!("no DATA_STRUCTURES_PATH given — data collection loop has nothing to watch");
        return Ok(Vec::new());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading data structures schema from {}", path.display()))?;
    serde_json::from_str(&json).context("parsing data structures schema JSON")
}
