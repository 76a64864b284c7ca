//! oracle-p2p
//!
//! libp2p networking layer for the oracle network.
//!
//! GossipSub carries `sign_request` / `sign_response` envelopes on a single
//! shared topic. Kademlia handles peer discovery from bootstrap addresses.
//! Identify and Ping maintain connection metadata and liveness.

pub mod config;
pub mod message;
pub mod network;
pub mod supervisor;

pub use config::P2pConfig;
pub use message::Envelope;
pub use network::{transport_error, ControlMsg, P2pHandle, P2pNetwork, PeerTracker};
pub use supervisor::{
    retry_with_backoff, run_health_monitor, run_peer_eviction, run_peer_supervisor,
    run_resubscribe_supervisor,
};
