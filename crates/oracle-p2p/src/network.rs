use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, kad, noise, ping, tcp, yamux,
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm,
};
use libp2p_swarm::NetworkBehaviour;
use oracle_core::{constants, OracleError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::P2pConfig;
use crate::message::Envelope;

#[derive(NetworkBehaviour)]
pub struct OracleBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub ping: ping::Behaviour,
}

/// Shared, lock-guarded view of peer liveness, read by the coordinator's
/// peer supervisor and health monitor without touching the swarm itself.
#[derive(Clone, Default)]
pub struct PeerTracker {
    known_peers: Arc<RwLock<HashMap<PeerId, Instant>>>,
    last_message_at: Arc<RwLock<Option<Instant>>>,
}

impl PeerTracker {
    fn touch_peer(&self, peer: PeerId) {
        self.known_peers
            .write()
            .expect("peer tracker lock poisoned")
            .insert(peer, Instant::now());
    }

    fn touch_message(&self) {
        *self
            .last_message_at
            .write()
            .expect("peer tracker lock poisoned") = Some(Instant::now());
    }

    pub fn peer_count(&self) -> usize {
        self.known_peers.read().expect("peer tracker lock poisoned").len()
    }

    pub fn last_message_at(&self) -> Option<Instant> {
        *self.last_message_at.read().expect("peer tracker lock poisoned")
    }

    /// Drop any peer not seen within `window`. Called by the coordinator's
    /// eviction ticker.
    pub fn evict_stale(&self, window: Duration) {
        let now = Instant::now();
        self.known_peers
            .write()
            .expect("peer tracker lock poisoned")
            .retain(|_, last_seen| now.duration_since(*last_seen) < window);
    }
}

/// Out-of-band commands the network task accepts alongside outbound envelopes.
#[derive(Debug, Clone, Copy)]
pub enum ControlMsg {
    /// Re-issue the gossipsub subscription for the shared topic. Harmless
    /// when already subscribed; exists for the health monitor's forced
    /// recovery path.
    Resubscribe,
    /// Redial every configured bootstrap address. Sent by the peer
    /// supervisor when the peer count drops to zero.
    Reconnect,
}

/// Application-facing handle returned from `P2pNetwork::new()`.
pub struct P2pHandle {
    /// Send here to broadcast an envelope to all gossip peers.
    pub outbound_tx: mpsc::Sender<Envelope>,
    /// Receive here to consume envelopes arriving from peers.
    pub inbound_rx: mpsc::Receiver<Envelope>,
    /// Send here to issue out-of-band commands to the running network task.
    pub control_tx: mpsc::Sender<ControlMsg>,
    /// Local libp2p peer identity.
    pub local_peer_id: PeerId,
    /// Peer liveness, shared with the running `P2pNetwork`.
    pub peers: PeerTracker,
}

/// Owns the libp2p Swarm. Pass to `tokio::spawn(network.run())`.
pub struct P2pNetwork {
    swarm: Swarm<OracleBehaviour>,
    topic: gossipsub::IdentTopic,
    outbound_rx: mpsc::Receiver<Envelope>,
    inbound_tx: mpsc::Sender<Envelope>,
    control_rx: mpsc::Receiver<ControlMsg>,
    peers: PeerTracker,
    bootstrap_addrs: Vec<Multiaddr>,
}

impl P2pNetwork {
    /// Build the network and return `(P2pNetwork, P2pHandle)`.
    pub fn new(
        config: &P2pConfig,
    ) -> Result<(Self, P2pHandle), Box<dyn std::error::Error + Send + Sync>> {
        let topic = gossipsub::IdentTopic::new(&config.topic);

        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key: &libp2p::identity::Keypair| {
                let message_id_fn = |msg: &gossipsub::Message| {
                    let mut s = DefaultHasher::new();
                    msg.data.hash(&mut s);
                    gossipsub::MessageId::from(s.finish().to_string())
                };

                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .message_id_fn(message_id_fn)
                    .build()
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

                let store = kad::store::MemoryStore::new(key.public().to_peer_id());
                let kademlia = kad::Behaviour::new(key.public().to_peer_id(), store);

                let identify = identify::Behaviour::new(identify::Config::new(
                    config.protocol_version.clone(),
                    key.public(),
                ));

                let ping = ping::Behaviour::default();

                Ok(OracleBehaviour { gossipsub, kademlia, identify, ping })
            })?
            .build();

        swarm.behaviour_mut().gossipsub.subscribe(&topic)?;

        let listen_addr: Multiaddr = config.listen_addr.parse()?;
        swarm.listen_on(listen_addr)?;

        let mut bootstrap_addrs = Vec::new();
        for addr_str in &config.bootstrap_peers {
            if let Ok(addr) = addr_str.parse::<Multiaddr>() {
                if let Some(libp2p::multiaddr::Protocol::P2p(peer_id)) = addr.iter().last() {
                    swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
                    debug!(peer = %peer_id, "added bootstrap peer");
                }
                if let Err(e) = swarm.dial(addr.clone()) {
                    warn!(addr = %addr, error = %e, "failed to dial bootstrap peer");
                }
                bootstrap_addrs.push(addr);
            }
        }

        let local_peer_id = *swarm.local_peer_id();
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (control_tx, control_rx) = mpsc::channel(16);
        let peers = PeerTracker::default();

        let network = P2pNetwork {
            swarm,
            topic,
            outbound_rx,
            inbound_tx,
            control_rx,
            peers: peers.clone(),
            bootstrap_addrs,
        };
        let handle = P2pHandle {
            outbound_tx,
            inbound_rx,
            control_tx,
            local_peer_id,
            peers,
        };

        Ok((network, handle))
    }

    /// Publish one envelope, retrying up to `PUBLISH_RETRIES` times at
    /// `PUBLISH_RETRY_INTERVAL`, each attempt bounded by `PUBLISH_TIMEOUT`.
    async fn publish_with_retry(&mut self, envelope: &Envelope) {
        let data = envelope.to_bytes();
        for attempt in 0..=constants::PUBLISH_RETRIES {
            let result = tokio::time::timeout(constants::PUBLISH_TIMEOUT, async {
                self.swarm
                    .behaviour_mut()
                    .gossipsub
                    .publish(self.topic.clone(), data.clone())
            })
            .await;

            match result {
                Ok(Ok(_)) => return,
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "gossipsub publish failed");
                }
                Err(_) => {
                    warn!(attempt, "gossipsub publish timed out");
                }
            }

            if attempt < constants::PUBLISH_RETRIES {
                tokio::time::sleep(constants::PUBLISH_RETRY_INTERVAL).await;
            }
        }
    }

    /// Drive the P2P event loop. Run in a dedicated tokio task.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(envelope) = self.outbound_rx.recv() => {
                    self.publish_with_retry(&envelope).await;
                }

                Some(control) = self.control_rx.recv() => {
                    match control {
                        ControlMsg::Resubscribe => {
                            match self.swarm.behaviour_mut().gossipsub.subscribe(&self.topic) {
                                Ok(_) => info!("resubscribed to signing topic"),
                                Err(e) => warn!(error = %e, "resubscribe failed"),
                            }
                        }
                        ControlMsg::Reconnect => {
                            for addr in self.bootstrap_addrs.clone() {
                                if let Err(e) = self.swarm.dial(addr.clone()) {
                                    warn!(addr = %addr, error = %e, "peer supervisor: redial failed");
                                } else {
                                    debug!(addr = %addr, "peer supervisor: redialing bootstrap peer");
                                }
                            }
                        }
                    }
                }

                event = self.swarm.select_next_some() => {
                    match event {
                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "p2p listening on");
                        }
                        SwarmEvent::Behaviour(OracleBehaviourEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            self.peers.touch_message();
                            match Envelope::from_bytes(&message.data) {
                                Ok(envelope) => {
                                    let _ = self.inbound_tx.send(envelope).await;
                                }
                                Err(e) => {
                                    debug!(error = %e, "dropping undecodable gossip message");
                                }
                            }
                        }
                        SwarmEvent::Behaviour(OracleBehaviourEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            for addr in info.listen_addrs {
                                self.swarm
                                    .behaviour_mut()
                                    .kademlia
                                    .add_address(&peer_id, addr);
                            }
                        }
                        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                            self.peers.touch_peer(peer_id);
                            debug!(peer = %peer_id, "connection established");
                        }
                        SwarmEvent::ConnectionClosed { peer_id, .. } => {
                            debug!(peer = %peer_id, "connection closed");
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Map a libp2p/transport-layer failure onto the shared error type, for
/// callers above this crate that only want `OracleError`.
pub fn transport_error(e: impl std::fmt::Display) -> OracleError {
    OracleError::Transport(e.to_string())
}
