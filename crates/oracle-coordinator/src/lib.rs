//! oracle-coordinator
//!
//! Tracks in-flight `SignRequest`s awaiting quorum, dispatches incoming
//! `sign_response` envelopes against that pending table, and persists
//! confirmed state to the store. Background tasks retry unresolved
//! requests and sweep expired ones.

use std::collections::HashMap;
use std::sync::RwLock;

use oracle_core::{constants, Address, OracleError, OracleHash, PendingRequest, SignRequest, SignResponse, TrustedSet};
use oracle_crypto::{recover_address, text_hash};
use oracle_p2p::{Envelope, P2pHandle};
use oracle_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Coordinates a single signing topic: owns the pending table, the trusted
/// signer set, and the connection to durable storage.
pub struct Coordinator {
    store: Store,
    trusted: TrustedSet,
    pending: RwLock<HashMap<OracleHash, PendingRequest>>,
    outbound_tx: tokio::sync::mpsc::Sender<Envelope>,
}

impl Coordinator {
    pub fn new(store: Store, trusted: TrustedSet, handle: &P2pHandle) -> Self {
        Self {
            store,
            trusted,
            pending: RwLock::new(HashMap::new()),
            outbound_tx: handle.outbound_tx.clone(),
        }
    }

    /// `⌊|TrustedSet| / 2⌋ + 1`.
    pub fn threshold(&self) -> usize {
        self.trusted.threshold()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().expect("pending lock poisoned").len()
    }

    /// Register a new observation for signing: persist it, track it as
    /// pending, and broadcast the full `sign_request` over gossip.
    pub async fn broadcast_sign_request(&self, request: SignRequest) -> Result<(), OracleError> {
        self.handle_sign_request(request.clone());
        self.publish(Envelope::SignRequest { request })
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), tokio::sync::mpsc::error::SendError<Envelope>> {
        self.outbound_tx.send(envelope).await
    }

    /// Dispatch an inbound envelope: a `sign_request` is admitted into the
    /// pending table (even one authored by another coordinator instance on
    /// the same topic); a `sign_response` is validated and recorded.
    pub async fn handle_envelope(&self, envelope: Envelope) {
        match envelope {
            Envelope::SignRequest { request } => self.handle_sign_request(request),
            Envelope::SignResponse { response } => {
                if let Err(e) = self.handle_sign_response(response) {
                    debug!(error = %e, "dropping sign_response");
                }
            }
        }
    }

    /// Idempotently admit an observed request: persist its data (if any —
    /// retry re-broadcasts carry only the hash) and insert a pending entry
    /// if one isn't already tracked, preserving whichever entry was created
    /// first.
    fn handle_sign_request(&self, request: SignRequest) {
        if !request.is_bare() {
            if let Err(e) = self.store.store_data(
                request.hash,
                request.data.clone(),
                request.data_structure.clone(),
                request.data_structure_meta.clone(),
                request.timestamp,
                request.data_structure_id,
            ) {
                warn!(hash = %request.hash, error = %e, "failed to persist observed sign_request");
            }
        }

        self.pending
            .write()
            .expect("pending lock poisoned")
            .entry(request.hash)
            .or_insert_with(|| PendingRequest::new(request));
    }

    /// Validate and record a signer's response. Never panics on malformed
    /// or unexpected input — every failure is a dropped, logged error.
    fn handle_sign_response(&self, response: SignResponse) -> Result<(), OracleError> {
        if !self.trusted.contains(&response.peer_id) {
            return Err(OracleError::UnknownSigner(response.peer_id.to_string()));
        }

        let digest = text_hash(response.hash.as_bytes());
        let recovered = recover_address(&digest, &response.signature)
            .ok_or_else(|| OracleError::Parse("signature did not recover an address".into()))?;
        if recovered != response.peer_id {
            return Err(OracleError::UnknownSigner(format!(
                "recovered address {recovered} does not match claimed signer {}",
                response.peer_id
            )));
        }

        if !self
            .pending
            .read()
            .expect("pending lock poisoned")
            .contains_key(&response.hash)
        {
            return Err(OracleError::UnknownHash(response.hash.to_string()));
        }

        // Persist before admitting the signer into `pending` so an external
        // observer never sees a signer counted toward quorum whose
        // signature isn't durable yet.
        self.store
            .store_signature(response.hash, response.peer_id, response.signature)?;

        let mut pending = self.pending.write().expect("pending lock poisoned");
        let Some(entry) = pending.get_mut(&response.hash) else {
            // Raced with an expiry sweep between the presence check above
            // and the write lock here; the signature is already durable,
            // which is all a confirmed-quorum query needs.
            return Ok(());
        };

        let signers_before = entry.signers.len();
        let is_new = entry.signers.insert(response.peer_id);
        let threshold = self.trusted.threshold();
        if is_new && signers_before < threshold && entry.signers.len() >= threshold {
            info!(hash = %response.hash, signers = entry.signers.len(), threshold, "quorum reached");
        }
        // Every trusted signer has now responded; no further signature can
        // ever arrive for this hash, so retire it immediately rather than
        // waiting for the expiry sweep.
        if is_new && entry.signers.len() >= self.trusted.len() {
            pending.remove(&response.hash);
        }

        info!(hash = %response.hash, signer = %response.peer_id, "accepted signature");
        Ok(())
    }

    /// Drop pending entries older than `DEFAULT_PENDING_EXPIRY`.
    pub fn sweep_expired(&self) {
        let mut pending = self.pending.write().expect("pending lock poisoned");
        let before = pending.len();
        pending.retain(|_, req| !req.is_expired(constants::DEFAULT_PENDING_EXPIRY));
        let dropped = before - pending.len();
        if dropped > 0 {
            debug!(dropped, "expired pending requests swept");
        }
    }

    /// Re-broadcast a bare `sign_request` for every pending hash that has
    /// not yet reached quorum.
    pub async fn retry_unresolved(&self) {
        let threshold = self.threshold();
        let hashes: Vec<OracleHash> = {
            let pending = self.pending.read().expect("pending lock poisoned");
            pending
                .iter()
                .filter(|(_, req)| req.signers.len() < threshold)
                .map(|(hash, _)| *hash)
                .collect()
        };

        for hash in hashes {
            if let Err(e) = self.publish(Envelope::SignRequest { request: SignRequest::bare(hash) }).await {
                warn!(hash = %hash, error = %e, "retry broadcast failed");
            }
        }
    }

    /// Ticker loop: re-broadcast unresolved requests every
    /// `BROADCAST_RETRY_INTERVAL`. Runs until `cancel` fires.
    pub async fn run_retry_broadcaster(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(constants::BROADCAST_RETRY_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.retry_unresolved().await,
            }
        }
    }

    /// Ticker loop: sweep expired entries every `EXPIRY_SWEEP_INTERVAL`.
    /// Runs until `cancel` fires.
    pub async fn run_expiry_sweeper(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(constants::EXPIRY_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.sweep_expired(),
            }
        }
    }

    /// Number of distinct trusted signatures collected so far for `hash`.
    pub fn signature_count(&self, hash: &OracleHash) -> usize {
        self.pending
            .read()
            .expect("pending lock poisoned")
            .get(hash)
            .map(|req| req.signers.len())
            .unwrap_or(0)
    }

    pub fn is_trusted(&self, addr: &Address) -> bool {
        self.trusted.contains(addr)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::Signature;
    use oracle_crypto::KeyPair;

    fn build(
        n_signers: usize,
    ) -> (Coordinator, Vec<KeyPair>, tokio::sync::mpsc::Receiver<Envelope>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();

        let keys: Vec<KeyPair> = (0..n_signers).map(|_| KeyPair::generate()).collect();
        let trusted = TrustedSet::new(keys.iter().map(|k| k.address()));

        let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(16);
        let (_inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(16);
        let (control_tx, _control_rx) = tokio::sync::mpsc::channel(16);
        let handle = P2pHandle {
            outbound_tx,
            inbound_rx,
            control_tx,
            local_peer_id: libp2p::PeerId::random(),
            peers: oracle_p2p::network::PeerTracker::default(),
        };

        let coordinator = Coordinator::new(store, trusted, &handle);
        (coordinator, keys, outbound_rx, dir)
    }

    fn sign_response_from(kp: &KeyPair, hash: OracleHash) -> SignResponse {
        let digest = text_hash(hash.as_bytes());
        let signature = kp.sign(&digest).unwrap();
        SignResponse { hash, signature, peer_id: kp.address() }
    }

    #[tokio::test]
    async fn quorum_is_reached_at_trusted_set_threshold() {
        let (coordinator, keys, _rx, _dir) = build(3);
        let request = SignRequest {
            hash: OracleHash::from_bytes([1u8; 32]),
            data: vec![],
            data_structure: vec!["noop".into()],
            data_structure_meta: vec![],
            data_structure_id: 0,
            timestamp: 1,
        };
        coordinator.broadcast_sign_request(request.clone()).await.unwrap();
        assert_eq!(coordinator.threshold(), 2);

        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&keys[0], request.hash) })
            .await;
        assert_eq!(coordinator.signature_count(&request.hash), 1);

        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&keys[1], request.hash) })
            .await;
        assert_eq!(coordinator.signature_count(&request.hash), 2);
    }

    #[tokio::test]
    async fn duplicate_response_from_same_signer_is_ignored() {
        let (coordinator, keys, _rx, _dir) = build(3);
        let request = SignRequest {
            hash: OracleHash::from_bytes([2u8; 32]),
            data: vec![],
            data_structure: vec!["noop".into()],
            data_structure_meta: vec![],
            data_structure_id: 0,
            timestamp: 1,
        };
        coordinator.broadcast_sign_request(request.clone()).await.unwrap();

        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&keys[0], request.hash) })
            .await;
        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&keys[0], request.hash) })
            .await;

        assert_eq!(coordinator.signature_count(&request.hash), 1);
    }

    #[tokio::test]
    async fn untrusted_signer_is_rejected() {
        let (coordinator, _keys, _rx, _dir) = build(3);
        let request = SignRequest {
            hash: OracleHash::from_bytes([3u8; 32]),
            data: vec![],
            data_structure: vec!["noop".into()],
            data_structure_meta: vec![],
            data_structure_id: 0,
            timestamp: 1,
        };
        coordinator.broadcast_sign_request(request.clone()).await.unwrap();

        let outsider = KeyPair::generate();
        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&outsider, request.hash) })
            .await;

        assert_eq!(coordinator.signature_count(&request.hash), 0);
    }

    #[tokio::test]
    async fn response_for_unknown_hash_is_dropped_without_panicking() {
        let (coordinator, keys, _rx, _dir) = build(3);
        let unknown_hash = OracleHash::from_bytes([9u8; 32]);
        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&keys[0], unknown_hash) })
            .await;
        assert_eq!(coordinator.signature_count(&unknown_hash), 0);
    }

    #[tokio::test]
    async fn forged_signature_with_mismatched_claimed_signer_is_rejected() {
        let (coordinator, keys, _rx, _dir) = build(3);
        let request = SignRequest {
            hash: OracleHash::from_bytes([4u8; 32]),
            data: vec![],
            data_structure: vec!["noop".into()],
            data_structure_meta: vec![],
            data_structure_id: 0,
            timestamp: 1,
        };
        coordinator.broadcast_sign_request(request.clone()).await.unwrap();

        let mut forged = sign_response_from(&keys[0], request.hash);
        forged.peer_id = keys[1].address();
        coordinator.handle_envelope(Envelope::SignResponse { response: forged }).await;

        assert_eq!(coordinator.signature_count(&request.hash), 0);
    }

    #[tokio::test]
    async fn garbage_signature_bytes_are_dropped_not_panicked_on() {
        let (coordinator, keys, _rx, _dir) = build(3);
        let request = SignRequest {
            hash: OracleHash::from_bytes([5u8; 32]),
            data: vec![],
            data_structure: vec!["noop".into()],
            data_structure_meta: vec![],
            data_structure_id: 0,
            timestamp: 1,
        };
        coordinator.broadcast_sign_request(request.clone()).await.unwrap();

        let garbage = SignResponse {
            hash: request.hash,
            signature: Signature::from_bytes([0u8; 65]),
            peer_id: keys[0].address(),
        };
        coordinator.handle_envelope(Envelope::SignResponse { response: garbage }).await;
        assert_eq!(coordinator.signature_count(&request.hash), 0);
    }

    #[tokio::test]
    async fn pending_entry_is_retired_once_every_trusted_signer_has_responded() {
        let (coordinator, keys, _rx, _dir) = build(3);
        let request = SignRequest {
            hash: OracleHash::from_bytes([6u8; 32]),
            data: vec![],
            data_structure: vec!["noop".into()],
            data_structure_meta: vec![],
            data_structure_id: 0,
            timestamp: 1,
        };
        coordinator.broadcast_sign_request(request.clone()).await.unwrap();
        assert_eq!(coordinator.pending_count(), 1);

        for kp in &keys {
            coordinator
                .handle_envelope(Envelope::SignResponse { response: sign_response_from(kp, request.hash) })
                .await;
        }

        assert_eq!(coordinator.pending_count(), 0);
        let sigs = coordinator.store().get_signatures(&request.hash).unwrap().unwrap();
        assert_eq!(sigs.len(), 3);
    }

    #[tokio::test]
    async fn quorum_met_but_not_maximal_entry_survives_until_expiry_sweep() {
        let (coordinator, keys, _rx, _dir) = build(3);
        let request = SignRequest {
            hash: OracleHash::from_bytes([7u8; 32]),
            data: vec![],
            data_structure: vec!["noop".into()],
            data_structure_meta: vec![],
            data_structure_id: 0,
            timestamp: 1,
        };
        coordinator.broadcast_sign_request(request.clone()).await.unwrap();

        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&keys[0], request.hash) })
            .await;
        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&keys[1], request.hash) })
            .await;

        assert_eq!(coordinator.pending_count(), 1, "quorum met but third signer never responded");
        let sigs = coordinator.store().get_signatures(&request.hash).unwrap().unwrap();
        assert_eq!(sigs.len(), 2, "both accepted signatures remain in storage after retirement");
    }

    #[tokio::test]
    async fn observed_sign_request_from_another_coordinator_is_admitted_once() {
        let (coordinator, keys, _rx, _dir) = build(3);
        let request = SignRequest {
            hash: OracleHash::from_bytes([8u8; 32]),
            data: vec![serde_json::json!("1")],
            data_structure: vec!["uint256".into()],
            data_structure_meta: vec!["price".into()],
            data_structure_id: 7,
            timestamp: 42,
        };

        // This coordinator never called `broadcast_sign_request` itself —
        // it only observes the request on the shared topic, as if authored
        // by a mirror coordinator.
        coordinator.handle_envelope(Envelope::SignRequest { request: request.clone() }).await;
        assert_eq!(coordinator.pending_count(), 1);
        assert_eq!(coordinator.store().get_data(&request.hash).unwrap().unwrap().data, request.data);

        // A bare re-broadcast of the same hash must not replace the
        // already-tracked entry or re-persist empty data over it.
        coordinator
            .handle_envelope(Envelope::SignRequest { request: SignRequest::bare(request.hash) })
            .await;
        assert_eq!(coordinator.pending_count(), 1);
        assert_eq!(coordinator.store().get_data(&request.hash).unwrap().unwrap().data, request.data);

        coordinator
            .handle_envelope(Envelope::SignResponse { response: sign_response_from(&keys[0], request.hash) })
            .await;
        assert_eq!(coordinator.signature_count(&request.hash), 1);
    }
}
