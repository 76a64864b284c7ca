//! oracle-signer
//!
//! Signer-side half of the protocol: on every `sign_request`, optionally
//! re-derive the canonical hash from the attached observation to catch a
//! forged request, sign the EIP-191 text-hash of the request's hash, and
//! publish a `sign_response`.

use oracle_core::{Address, OracleError, OracleHash, SignRequest, SignResponse, Signature};
use oracle_crypto::{canonical_hash, text_hash, KeyPair};
use oracle_p2p::{Envelope, P2pHandle};
use tracing::{debug, warn};

pub struct Signer {
    keypair: KeyPair,
    outbound_tx: tokio::sync::mpsc::Sender<Envelope>,
}

impl Signer {
    pub fn new(keypair: KeyPair, handle: &P2pHandle) -> Self {
        Self {
            keypair,
            outbound_tx: handle.outbound_tx.clone(),
        }
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    /// Sign the EIP-191 text-hash of `hash`.
    pub fn sign(&self, hash: OracleHash) -> Result<Signature, OracleError> {
        let digest = text_hash(hash.as_bytes());
        self.keypair.sign(&digest)
    }

    /// React to an inbound envelope. Signers only act on `sign_request`;
    /// `sign_response` (another signer's broadcast) is ignored.
    pub async fn handle_envelope(&self, envelope: Envelope) {
        if let Envelope::SignRequest { request } = envelope {
            if let Err(e) = self.handle_sign_request(request).await {
                debug!(error = %e, "dropping sign_request");
            }
        }
    }

    async fn handle_sign_request(&self, request: SignRequest) -> Result<(), OracleError> {
        if !request.is_bare() {
            let recomputed = canonical_hash(
                &serde_json::to_string(&request.data).map_err(|e| OracleError::Parse(e.to_string()))?,
                request.timestamp,
            );
            if recomputed != request.hash {
                return Err(OracleError::Parse(format!(
                    "canonical hash mismatch: request claims {} but data hashes to {}",
                    request.hash, recomputed
                )));
            }
        }

        let signature = self.sign(request.hash)?;
        let response = SignResponse {
            hash: request.hash,
            signature,
            peer_id: self.address(),
        };

        self.outbound_tx
            .send(Envelope::SignResponse { response })
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        Ok(())
    }
}

/// Reference `Sign` used by tests and by callers outside the gossip path
/// (e.g. a local CLI) that just want a signature over a hash.
pub fn sign_hash(keypair: &KeyPair, hash: OracleHash) -> Result<Signature, OracleError> {
    let digest = text_hash(hash.as_bytes());
    keypair.sign(&digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_crypto::recover_address;

    fn test_handle() -> (P2pHandle, tokio::sync::mpsc::Receiver<Envelope>) {
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
        (handle, outbound_rx)
    }

    #[tokio::test]
    async fn signs_and_publishes_a_response_for_a_matching_request() {
        let (handle, mut outbound_rx) = test_handle();
        let keypair = KeyPair::generate();
        let signer = Signer::new(keypair, &handle);

        let data = vec![serde_json::json!("100")];
        let timestamp = 1_700_000_000;
        let hash = canonical_hash(&serde_json::to_string(&data).unwrap(), timestamp);
        let request = SignRequest {
            hash,
            data,
            data_structure: vec!["string".into()],
            data_structure_meta: vec!["price".into()],
            data_structure_id: 1,
            timestamp,
        };

        signer.handle_envelope(Envelope::SignRequest { request }).await;

        let Envelope::SignResponse { response } = outbound_rx.recv().await.unwrap() else {
            panic!("expected a sign_response");
        };
        assert_eq!(response.hash, hash);
        assert_eq!(response.peer_id, signer.address());

        let digest = text_hash(hash.as_bytes());
        let recovered = recover_address(&digest, &response.signature).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[tokio::test]
    async fn bare_retry_request_is_signed_without_data_to_validate() {
        let (handle, mut outbound_rx) = test_handle();
        let keypair = KeyPair::generate();
        let signer = Signer::new(keypair, &handle);

        let hash = OracleHash::from_bytes([7u8; 32]);
        signer
            .handle_envelope(Envelope::SignRequest { request: SignRequest::bare(hash) })
            .await;

        let Envelope::SignResponse { response } = outbound_rx.recv().await.unwrap() else {
            panic!("expected a sign_response");
        };
        assert_eq!(response.hash, hash);
    }

    #[tokio::test]
    async fn forged_request_with_mismatched_hash_is_dropped_silently() {
        let (handle, mut outbound_rx) = test_handle();
        let keypair = KeyPair::generate();
        let signer = Signer::new(keypair, &handle);

        let request = SignRequest {
            hash: OracleHash::from_bytes([0xffu8; 32]),
            data: vec![serde_json::json!("not the real data")],
            data_structure: vec!["string".into()],
            data_structure_meta: vec!["price".into()],
            data_structure_id: 1,
            timestamp: 1,
        };

        signer.handle_envelope(Envelope::SignRequest { request }).await;
        assert!(outbound_rx.try_recv().is_err());
    }
}
