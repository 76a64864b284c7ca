use oracle_core::OracleHash;
use sha3::Digest;

/// Keccak-256 hash (Ethereum's hash function, distinct from SHA3-256).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = sha3::Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// The EIP-191 personal-sign digest: `keccak256("\x19Ethereum Signed Message:\n32" || hashBytes)`.
///
/// This is the digest signers actually sign, domain-separating oracle
/// messages from arbitrary 32-byte payloads and matching the on-chain
/// `recoverSigner` path.
pub fn text_hash(hash_bytes: &[u8; 32]) -> [u8; 32] {
    let prefix = b"\x19Ethereum Signed Message:\n32";
    let mut input = Vec::with_capacity(prefix.len() + 32);
    input.extend_from_slice(prefix);
    input.extend_from_slice(hash_bytes);
    keccak256(&input)
}

/// Compute the canonical record hash: `keccak256(abi.encodePacked(json(data), uint256(timestamp)))`.
///
/// `json` must already be the deterministic canonical JSON encoding of the
/// record's `data` field (array order preserved, numbers without trailing
/// zeros, big integers as decimal strings). This is the single interop point
/// with the on-chain verifier contract: any deviation here breaks `ecrecover`
/// agreement on the other side.
pub fn canonical_hash(json: &str, timestamp: i64) -> OracleHash {
    let mut packed = Vec::with_capacity(json.len() + 32);
    packed.extend_from_slice(json.as_bytes());
    packed.extend_from_slice(&crate::pack::pack_uint256(timestamp as u128));
    OracleHash::from_bytes(keccak256(&packed))
}
