use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use oracle_core::{Address, OracleError, Signature};
use zeroize::Zeroizing;

use crate::hash::keccak256;

/// A signer's secp256k1 keypair, plus its derived Ethereum-style address.
///
/// The secret key is held in a `Zeroizing` wrapper so it is wiped from
/// memory on drop; `Debug` deliberately omits it.
pub struct KeyPair {
    signing_key: Zeroizing<SigningKey>,
    pub address: Address,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Load a keypair from a 32-byte secp256k1 private key.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, OracleError> {
        let signing_key = SigningKey::from_bytes(bytes.into())
            .map_err(|e| OracleError::Config(format!("invalid private key: {e}")))?;
        Ok(Self::from_signing_key(signing_key))
    }

    /// Parse a hex-encoded (optionally `0x`-prefixed) private key.
    pub fn from_hex(key: &str) -> Result<Self, OracleError> {
        let clean = key.strip_prefix("0x").unwrap_or(key);
        let bytes = hex::decode(clean)
            .map_err(|e| OracleError::Config(format!("invalid private key hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| OracleError::Config("private key must be 32 bytes".into()))?;
        Self::from_bytes(&arr)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = public_key_to_address(signing_key.verifying_key());
        Self {
            signing_key: Zeroizing::new(signing_key),
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte digest (expected to already be an EIP-191 text-hash)
    /// and return the 65-byte `r || s || v` signature.
    pub fn sign(&self, digest: &[u8; 32]) -> Result<Signature, OracleError> {
        let (signature, recovery_id): (EcdsaSignature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| OracleError::Config(format!("signing failed: {e}")))?;

        let sig_bytes = signature.to_bytes();
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig_bytes);
        out[64] = recovery_id.to_byte() + 27;
        Ok(Signature::from_bytes(out))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {:?} }}", self.address)
    }
}

/// Derive an Ethereum-style address from a secp256k1 public key: the last 20
/// bytes of `keccak256` of the uncompressed public key (minus its `0x04`
/// prefix byte).
pub fn public_key_to_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let pubkey_bytes = point.as_bytes();
    let hash = keccak256(&pubkey_bytes[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    Address::from_bytes(addr)
}

/// Recover the signer's address from a digest and a 65-byte `r || s || v`
/// signature. Returns `None` if the signature is malformed or recovery fails.
pub fn recover_address(digest: &[u8; 32], signature: &Signature) -> Option<Address> {
    let bytes = signature.as_bytes();
    let sig = EcdsaSignature::from_slice(&bytes[..64]).ok()?;
    let v = bytes[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(recovery_byte)?;
    let verifying_key =
        VerifyingKey::recover_from_prehash(digest, &sig, recovery_id).ok()?;
    Some(public_key_to_address(&verifying_key))
}
