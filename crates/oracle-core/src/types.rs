use std::fmt;

use serde::{Deserialize, Serialize};

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

// ── Hash ─────────────────────────────────────────────────────────────────────

/// A 32-byte keccak256 digest, the canonical identifier of a `Record`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OracleHash(pub [u8; 32]);

impl OracleHash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl TryFrom<String> for OracleHash {
    type Error = hex::FromHexError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<OracleHash> for String {
    fn from(h: OracleHash) -> Self {
        h.to_hex()
    }
}

impl fmt::Display for OracleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for OracleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OracleHash({}…)", &self.to_hex()[..10])
    }
}

// ── Address ──────────────────────────────────────────────────────────────────

/// A 20-byte Ethereum-style address, recovered from a secp256k1 public key.
/// Hex comparisons elsewhere in the system are documented as case-insensitive;
/// internally addresses are always held and compared as raw bytes, which
/// sidesteps the case question entirely — parsing normalizes case away.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_bytes(b: [u8; 20]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl TryFrom<String> for Address {
    type Error = hex::FromHexError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> Self {
        a.to_hex()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

// ── Signature ────────────────────────────────────────────────────────────────

/// A 65-byte secp256k1 signature: `r(32) || s(32) || v(1)`, the recovery id
/// appended as the final byte. Hex-encoded on the wire as `0x` + 130 chars.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Signature(pub [u8; 65]);

impl Signature {
    pub fn from_bytes(b: [u8; 65]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: [u8; 65] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl TryFrom<String> for Signature {
    type Error = hex::FromHexError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<Signature> for String {
    fn from(s: Signature) -> Self {
        s.to_hex()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}…)", &self.to_hex()[..10])
    }
}

// ── SignRequest / SignResponse ───────────────────────────────────────────────

/// A request to sign the canonical hash of an observation.
///
/// Re-broadcasts from the coordinator's retry path carry only `hash`
/// (everything else is empty) — signers only need the hash to sign.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignRequest {
    pub hash: OracleHash,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
    #[serde(default)]
    pub data_structure: Vec<String>,
    #[serde(default)]
    pub data_structure_meta: Vec<String>,
    #[serde(default)]
    pub data_structure_id: u64,
    #[serde(default)]
    pub timestamp: Timestamp,
}

impl SignRequest {
    /// A bare re-broadcast carrying only the hash.
    pub fn bare(hash: OracleHash) -> Self {
        Self {
            hash,
            data: Vec::new(),
            data_structure: Vec::new(),
            data_structure_meta: Vec::new(),
            data_structure_id: 0,
            timestamp: 0,
        }
    }

    /// Whether this is a bare re-broadcast (no observation payload attached).
    pub fn is_bare(&self) -> bool {
        self.data_structure.is_empty()
    }
}

/// A signer's response to a `SignRequest`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignResponse {
    pub hash: OracleHash,
    pub signature: Signature,
    pub peer_id: Address,
}

// ── PendingRequest ───────────────────────────────────────────────────────────

/// The coordinator's in-flight bookkeeping for a hash awaiting quorum.
/// Volatile: rebuilt on demand, never persisted (see design notes).
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub created_at: std::time::Instant,
    pub signers: std::collections::HashSet<Address>,
    pub data: SignRequest,
}

impl PendingRequest {
    pub fn new(data: SignRequest) -> Self {
        Self {
            created_at: std::time::Instant::now(),
            signers: std::collections::HashSet::new(),
            data,
        }
    }

    pub fn is_expired(&self, expiry: std::time::Duration) -> bool {
        self.created_at.elapsed() >= expiry
    }
}

// ── Record ───────────────────────────────────────────────────────────────────

/// The durable representation of an observation: data + schema + timestamp +
/// signature map, keyed by its canonical hash. Written once, extended by
/// accepted signatures, never deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub hash: OracleHash,
    pub data: Vec<serde_json::Value>,
    pub data_structure: Vec<String>,
    pub data_structure_meta: Vec<String>,
    pub data_structure_id: u64,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub signatures: std::collections::BTreeMap<Address, Signature>,
}

impl Record {
    /// Number of distinct trusted signatures currently stored for this record.
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }
}

// ── TrustedSet ───────────────────────────────────────────────────────────────

/// The configured set of signer addresses. Immutable at runtime; its size
/// defines the quorum denominator.
#[derive(Clone, Debug)]
pub struct TrustedSet {
    addresses: std::collections::HashSet<Address>,
}

impl TrustedSet {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.addresses.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// `⌊|TrustedSet| / 2⌋ + 1` — minimum distinct trusted signatures for a
    /// hash to be considered confirmed.
    pub fn threshold(&self) -> usize {
        self.addresses.len() / 2 + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }
}
