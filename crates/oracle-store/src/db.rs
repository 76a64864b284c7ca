use std::path::Path;

use oracle_core::{constants, Address, OracleError, OracleHash, Record, Signature, Timestamp};
use std::sync::RwLock;

/// Summary statistics for a data structure id, as returned by
/// `GetDataStructureStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataStructureStats {
    pub count: usize,
    pub max_timestamp: Option<Timestamp>,
    pub max_confirmed_timestamp: Option<Timestamp>,
}

/// Persistent indexed store: hash → record, hash → signature-set, plus a
/// composite index space supporting latest-by-field, pagination, and
/// quorum-aware queries.
///
/// Backed by a single flat sled tree with byte-prefix key separation (see
/// the key schema table in the design notes). All write paths are
/// serialized through a single writer lock; reads take a shared lock. sled's
/// own per-key atomicity is assumed; multi-key writes (record + indices) are
/// not atomic as a set, which is tolerable because readers skip undecodable
/// records.
pub struct Store {
    db: sled::Db,
    lock: RwLock<()>,
}

fn storage_err(e: impl std::fmt::Display) -> OracleError {
    OracleError::Storage(e.to_string())
}

fn parse_err(e: impl std::fmt::Display) -> OracleError {
    OracleError::Parse(e.to_string())
}

/// Zero-padded fixed-width decimal encoding of a timestamp, so lexicographic
/// byte ordering over the key agrees with numeric ordering regardless of
/// digit count (see design notes on timestamp key ordering).
fn encode_timestamp(ts: Timestamp) -> String {
    format!("{:0width$}", ts.max(0), width = constants::TIMESTAMP_KEY_WIDTH)
}

fn data_key(hash: &OracleHash) -> String {
    format!("data:{}", hash.to_hex())
}

fn sig_key(hash: &OracleHash) -> String {
    format!("sig:{}", hash.to_hex())
}

fn ds_key(ds_id: u64) -> String {
    format!("ds:{ds_id}")
}

fn tidx_prefix(ds_id: u64) -> String {
    format!("tidx:{ds_id}:")
}

fn tidx_key(ds_id: u64, ts: Timestamp, hash: &OracleHash) -> String {
    format!("tidx:{ds_id}:{}:{}", encode_timestamp(ts), hash.to_hex())
}

fn fidx_prefix(ds_id: u64, field: &str, value: &str) -> String {
    format!("fidx:{ds_id}:{field}:{value}:")
}

fn fidx_key(ds_id: u64, field: &str, value: &str, hash: &OracleHash) -> String {
    format!("fidx:{ds_id}:{field}:{value}:{}", hash.to_hex())
}

/// Value as it appears in a field index key: mirrors how the value would be
/// rendered in JSON, minus surrounding quotes for strings.
fn field_index_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A record stripped of its signature map, the shape persisted under `data:`.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct RecordBody {
    hash: OracleHash,
    data: Vec<serde_json::Value>,
    data_structure: Vec<String>,
    data_structure_meta: Vec<String>,
    data_structure_id: u64,
    timestamp: Timestamp,
}

fn normalize_page(page: i64) -> usize {
    if page < 1 {
        1
    } else {
        page as usize
    }
}

fn normalize_limit(limit: i64) -> usize {
    if limit < 1 || limit as usize > constants::MAX_PAGE_LIMIT {
        constants::DEFAULT_PAGE_LIMIT
    } else {
        limit as usize
    }
}

impl Store {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OracleError> {
        let db = sled::open(path).map_err(storage_err)?;
        Ok(Self {
            db,
            lock: RwLock::new(()),
        })
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    /// Persist a record and its indices. Idempotent on the `ds:` write;
    /// always (re)writes `data:` and the index entries.
    pub fn store_data(
        &self,
        hash: OracleHash,
        data: Vec<serde_json::Value>,
        structure: Vec<String>,
        meta: Vec<String>,
        timestamp: Timestamp,
        ds_id: u64,
    ) -> Result<(), OracleError> {
        let _guard = self.lock.write().expect("store writer lock poisoned");

        let body = RecordBody {
            hash,
            data: data.clone(),
            data_structure: structure.clone(),
            data_structure_meta: meta.clone(),
            data_structure_id: ds_id,
            timestamp,
        };
        let body_json = serde_json::to_vec(&body).map_err(parse_err)?;
        self.db
            .insert(data_key(&hash), body_json)
            .map_err(storage_err)?;

        let ds_key = ds_key(ds_id);
        if !self.db.contains_key(&ds_key).map_err(storage_err)? {
            let structure_json = serde_json::to_vec(&structure).map_err(parse_err)?;
            self.db.insert(ds_key, structure_json).map_err(storage_err)?;
        }

        self.db
            .insert(tidx_key(ds_id, timestamp, &hash), b"".as_ref())
            .map_err(storage_err)?;

        for (field, value) in meta.iter().zip(data.iter()) {
            let value_str = field_index_value(value);
            self.db
                .insert(fidx_key(ds_id, field, &value_str, &hash), b"".as_ref())
                .map_err(storage_err)?;
        }

        Ok(())
    }

    /// Accept a signature for `hash`. The signature map is a whole-object
    /// rewrite on each call (see design notes); the writer lock serializes
    /// concurrent acceptances so no signature is lost to a lost update.
    pub fn store_signature(
        &self,
        hash: OracleHash,
        signer: Address,
        sig: Signature,
    ) -> Result<(), OracleError> {
        let _guard = self.lock.write().expect("store writer lock poisoned");

        let mut sigs = self.read_signatures(&hash)?.unwrap_or_default();
        sigs.insert(signer, sig);
        let bytes = serde_json::to_vec(&sigs).map_err(parse_err)?;
        self.db
            .insert(sig_key(&hash), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    fn read_signatures(
        &self,
        hash: &OracleHash,
    ) -> Result<Option<std::collections::BTreeMap<Address, Signature>>, OracleError> {
        match self.db.get(sig_key(hash)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(parse_err)?)),
            None => Ok(None),
        }
    }

    fn read_body(&self, hash: &OracleHash) -> Result<Option<RecordBody>, OracleError> {
        match self.db.get(data_key(hash)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(parse_err)?)),
            None => Ok(None),
        }
    }

    /// Join `data:<hash>` with `sig:<hash>`, skipping records whose body is
    /// undecodable (tolerated per the non-atomic multi-key write policy).
    fn join_record(&self, hash: &OracleHash) -> Result<Option<Record>, OracleError> {
        let Some(body) = self.read_body(hash)? else {
            return Ok(None);
        };
        let signatures = self.read_signatures(hash)?.unwrap_or_default();
        Ok(Some(Record {
            hash: body.hash,
            data: body.data,
            data_structure: body.data_structure,
            data_structure_meta: body.data_structure_meta,
            data_structure_id: body.data_structure_id,
            timestamp: body.timestamp,
            signatures,
        }))
    }

    /// `GetData(hash) → record?, exists`.
    pub fn get_data(&self, hash: &OracleHash) -> Result<Option<Record>, OracleError> {
        let _guard = self.lock.read().expect("store reader lock poisoned");
        self.join_record(hash)
    }

    /// `GetSignatures(hash) → map<addr,sig>, exists`.
    pub fn get_signatures(
        &self,
        hash: &OracleHash,
    ) -> Result<Option<std::collections::BTreeMap<Address, Signature>>, OracleError> {
        let _guard = self.lock.read().expect("store reader lock poisoned");
        self.read_signatures(hash)
    }

    /// Hashes in `tidx:<ds_id>:` order, oldest first.
    fn time_index_hashes(&self, ds_id: u64) -> Result<Vec<OracleHash>, OracleError> {
        let prefix = tidx_prefix(ds_id);
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(storage_err)?;
            let key_str = String::from_utf8_lossy(&key);
            if let Some(hash_hex) = key_str.rsplit(':').next() {
                if let Ok(hash) = OracleHash::from_hex(hash_hex) {
                    out.push(hash);
                }
            }
        }
        Ok(out)
    }

    /// `GetAllMessages(dsId, page, limit)`: reverse-chronological page.
    pub fn get_all_messages(
        &self,
        ds_id: u64,
        page: i64,
        limit: i64,
    ) -> Result<Vec<Record>, OracleError> {
        let _guard = self.lock.read().expect("store reader lock poisoned");
        let page = normalize_page(page);
        let limit = normalize_limit(limit);

        let hashes = self.time_index_hashes(ds_id)?;
        let mut out = Vec::with_capacity(limit);
        for hash in hashes.into_iter().rev().skip((page - 1) * limit).take(limit) {
            if let Some(record) = self.join_record(&hash)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// `GetLatestMessage(dsId) → record?, exists`. Existence requires a
    /// joinable signature map, not merely a decodable record.
    pub fn get_latest_message(&self, ds_id: u64) -> Result<Option<Record>, OracleError> {
        let _guard = self.lock.read().expect("store reader lock poisoned");
        let hashes = self.time_index_hashes(ds_id)?;
        for hash in hashes.into_iter().rev() {
            if let Some(record) = self.join_record(&hash)? {
                if !record.signatures.is_empty() || self.read_signatures(&hash)?.is_some() {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// `GetMessagesByField(dsId, field, value, page, limit)`: matching
    /// records, descending by timestamp. Note the skip offset is `page *
    /// limit`, matching the distilled contract exactly (not `(page-1) *
    /// limit`, unlike `GetAllMessages`).
    pub fn get_messages_by_field(
        &self,
        ds_id: u64,
        field: &str,
        value: &str,
        page: i64,
        limit: i64,
    ) -> Result<Vec<Record>, OracleError> {
        let _guard = self.lock.read().expect("store reader lock poisoned");
        let page = normalize_page(page);
        let limit = normalize_limit(limit);

        let prefix = fidx_prefix(ds_id, field, value);
        let mut hashes = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(storage_err)?;
            let key_str = String::from_utf8_lossy(&key);
            if let Some(hash_hex) = key_str.rsplit(':').next() {
                if let Ok(hash) = OracleHash::from_hex(hash_hex) {
                    hashes.push(hash);
                }
            }
        }

        let mut records: Vec<Record> = hashes
            .into_iter()
            .skip(page * limit)
            .take(limit)
            .filter_map(|h| self.join_record(&h).ok().flatten())
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// `GetLatestByField(dsId, threshold, field, value)`: the record with
    /// the maximum timestamp among those whose signature count meets
    /// `threshold`.
    pub fn get_latest_by_field(
        &self,
        ds_id: u64,
        threshold: usize,
        field: &str,
        value: &str,
    ) -> Result<Option<Record>, OracleError> {
        let _guard = self.lock.read().expect("store reader lock poisoned");
        let prefix = fidx_prefix(ds_id, field, value);
        let mut best: Option<Record> = None;
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(storage_err)?;
            let key_str = String::from_utf8_lossy(&key);
            let Some(hash_hex) = key_str.rsplit(':').next() else {
                continue;
            };
            let Ok(hash) = OracleHash::from_hex(hash_hex) else {
                continue;
            };
            let Some(record) = self.join_record(&hash)? else {
                continue;
            };
            if record.signature_count() < threshold {
                continue;
            }
            if best.as_ref().map(|b| record.timestamp > b.timestamp).unwrap_or(true) {
                best = Some(record);
            }
        }
        Ok(best)
    }

    /// `GetDataStructures() → list<dsId>`.
    pub fn get_data_structures(&self) -> Result<Vec<u64>, OracleError> {
        let _guard = self.lock.read().expect("store reader lock poisoned");
        let mut out = Vec::new();
        for item in self.db.scan_prefix(b"ds:") {
            let (key, _) = item.map_err(storage_err)?;
            let key_str = String::from_utf8_lossy(&key);
            if let Some(id_str) = key_str.strip_prefix("ds:") {
                if let Ok(id) = id_str.parse::<u64>() {
                    out.push(id);
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// `GetDataStructureStats(dsId, threshold)`.
    pub fn get_data_structure_stats(
        &self,
        ds_id: u64,
        threshold: usize,
    ) -> Result<DataStructureStats, OracleError> {
        let _guard = self.lock.read().expect("store reader lock poisoned");
        let hashes = self.time_index_hashes(ds_id)?;
        let mut stats = DataStructureStats {
            count: hashes.len(),
            ..Default::default()
        };
        for hash in &hashes {
            let Some(record) = self.join_record(hash)? else {
                continue;
            };
            stats.max_timestamp = Some(
                stats
                    .max_timestamp
                    .map_or(record.timestamp, |m| m.max(record.timestamp)),
            );
            if record.signature_count() >= threshold {
                stats.max_confirmed_timestamp = Some(
                    stats
                        .max_confirmed_timestamp
                        .map_or(record.timestamp, |m| m.max(record.timestamp)),
                );
            }
        }
        Ok(stats)
    }

    /// Flush and close the underlying database.
    pub fn close(&self) -> Result<(), OracleError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}
