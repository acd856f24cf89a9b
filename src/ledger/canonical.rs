//! Canonical Serialization
//!
//! The chain hash is `SHA256(serialize(data) ++ prev_hash)`. `serialize` must
//! give identical bytes for identical payloads, so payloads are written as
//! compact JSON with object keys in sorted order at every level.
//! Keys are sorted here rather than trusting `serde_json::Map` iteration
//! order, which follows insertion order once any crate in the build enables
//! serde_json's `preserve_order` feature.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::LedgerResult;
use crate::ledger::entry::LedgerData;

/// Serialize a payload to its canonical JSON form.
pub fn canonical_json(data: &LedgerData) -> LedgerResult<String> {
    Ok(serde_json::to_string(&SortedMap(data))?)
}

struct SortedMap<'a>(&'a Map<String, Value>);

impl Serialize for SortedMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&String, &Value)> = self.0.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, &SortedValue(value))?;
        }
        map.end()
    }
}

struct SortedValue<'a>(&'a Value);

impl Serialize for SortedValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(map) => SortedMap(map).serialize(serializer),
            Value::Array(items) => serializer.collect_seq(items.iter().map(SortedValue)),
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Hex SHA-256 of the serialized payload followed by the previous hash.
pub fn compute_hash(data_json: &str, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data_json.as_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize and hash in one step.
pub fn hash_data(data: &LedgerData, prev_hash: &str) -> LedgerResult<String> {
    let data_json = canonical_json(data)?;
    Ok(compute_hash(&data_json, prev_hash))
}
