//! Ledger Entry
//!
//! Defines the immutable, hash-chained records of the audit ledger and
//! the input shape callers hand to `append`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::ledger::canonical;

/// Change payload recorded with an entry. Serialized with sorted keys, see
/// [`canonical::canonical_json`].
pub type LedgerData = serde_json::Map<String, serde_json::Value>;

/// `prev_hash` of the first entry in every chain.
pub const GENESIS_PREV_HASH: &str = "";

/// Entry as supplied by the caller; the store fills in id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub data: LedgerData,
    pub prev_hash: String,
}

impl NewLedgerEntry {
    pub fn new(
        tenant_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        data: LedgerData,
        prev_hash: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            data,
            prev_hash: prev_hash.into(),
        }
    }

    /// First entry of a chain.
    pub fn genesis(
        tenant_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        data: LedgerData,
    ) -> Self {
        Self::new(tenant_id, entity_type, entity_id, action, data, GENESIS_PREV_HASH)
    }

    /// Seal the entry: serialize the payload and compute its chain hash.
    pub fn seal(self) -> LedgerResult<LedgerRecord> {
        let data_json = canonical::canonical_json(&self.data)?;
        let hash = canonical::compute_hash(&data_json, &self.prev_hash);
        Ok(LedgerRecord {
            entry: self,
            data_json,
            hash,
        })
    }
}

/// Hashed entry ready for persistence.
#[derive(Debug, Clone)]
pub struct LedgerRecord {
    pub entry: NewLedgerEntry,
    pub data_json: String,
    pub hash: String,
}

impl LedgerRecord {
    /// Attach the store-assigned identity and timestamp.
    pub fn into_entry(self, id: Uuid, timestamp: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id,
            tenant_id: self.entry.tenant_id,
            entity_type: self.entry.entity_type,
            entity_id: self.entry.entity_id,
            action: self.entry.action,
            data: self.entry.data,
            prev_hash: self.entry.prev_hash,
            hash: self.hash,
            timestamp,
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub data: LedgerData,
    pub prev_hash: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Recompute the hash from `data` and `prev_hash`.
    pub fn calculate_hash(&self) -> LedgerResult<String> {
        canonical::hash_data(&self.data, &self.prev_hash)
    }

    /// Whether the stored hash still matches the payload.
    pub fn verify_hash(&self) -> bool {
        match self.calculate_hash() {
            Ok(expected) => expected == self.hash,
            Err(_) => false,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash == GENESIS_PREV_HASH
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{}/{} {} by tenant {} ({})",
            self.entity_type,
            self.entity_id,
            self.action,
            self.tenant_id,
            self.hash.chars().take(12).collect::<String>()
        )
    }
}
