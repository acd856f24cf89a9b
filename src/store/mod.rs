//! Ledger storage port.
//!
//! The ledger only talks to storage through [`LedgerStore`], so any backend
//! able to insert rows and select them by entity can carry a chain.

pub mod memory;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{LedgerData, LedgerEntry, LedgerRecord};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Storage backend trait
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a sealed record, assigning its id and timestamp.
    async fn insert(&self, record: LedgerRecord) -> LedgerResult<LedgerEntry>;

    /// Persist only if the entity's current tip hash equals `record`'s
    /// `prev_hash` (an empty chain matches the genesis sentinel). Fails with
    /// `LedgerError::ChainConflict` otherwise.
    async fn insert_if_tip(&self, record: LedgerRecord) -> LedgerResult<LedgerEntry>;

    /// All entries of one entity, oldest first.
    async fn select_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> LedgerResult<Vec<LedgerEntry>>;

    /// Hash of the newest entry of one entity.
    async fn tip_hash(&self, entity_type: &str, entity_id: &str) -> LedgerResult<Option<String>>;
}

/// Whether `prev_hash` may be appended on top of `tip`.
pub(crate) fn extends_tip(prev_hash: &str, tip: Option<&str>) -> bool {
    match tip {
        Some(tip) => tip == prev_hash,
        None => prev_hash == crate::ledger::entry::GENESIS_PREV_HASH,
    }
}

/// Row as read back from a SQL backend, before the payload is parsed.
pub(crate) struct StoredRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub data: String,
    pub prev_hash: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl StoredRow {
    pub fn into_entry(self) -> LedgerResult<LedgerEntry> {
        let data: LedgerData = serde_json::from_str(&self.data).map_err(|e| {
            LedgerError::corrupt_record(self.id.to_string(), format!("invalid data payload: {}", e))
        })?;

        Ok(LedgerEntry {
            id: self.id,
            tenant_id: self.tenant_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            action: self.action,
            data,
            prev_hash: self.prev_hash,
            hash: self.hash,
            timestamp: self.created_at,
        })
    }
}
