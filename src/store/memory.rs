//! Process-local ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{LedgerEntry, LedgerRecord};
use crate::store::{extends_tip, LedgerStore};

/// In-memory store. Insertion order is the sequence tiebreak.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries across all entities.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Raw access to stored rows, bypassing the ledger.
    #[cfg(test)]
    pub(crate) async fn with_entries<R>(&self, f: impl FnOnce(&mut Vec<LedgerEntry>) -> R) -> R {
        let mut entries = self.entries.lock().await;
        f(&mut entries)
    }

    fn tip<'a>(entries: &'a [LedgerEntry], entity_type: &str, entity_id: &str) -> Option<&'a LedgerEntry> {
        entries
            .iter()
            .filter(|entry| entry.entity_type == entity_type && entry.entity_id == entity_id)
            .max_by_key(|entry| entry.timestamp)
    }

    fn push(entries: &mut Vec<LedgerEntry>, record: LedgerRecord) -> LedgerEntry {
        let floor: Option<DateTime<Utc>> =
            Self::tip(entries, &record.entry.entity_type, &record.entry.entity_id)
                .map(|tip| tip.timestamp);
        let now = Utc::now();
        let timestamp = floor.map_or(now, |floor| floor.max(now));

        let entry = record.into_entry(Uuid::new_v4(), timestamp);
        entries.push(entry.clone());
        debug!("Stored ledger entry in memory: {}", entry.summary());
        entry
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert(&self, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let mut entries = self.entries.lock().await;
        Ok(Self::push(&mut entries, record))
    }

    async fn insert_if_tip(&self, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let mut entries = self.entries.lock().await;
        let tip = Self::tip(&entries, &record.entry.entity_type, &record.entry.entity_id)
            .map(|tip| tip.hash.clone());

        if !extends_tip(&record.entry.prev_hash, tip.as_deref()) {
            return Err(LedgerError::chain_conflict(
                &record.entry.entity_type,
                &record.entry.entity_id,
                &record.entry.prev_hash,
                tip,
            ));
        }

        Ok(Self::push(&mut entries, record))
    }

    async fn select_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.entries.lock().await;
        let mut history: Vec<LedgerEntry> = entries
            .iter()
            .filter(|entry| entry.entity_type == entity_type && entry.entity_id == entity_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        history.sort_by_key(|entry| entry.timestamp);
        Ok(history)
    }

    async fn tip_hash(&self, entity_type: &str, entity_id: &str) -> LedgerResult<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(Self::tip(&entries, entity_type, entity_id).map(|tip| tip.hash.clone()))
    }
}
