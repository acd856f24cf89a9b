//! Tamper-Evident Ledger
//!
//! Append-only audit trail for business entity mutations. Entries of one
//! `(entity_type, entity_id)` form an independent SHA-256 hash chain, so
//! editing, removing or reordering stored rows is detectable by `verify`.

pub mod canonical;
pub mod entry;
pub mod verify;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::LedgerResult;
use crate::store::LedgerStore;

pub use entry::{LedgerData, LedgerEntry, LedgerRecord, NewLedgerEntry, GENESIS_PREV_HASH};
pub use verify::{verify_chain, VerificationReport};

/// Storage-agnostic ledger contract used by upstream services.
#[async_trait]
pub trait TamperEvidentLedger: Send + Sync {
    /// Hash, timestamp and persist one entry. `prev_hash` is trusted as given.
    async fn append(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry>;

    /// Every entry of an entity, oldest first.
    async fn get_history(&self, entity_type: &str, entity_id: &str) -> LedgerResult<Vec<LedgerEntry>>;

    /// Recompute every hash and check every link of an entity chain.
    async fn verify(&self, entity_type: &str, entity_id: &str) -> LedgerResult<bool>;
}

/// Ledger service over an injected [`LedgerStore`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Append only if `entry.prev_hash` is still the entity's tip.
    ///
    /// Unlike [`TamperEvidentLedger::append`] this cannot fork a chain: a
    /// stale `prev_hash` fails with `LedgerError::ChainConflict` and nothing
    /// is written.
    pub async fn append_checked(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        let record = entry.seal()?;
        match self.store.insert_if_tip(record).await {
            Ok(entry) => {
                debug!("Appended ledger entry (checked): {}", entry.summary());
                Ok(entry)
            }
            Err(e) => {
                if e.is_chain_conflict() {
                    warn!("Rejected ledger append: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Hash of the newest entry, i.e. the `prev_hash` for the next append.
    pub async fn head_hash(&self, entity_type: &str, entity_id: &str) -> LedgerResult<Option<String>> {
        self.store.tip_hash(entity_type, entity_id).await
    }

    /// Record a mutation on top of the entity's current tip.
    pub async fn record(
        &self,
        tenant_id: &str,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        data: LedgerData,
    ) -> LedgerResult<LedgerEntry> {
        let prev_hash = self
            .head_hash(entity_type, entity_id)
            .await?
            .unwrap_or_else(|| GENESIS_PREV_HASH.to_string());

        self.append_checked(NewLedgerEntry::new(
            tenant_id,
            entity_type,
            entity_id,
            action,
            data,
            prev_hash,
        ))
        .await
    }

    /// Collect every problem in an entity chain instead of stopping at the first.
    pub async fn verify_detailed(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> LedgerResult<VerificationReport> {
        let entries = self.get_history(entity_type, entity_id).await?;
        let report = VerificationReport::from_entries(entity_type, entity_id, &entries);
        info!("{}", report.summary());
        Ok(report)
    }
}

#[async_trait]
impl TamperEvidentLedger for Ledger {
    async fn append(&self, entry: NewLedgerEntry) -> LedgerResult<LedgerEntry> {
        let record = entry.seal()?;
        let entry = self.store.insert(record).await?;
        debug!("Appended ledger entry: {}", entry.summary());
        Ok(entry)
    }

    async fn get_history(&self, entity_type: &str, entity_id: &str) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.store.select_by_entity(entity_type, entity_id).await?;
        debug!(
            "Loaded {} ledger entries for {}/{}",
            entries.len(),
            entity_type,
            entity_id
        );
        Ok(entries)
    }

    async fn verify(&self, entity_type: &str, entity_id: &str) -> LedgerResult<bool> {
        let entries = self.get_history(entity_type, entity_id).await?;
        let valid = verify_chain(&entries);
        if valid {
            info!(
                "Ledger verification successful for {}/{}: {} entries",
                entity_type,
                entity_id,
                entries.len()
            );
        } else {
            warn!("Ledger verification failed for {}/{}", entity_type, entity_id);
        }
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn status(value: &str) -> LedgerData {
        json!({ "status": value }).as_object().cloned().unwrap()
    }

    fn setup() -> (Ledger, MemoryStore) {
        let store = MemoryStore::new();
        (Ledger::new(Arc::new(store.clone())), store)
    }

    async fn append_chain(ledger: &Ledger, entity_id: &str, statuses: &[&str]) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = Vec::new();
        for value in statuses {
            let prev_hash = entries
                .last()
                .map(|entry| entry.hash.clone())
                .unwrap_or_default();
            let entry = ledger
                .append(NewLedgerEntry::new(
                    "tenant-1",
                    "work_order",
                    entity_id,
                    "status_change",
                    status(value),
                    prev_hash,
                ))
                .await
                .unwrap();
            entries.push(entry);
        }
        entries
    }

    #[tokio::test]
    async fn test_append_and_verify() {
        let (ledger, _) = setup();
        let appended = append_chain(&ledger, "wo-1", &["pending", "in_progress", "done"]).await;

        let history = ledger.get_history("work_order", "wo-1").await.unwrap();
        assert_eq!(history, appended);
        assert!(ledger.verify("work_order", "wo-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_history_verifies() {
        let (ledger, _) = setup();
        assert!(ledger.get_history("work_order", "none").await.unwrap().is_empty());
        assert!(ledger.verify("work_order", "none").await.unwrap());
        assert_eq!(ledger.head_hash("work_order", "none").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tampered_data_fails_verification() {
        let (ledger, store) = setup();
        append_chain(&ledger, "wo-1", &["pending", "in_progress"]).await;

        store
            .with_entries(|entries| entries[1].data = status("cancelled"))
            .await;

        assert!(!ledger.verify("work_order", "wo-1").await.unwrap());
        let report = ledger.verify_detailed("work_order", "wo-1").await.unwrap();
        assert_eq!(report.tampered, vec![1]);
    }

    #[tokio::test]
    async fn test_removed_entry_fails_verification() {
        let (ledger, store) = setup();
        append_chain(&ledger, "wo-1", &["pending", "in_progress", "done"]).await;

        store.with_entries(|entries| entries.remove(1)).await;

        assert!(!ledger.verify("work_order", "wo-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_append_checked_rejects_stale_prev_hash() {
        let (ledger, store) = setup();
        let chain = append_chain(&ledger, "wo-1", &["pending", "in_progress"]).await;

        let stale = NewLedgerEntry::new(
            "tenant-1",
            "work_order",
            "wo-1",
            "status_change",
            status("on_hold"),
            chain[0].hash.clone(),
        );
        let err = ledger.append_checked(stale).await.unwrap_err();
        match err {
            LedgerError::ChainConflict { actual, .. } => {
                assert_eq!(actual.as_deref(), Some(chain[1].hash.as_str()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_append_checked_requires_sentinel_on_empty_chain() {
        let (ledger, store) = setup();
        let orphan = NewLedgerEntry::new(
            "tenant-1",
            "work_order",
            "wo-1",
            "create",
            status("pending"),
            "deadbeef",
        );
        assert!(ledger.append_checked(orphan).await.unwrap_err().is_chain_conflict());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_record_threads_prev_hash() {
        let (ledger, _) = setup();
        let first = ledger
            .record("tenant-1", "invoice", "inv-1", "create", status("draft"))
            .await
            .unwrap();
        let second = ledger
            .record("tenant-1", "invoice", "inv-1", "update", status("sent"))
            .await
            .unwrap();

        assert_eq!(first.prev_hash, GENESIS_PREV_HASH);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(
            ledger.head_hash("invoice", "inv-1").await.unwrap().as_deref(),
            Some(second.hash.as_str())
        );
        assert!(ledger.verify("invoice", "inv-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unchecked_append_can_fork() {
        let (ledger, _) = setup();
        let chain = append_chain(&ledger, "wo-1", &["pending"]).await;

        for value in ["in_progress", "on_hold"] {
            ledger
                .append(NewLedgerEntry::new(
                    "tenant-1",
                    "work_order",
                    "wo-1",
                    "status_change",
                    status(value),
                    chain[0].hash.clone(),
                ))
                .await
                .unwrap();
        }

        assert!(!ledger.verify("work_order", "wo-1").await.unwrap());
        let report = ledger.verify_detailed("work_order", "wo-1").await.unwrap();
        assert_eq!(report.forks.len(), 1);
        assert_eq!(report.forks[0].indices, vec![1, 2]);
    }
}
