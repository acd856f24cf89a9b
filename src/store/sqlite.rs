//! SQLite ledger store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{LedgerEntry, LedgerRecord};
use crate::store::{extends_tip, LedgerStore, StoredRow};

const SELECT_ENTITY_HISTORY: &str = r#"
    SELECT id, tenant_id, entity_type, entity_id, action, data, prev_hash, hash, created_at
    FROM ledger_entries
    WHERE entity_type = ? AND entity_id = ?
    ORDER BY created_at ASC, seq ASC
"#;

const SELECT_TIP_HASH: &str = r#"
    SELECT hash
    FROM ledger_entries
    WHERE entity_type = ? AND entity_id = ?
    ORDER BY created_at DESC, seq DESC
    LIMIT 1
"#;

const SELECT_LATEST_TIMESTAMP: &str = r#"
    SELECT MAX(created_at)
    FROM ledger_entries
    WHERE entity_type = ? AND entity_id = ?
"#;

const INSERT_ENTRY: &str = r#"
    INSERT INTO ledger_entries
        (id, tenant_id, entity_type, entity_id, action, data, prev_hash, hash, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Ledger store backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_on(conn: &mut SqliteConnection, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let latest: Option<String> = sqlx::query_scalar(SELECT_LATEST_TIMESTAMP)
            .bind(&record.entry.entity_type)
            .bind(&record.entry.entity_id)
            .fetch_one(&mut *conn)
            .await?;

        let now = Utc::now().trunc_subsecs(6);
        let timestamp = match latest {
            Some(latest) => parse_timestamp("latest", &latest)?.max(now),
            None => now,
        };
        let id = Uuid::new_v4();

        sqlx::query(INSERT_ENTRY)
            .bind(id.to_string())
            .bind(&record.entry.tenant_id)
            .bind(&record.entry.entity_type)
            .bind(&record.entry.entity_id)
            .bind(&record.entry.action)
            .bind(&record.data_json)
            .bind(&record.entry.prev_hash)
            .bind(&record.hash)
            .bind(format_timestamp(&timestamp))
            .execute(&mut *conn)
            .await?;

        let entry = record.into_entry(id, timestamp);
        debug!("Stored ledger entry: {}", entry.summary());
        Ok(entry)
    }

    async fn insert_on_tip(conn: &mut SqliteConnection, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let tip: Option<String> = sqlx::query_scalar(SELECT_TIP_HASH)
            .bind(&record.entry.entity_type)
            .bind(&record.entry.entity_id)
            .fetch_optional(&mut *conn)
            .await?;

        if !extends_tip(&record.entry.prev_hash, tip.as_deref()) {
            return Err(LedgerError::chain_conflict(
                &record.entry.entity_type,
                &record.entry.entity_id,
                &record.entry.prev_hash,
                tip,
            ));
        }

        Self::insert_on(conn, record).await
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn insert(&self, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let entry = Self::insert_on(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn insert_if_tip(&self, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        // IMMEDIATE takes the write lock up front so the tip read and the
        // insert cannot interleave with another writer. Dropping the
        // transaction, including on cancellation, rolls it back.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        match Self::insert_on_tip(&mut *tx, record).await {
            Ok(entry) => {
                tx.commit().await?;
                Ok(entry)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Failed to roll back conditional append: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn select_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(SELECT_ENTITY_HISTORY)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| decode_row(row)?.into_entry())
            .collect()
    }

    async fn tip_hash(&self, entity_type: &str, entity_id: &str) -> LedgerResult<Option<String>> {
        let tip = sqlx::query_scalar(SELECT_TIP_HASH)
            .bind(entity_type)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tip)
    }
}

fn decode_row(row: &SqliteRow) -> LedgerResult<StoredRow> {
    let raw_id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|e| LedgerError::corrupt_record(raw_id.clone(), format!("invalid id: {}", e)))?;
    let created_at: String = row.try_get("created_at")?;

    Ok(StoredRow {
        id,
        tenant_id: row.try_get("tenant_id")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        action: row.try_get("action")?,
        data: row.try_get("data")?,
        prev_hash: row.try_get("prev_hash")?,
        hash: row.try_get("hash")?,
        created_at: parse_timestamp(&raw_id, &created_at)?,
    })
}

pub(crate) fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: &str, value: &str) -> LedgerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| LedgerError::corrupt_record(id, format!("invalid timestamp {:?}: {}", value, e)))
}
