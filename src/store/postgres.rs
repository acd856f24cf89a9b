//! PostgreSQL ledger store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::entry::{LedgerEntry, LedgerRecord};
use crate::store::{extends_tip, LedgerStore, StoredRow};

const SELECT_ENTITY_HISTORY: &str = r#"
    SELECT id, tenant_id, entity_type, entity_id, action, data, prev_hash, hash, created_at
    FROM ledger_entries
    WHERE entity_type = $1 AND entity_id = $2
    ORDER BY created_at ASC, seq ASC
"#;

const SELECT_TIP_HASH: &str = r#"
    SELECT hash
    FROM ledger_entries
    WHERE entity_type = $1 AND entity_id = $2
    ORDER BY created_at DESC, seq DESC
    LIMIT 1
"#;

// created_at never steps behind the entity's current tip.
const INSERT_ENTRY: &str = r#"
    INSERT INTO ledger_entries
        (id, tenant_id, entity_type, entity_id, action, data, prev_hash, hash, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, GREATEST(
        clock_timestamp(),
        COALESCE(
            (SELECT MAX(created_at) FROM ledger_entries WHERE entity_type = $3 AND entity_id = $4),
            '-infinity'::timestamptz
        )
    ))
    RETURNING created_at
"#;

const LOCK_ENTITY_CHAIN: &str = r#"
    SELECT pg_advisory_xact_lock(hashtextextended($1::text || '/' || $2::text, 0))
"#;

/// Ledger store backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_on(conn: &mut PgConnection, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let id = Uuid::new_v4();
        let created_at: DateTime<Utc> = sqlx::query_scalar(INSERT_ENTRY)
            .bind(id)
            .bind(&record.entry.tenant_id)
            .bind(&record.entry.entity_type)
            .bind(&record.entry.entity_id)
            .bind(&record.entry.action)
            .bind(&record.data_json)
            .bind(&record.entry.prev_hash)
            .bind(&record.hash)
            .fetch_one(&mut *conn)
            .await?;

        let entry = record.into_entry(id, created_at);
        debug!("Stored ledger entry: {}", entry.summary());
        Ok(entry)
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn insert(&self, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_on(&mut *conn, record).await
    }

    async fn insert_if_tip(&self, record: LedgerRecord) -> LedgerResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;

        // Serializes checked appends per entity until the transaction ends.
        sqlx::query(LOCK_ENTITY_CHAIN)
            .bind(&record.entry.entity_type)
            .bind(&record.entry.entity_id)
            .execute(&mut *tx)
            .await?;

        let tip: Option<String> = sqlx::query_scalar(SELECT_TIP_HASH)
            .bind(&record.entry.entity_type)
            .bind(&record.entry.entity_id)
            .fetch_optional(&mut *tx)
            .await?;

        if !extends_tip(&record.entry.prev_hash, tip.as_deref()) {
            // Dropping the transaction rolls it back and releases the lock.
            return Err(LedgerError::chain_conflict(
                &record.entry.entity_type,
                &record.entry.entity_id,
                &record.entry.prev_hash,
                tip,
            ));
        }

        let entry = Self::insert_on(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(entry)
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

fn decode_row(row: &PgRow) -> LedgerResult<StoredRow> {
    Ok(StoredRow {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        action: row.try_get("action")?,
        data: row.try_get("data")?,
        prev_hash: row.try_get("prev_hash")?,
        hash: row.try_get("hash")?,
        created_at: row.try_get("created_at")?,
    })
}
