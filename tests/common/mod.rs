#![allow(dead_code)]

use serde_json::{json, Value};
use shop_ledger::database::Database;
use shop_ledger::{Ledger, LedgerData, LedgerEntry, NewLedgerEntry, TamperEvidentLedger};
use sqlx::SqlitePool;

pub const TENANT: &str = "tenant-acme-motors";

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

/// Ledger plus raw pool access for tampering with stored rows
pub async fn setup_test_ledger() -> (Ledger, SqlitePool) {
    let db = setup_test_db().await;
    let pool = match &db {
        Database::Sqlite(pool) => pool.clone(),
        _ => unreachable!("new_in_memory always opens SQLite"),
    };
    (db.ledger(), pool)
}

pub fn payload(value: Value) -> LedgerData {
    value
        .as_object()
        .cloned()
        .expect("test payloads are JSON objects")
}

pub fn status(value: &str) -> LedgerData {
    payload(json!({ "status": value }))
}

/// Append entries one after another, threading each hash into the next entry.
pub async fn append_chain(
    ledger: &Ledger,
    entity_type: &str,
    entity_id: &str,
    payloads: Vec<LedgerData>,
) -> Vec<LedgerEntry> {
    let mut entries: Vec<LedgerEntry> = Vec::new();
    for data in payloads {
        let prev_hash = entries
            .last()
            .map(|entry| entry.hash.clone())
            .unwrap_or_default();
        let action = if entries.is_empty() { "create" } else { "update" };
        let entry = ledger
            .append(NewLedgerEntry::new(
                TENANT,
                entity_type,
                entity_id,
                action,
                data,
                prev_hash,
            ))
            .await
            .expect("append failed");
        entries.push(entry);
    }
    entries
}

/// Work order moving through a typical repair lifecycle
pub fn work_order_lifecycle() -> Vec<LedgerData> {
    vec![
        payload(json!({"status": "pending", "vehicle": {"vin": "1HGCM82633A004352", "mileage": 120431}})),
        payload(json!({"status": "in_progress", "technician": "bay-3"})),
        payload(json!({"status": "done", "labor_hours": 2.5, "parts": ["oil filter", "5W-30"]})),
    ]
}

pub fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(input.as_bytes()))
}
