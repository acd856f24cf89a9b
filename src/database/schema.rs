// Ledger table definitions, one file per backend.

pub const POSTGRES_SCHEMA: &str = include_str!("../../migrations/postgres/001_ledger_entries.sql");
pub const SQLITE_SCHEMA: &str = include_str!("../../migrations/sqlite/001_ledger_entries.sql");
