pub mod schema;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Backend, LedgerConfig};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Ledger;
use crate::store::{LedgerStore, MemoryStore, PostgresStore, SqliteStore};

/// Connection to the configured ledger backend.
#[derive(Clone)]
pub enum Database {
    Postgres(PgPool),
    Sqlite(SqlitePool),
    Memory(MemoryStore),
}

impl Database {
    pub async fn connect(config: &LedgerConfig) -> LedgerResult<Self> {
        let acquire_timeout = Duration::from_secs(config.acquire_timeout_secs);
        let database = match config.backend {
            Backend::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.database_url)
                    .await?;
                Database::Postgres(pool)
            }
            Backend::Sqlite => Database::Sqlite(
                connect_sqlite(&config.database_url, config.max_connections, acquire_timeout).await?,
            ),
            Backend::Memory => Database::Memory(MemoryStore::new()),
        };
        info!("Database connected ({:?})", config.backend);

        if config.run_migrations {
            database.run_migrations().await?;
        }
        Ok(database)
    }

    /// Migrated single-connection SQLite database that lives as long as the pool.
    pub async fn new_in_memory() -> LedgerResult<Self> {
        let pool = connect_sqlite("sqlite::memory:", 1, Duration::from_secs(30)).await?;
        let database = Database::Sqlite(pool);
        database.run_migrations().await?;
        Ok(database)
    }

    pub async fn run_migrations(&self) -> LedgerResult<()> {
        let result = match self {
            Database::Postgres(pool) => sqlx::raw_sql(schema::POSTGRES_SCHEMA)
                .execute(pool)
                .await
                .map(|_| ()),
            Database::Sqlite(pool) => sqlx::raw_sql(schema::SQLITE_SCHEMA)
                .execute(pool)
                .await
                .map(|_| ()),
            Database::Memory(_) => return Ok(()),
        };
        result.map_err(|e| LedgerError::Migration(e.to_string()))?;

        info!("Database migrations completed");
        Ok(())
    }

    pub fn store(&self) -> Arc<dyn LedgerStore> {
        match self {
            Database::Postgres(pool) => Arc::new(PostgresStore::new(pool.clone())),
            Database::Sqlite(pool) => Arc::new(SqliteStore::new(pool.clone())),
            Database::Memory(store) => Arc::new(store.clone()),
        }
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.store())
    }

    pub async fn close(&self) {
        match self {
            Database::Postgres(pool) => pool.close().await,
            Database::Sqlite(pool) => pool.close().await,
            Database::Memory(_) => {}
        }
    }
}

async fn connect_sqlite(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> LedgerResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    // Every connection to an in-memory database opens a fresh, empty one.
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections)
    };

    let pool = pool_options
        .acquire_timeout(acquire_timeout)
        .connect_with(options)
        .await?;
    Ok(pool)
}
