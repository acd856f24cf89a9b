//! Ledger configuration
//!
//! Layered settings: built-in defaults, then an optional TOML file, then
//! `SHOP_LEDGER__*` environment variables.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};

pub const DEFAULT_CONFIG_FILE: &str = "shop-ledger.toml";
pub const ENV_PREFIX: &str = "SHOP_LEDGER";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub backend: Backend,
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub run_migrations: bool,
    pub log_filter: String,
}

impl LedgerConfig {
    /// Load settings. `path` must exist when given; otherwise
    /// `shop-ledger.toml` in the working directory is used if present.
    pub fn load(path: Option<&Path>) -> LedgerResult<Self> {
        let builder = Config::builder()
            .set_default("backend", "sqlite")?
            .set_default("database_url", "sqlite://shop-ledger.db")?
            .set_default("max_connections", 5_i64)?
            .set_default("acquire_timeout_secs", 30_i64)?
            .set_default("run_migrations", true)?
            .set_default("log_filter", "shop_ledger=info")?;

        let builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Process-local settings for tests and embedding.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory,
            database_url: String::new(),
            max_connections: 1,
            acquire_timeout_secs: 30,
            run_migrations: false,
            log_filter: "shop_ledger=info".to_string(),
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.backend != Backend::Memory && self.database_url.trim().is_empty() {
            return Err(LedgerError::Config(format!(
                "database_url is required for the {:?} backend",
                self.backend
            )));
        }

        if self.max_connections == 0 {
            return Err(LedgerError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
