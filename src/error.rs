use thiserror::Error;

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err)
    }
}

impl From<::config::ConfigError> for LedgerError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("Corrupt ledger record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error(
        "Chain conflict for {entity_type}/{entity_id}: expected tip {expected:?}, found {actual:?}"
    )]
    ChainConflict {
        entity_type: String,
        entity_id: String,
        expected: String,
        actual: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn corrupt_record(id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::CorruptRecord {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn chain_conflict(
        entity_type: &str,
        entity_id: &str,
        expected: &str,
        actual: Option<String>,
    ) -> Self {
        Self::ChainConflict {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            expected: expected.to_string(),
            actual,
        }
    }

    /// True when a checked append lost a race against another writer.
    pub fn is_chain_conflict(&self) -> bool {
        matches!(self, Self::ChainConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_conflict_display() {
        let err = LedgerError::chain_conflict("work_order", "wo-1", "", Some("abc".to_string()));
        assert!(err.is_chain_conflict());
        let msg = err.to_string();
        assert!(msg.contains("work_order/wo-1"));
        assert!(msg.contains("\"abc\""));
    }

    #[test]
    fn test_sqlx_error_is_carried_unchanged() {
        let err: LedgerError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, LedgerError::Database(sqlx::Error::RowNotFound)));
    }
}
