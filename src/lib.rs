pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{
    Ledger, LedgerData, LedgerEntry, NewLedgerEntry, TamperEvidentLedger, VerificationReport,
    GENESIS_PREV_HASH,
};
pub use store::LedgerStore;
