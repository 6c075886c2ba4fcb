//! # Storage Module
//!
//! Transactional persistence for the ledger and the analytics tables.

mod redb_store;

pub use redb_store::{LedgerRead, LedgerStore, ReadTx, WriteTx, day_key, day_start_millis};
