//! frozenDB: an embeddable, single-file, append-only key-to-JSON-value
//! store keyed by time-ordered UUIDv7 identifiers.
//!
//! [`Database`] is the primary entry point: [`DatabaseConfig`] builds one,
//! [`Database::get`] reads a committed value by key, and
//! [`Database::begin_tx`] opens an append transaction.

pub mod checksum_tracker;
pub mod codec;
pub mod config;
pub mod database;
pub mod emitter;
pub mod error;
pub mod file_manager;
pub mod finder;
pub mod row;
pub mod transaction;
pub mod transaction_replay;

pub use config::DatabaseConfig;
pub use database::{Database, FinderStrategy};
pub use error::{Error, Result};
pub use transaction::Transaction;
