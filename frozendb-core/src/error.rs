//! Error taxonomy for the storage engine.
//!
//! Each variant corresponds to one of the error kinds enumerated in the
//! format specification (invalid input, out-of-order API use, I/O, on-disk
//! corruption, key ordering, tombstoning, active-transaction conflicts,
//! missing keys, path problems, and read failures). Callers match on the
//! variant, not on the message text.

use std::io;
use std::path::PathBuf;

use snafu::Snafu;

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A caller-supplied argument, row, or header failed a structural or
    /// semantic check that has nothing to do with on-disk state: a bad
    /// UUID version, an oversized payload, a malformed header field.
    #[snafu(display("invalid input: {message}"))]
    InvalidInput { message: String },

    /// An API was called out of order: no active transaction, a writer
    /// slot already taken, a closed or tombstoned component.
    #[snafu(display("invalid action: {message}"))]
    InvalidAction { message: String },

    /// An I/O or advisory-locking failure while writing.
    #[snafu(display("write error: {source}"))]
    Write { source: io::Error },

    /// An I/O failure while reading.
    #[snafu(display("read error: {source}"))]
    Read { source: io::Error },

    /// A path could not be used to open or create a database file.
    #[snafu(display("path error for {path}: {source}"))]
    Path { path: PathBuf, source: io::Error },

    /// A row, header, or checksum block failed parity/CRC/sentinel/padding
    /// validation. The database remains usable for other keys; this error
    /// is scoped to the specific read that produced it, except when raised
    /// during `Database::open`, where it is fatal.
    #[snafu(display("corrupt database: {message}"))]
    CorruptDatabase { message: String },

    /// A key's UUIDv7 timestamp did not satisfy
    /// `timestamp + skew_ms > max_timestamp_before_add`.
    #[snafu(display(
        "key ordering violation: timestamp {timestamp}ms + skew {skew_ms}ms does not exceed max_timestamp {max_timestamp}ms"
    ))]
    KeyOrdering {
        timestamp: i64,
        skew_ms: i64,
        max_timestamp: i64,
    },

    /// The component has recorded a prior write failure and will reject
    /// all further operations, permanently.
    #[snafu(display("tombstoned after prior write failure"))]
    Tombstoned,

    /// The row index falls within a transaction whose terminal row has not
    /// yet been written.
    #[snafu(display("transaction covering row {row_index} is still active"))]
    TransactionActive { row_index: u64 },

    /// No committed row maps to the requested key.
    #[snafu(display("key not found"))]
    KeyNotFound,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Stable short code used by the CLI's `Error: <code>: <message>` rendering.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput { .. } => "invalid_input",
            Error::InvalidAction { .. } => "invalid_action",
            Error::Write { .. } => "write_error",
            Error::Read { .. } => "read_error",
            Error::Path { .. } => "path_error",
            Error::CorruptDatabase { .. } => "corrupt_database",
            Error::KeyOrdering { .. } => "key_ordering",
            Error::Tombstoned => "tombstoned",
            Error::TransactionActive { .. } => "transaction_active",
            Error::KeyNotFound => "key_not_found",
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_action(message: impl Into<String>) -> Self {
        Error::InvalidAction {
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Error::CorruptDatabase {
            message: message.into(),
        }
    }
}
