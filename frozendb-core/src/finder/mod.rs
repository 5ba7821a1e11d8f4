//! Key lookup strategies.
//!
//! All three trade memory for query speed differently, but answer the same
//! three questions: where is this key's row, where does its transaction
//! start, and where (if anywhere) does it end. [`Database`](crate::database::Database)
//! picks one at open time and never needs to know which.

pub mod binary_search;
pub mod in_memory;
pub mod simple;

use uuid::Uuid;

use crate::error::Error;
use crate::file_manager::FileManager;
use crate::row::header::HEADER_LEN;
use crate::row::Row;

/// A pluggable strategy for resolving keys to row indices and rows to their
/// enclosing transaction's boundaries.
pub trait Finder: Send + Sync {
    /// Returns the row index of `key`'s committed `DataRow`, or `None` if no
    /// committed row carries that key.
    fn get_index(&self, key: &Uuid) -> Result<Option<u64>, Error>;

    /// Returns the row index of the `Transaction`-start row of the
    /// transaction that `row_index` belongs to.
    fn get_transaction_start(&self, row_index: u64) -> Result<u64, Error>;

    /// Returns the row index of the terminal row of the transaction that
    /// `row_index` belongs to, or [`Error::TransactionActive`] if that
    /// transaction has not yet terminated.
    fn get_transaction_end(&self, row_index: u64) -> Result<u64, Error>;

    /// The highest key timestamp observed across every row ever written,
    /// committed or not.
    fn max_timestamp(&self) -> i64;
}

/// Reads and parses the row at `row_index` (0-based, past the 64-byte header).
pub(crate) fn read_row(file: &FileManager, row_size: u64, row_index: u64) -> Result<Row, Error> {
    let offset = HEADER_LEN as u64 + row_index * row_size;
    let bytes = file.read(offset, row_size as usize)?;
    Row::parse(&bytes)
}

fn row_start_control(row: &Row) -> Option<crate::row::control::StartControl> {
    match row {
        Row::Data(d) => Some(d.start_control),
        Row::Null(_) => Some(crate::row::control::StartControl::Transaction),
        Row::Checksum(_) => None,
    }
}

fn row_end_control(row: &Row) -> Option<crate::row::control::EndControl> {
    match row {
        Row::Data(d) => Some(d.end_control),
        Row::Null(_) => Some(crate::row::control::EndControl::Null),
        Row::Checksum(_) => None,
    }
}

/// Scans backward from `row_index` (inclusive) to find the `Transaction`-start
/// row of its enclosing transaction, skipping over `ChecksumRow`s.
pub(crate) fn scan_transaction_start(
    file: &FileManager,
    row_size: u64,
    row_index: u64,
) -> Result<u64, Error> {
    let mut idx = row_index;
    loop {
        let row = read_row(file, row_size, idx)?;
        match row_start_control(&row) {
            Some(crate::row::control::StartControl::Transaction) => return Ok(idx),
            Some(crate::row::control::StartControl::Continuation) => {
                if idx == 0 {
                    return Err(Error::corrupt(
                        "continuation row at index 0 has no preceding transaction start",
                    ));
                }
                idx -= 1;
            }
            None => {
                if idx == 0 {
                    return Err(Error::corrupt(
                        "checksum row at index 0 has no preceding transaction start",
                    ));
                }
                idx -= 1;
            }
        }
    }
}

/// Scans forward from `row_index` (inclusive) to find the terminal row of
/// its enclosing transaction, skipping over `ChecksumRow`s. Returns
/// [`Error::TransactionActive`] if the scan reaches `row_count` (the number
/// of rows delivered so far) without finding one, meaning the transaction is
/// still open.
pub(crate) fn scan_transaction_end(
    file: &FileManager,
    row_size: u64,
    row_count: u64,
    row_index: u64,
) -> Result<u64, Error> {
    let mut idx = row_index;
    while idx < row_count {
        let row = read_row(file, row_size, idx)?;
        if let Some(end_control) = row_end_control(&row) {
            if end_control.is_terminal() {
                return Ok(idx);
            }
        }
        idx += 1;
    }
    Err(Error::TransactionActive { row_index })
}
