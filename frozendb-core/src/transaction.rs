//! The append transaction state machine: `add_row` → optional `savepoint` →
//! `commit` or `rollback`.
//!
//! Every row is written incrementally as it's added — `ROW_START` and the
//! start-control byte first, then the key and payload — rather than
//! buffered until commit, so a crash mid-row leaves a recognizable
//! [`PartialDataRow`](crate::row::partial) state for recovery to classify.
//! The end-control byte pair, the only part of a row that depends on what
//! happens *after* it, is filled in only when the row is finalized: by the
//! next `add_row`, or by `commit`/`rollback` for the transaction's last row.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use crate::checksum_tracker::ChecksumTracker;
use crate::codec::{uuid_timestamp_ms, validate_uuidv7, ROW_END};
use crate::error::Error;
use crate::file_manager::FileManager;
use crate::row::control::{EndControl, StartControl};
use crate::row::data::marshal_body;
use crate::row::null::NullRow;

struct PendingRow {
    /// Bytes written to disk so far for this row, up through the padded
    /// payload (`ROW_START`, start_control, key, payload) — `row_size - 5`
    /// bytes, kept here so the end-control's LRC parity can be computed
    /// without re-reading the file.
    body: Vec<u8>,
    flagged: bool,
}

/// One open append transaction, owned freely by its caller (no borrow back
/// to [`crate::database::Database`]): [`crate::database::Database::begin_tx`]
/// enforces the one-at-a-time rule with a shared `transaction_open` flag
/// instead, so a `Transaction` can be stored, moved, or held across a loop
/// iteration like any other owned value.
pub struct Transaction {
    file: Arc<FileManager>,
    row_size: u64,
    skew_ms: i64,
    checksum_tracker: Arc<Mutex<ChecksumTracker>>,
    max_timestamp: Arc<AtomicI64>,
    transaction_open: Arc<AtomicBool>,
    rows_in_tx: u32,
    pending: Option<PendingRow>,
    savepoint_count: u8,
    closed: bool,
}

impl Transaction {
    pub(crate) fn begin(
        file: Arc<FileManager>,
        row_size: u64,
        skew_ms: i64,
        checksum_tracker: Arc<Mutex<ChecksumTracker>>,
        max_timestamp: Arc<AtomicI64>,
        transaction_open: Arc<AtomicBool>,
    ) -> Self {
        Transaction {
            file,
            row_size,
            skew_ms,
            checksum_tracker,
            max_timestamp,
            transaction_open,
            rows_in_tx: 0,
            pending: None,
            savepoint_count: 0,
            closed: false,
        }
    }

    /// Row index this transaction will occupy once its first row lands —
    /// i.e. the current file size translated to a row index. Used by
    /// callers that need to know the index before the row is visible.
    pub fn next_row_index(&self) -> u64 {
        (self.file.size() - crate::row::header::HEADER_LEN as u64) / self.row_size
    }

    /// Appends one key/value row to the transaction.
    ///
    /// `key` must be a UUIDv7 whose timestamp satisfies
    /// `timestamp + skew_ms > max_timestamp_so_far`, where `max_timestamp_so_far`
    /// is the highest timestamp seen across every key ever added, committed
    /// or not.
    #[instrument(skip(self, value), fields(row_size = self.row_size))]
    pub fn add_row(&mut self, key: Uuid, value: &Value) -> Result<(), Error> {
        self.ensure_open()?;
        validate_uuidv7(&key, false)?;

        let timestamp = uuid_timestamp_ms(&key);
        let max_timestamp = self.max_timestamp.load(Ordering::Acquire);
        if timestamp + self.skew_ms <= max_timestamp {
            return Err(Error::KeyOrdering {
                timestamp,
                skew_ms: self.skew_ms,
                max_timestamp,
            });
        }

        let payload = serde_json::to_vec(value)
            .map_err(|e| Error::invalid_input(format!("value is not serializable JSON: {e}")))?;

        self.finalize_pending(
            if self.pending_flagged() {
                EndControl::SavepointIntermediate
            } else {
                EndControl::Intermediate
            },
            false,
        )?;

        let start_control = if self.rows_in_tx == 0 {
            StartControl::Transaction
        } else {
            StartControl::Continuation
        };
        let body = marshal_body(start_control, &key, &payload, self.row_size as usize)?;

        self.file.write(body[..2].to_vec(), false)?;
        self.file.write(body[2..].to_vec(), false)?;
        self.checksum_tracker.lock().record_bytes(&body);

        self.max_timestamp.fetch_max(timestamp, Ordering::AcqRel);
        self.rows_in_tx += 1;
        self.pending = Some(PendingRow { body, flagged: false });
        Ok(())
    }

    /// Flags the most recently added row as a savepoint, returning its
    /// 1-indexed savepoint number (1 through 9). Rolling back to this
    /// number later discards every row added after it.
    #[instrument(skip(self))]
    pub fn savepoint(&mut self) -> Result<u8, Error> {
        self.ensure_open()?;
        if self.pending.is_none() {
            return Err(Error::invalid_action(
                "savepoint requires a row to have been added first",
            ));
        }
        if self.savepoint_count >= 9 {
            return Err(Error::invalid_input(
                "at most 9 savepoints are supported per transaction",
            ));
        }
        self.file.write(vec![b'S'], false)?;
        self.checksum_tracker.lock().record_bytes(&[b'S']);
        self.pending.as_mut().expect("checked above").flagged = true;
        self.savepoint_count += 1;
        Ok(self.savepoint_count)
    }

    /// Commits the transaction. If no rows were added, writes a single
    /// `NullRow` marking an empty commit instead of finalizing a pending row.
    #[instrument(skip(self))]
    pub fn commit(mut self) -> Result<(), Error> {
        self.ensure_open()?;
        if self.rows_in_tx == 0 {
            self.write_null_row()?;
        } else {
            let end_control = if self.pending_flagged() {
                EndControl::SavepointCommit
            } else {
                EndControl::Commit
            };
            self.finalize_pending(end_control, true)?;
        }
        self.closed = true;
        Ok(())
    }

    /// Rolls the transaction back to `target` (1-9), discarding every row
    /// added after that savepoint, or to `0`, discarding the whole
    /// transaction. A no-op on disk if no row was ever added.
    #[instrument(skip(self))]
    pub fn rollback(mut self, target: u8) -> Result<(), Error> {
        self.ensure_open()?;
        if target > self.savepoint_count {
            return Err(Error::invalid_input(format!(
                "rollback target {target} exceeds the {} savepoint(s) recorded so far",
                self.savepoint_count
            )));
        }
        if self.rows_in_tx > 0 {
            let end_control = if self.pending_flagged() {
                EndControl::SavepointRollback(target)
            } else {
                EndControl::Rollback(target)
            };
            self.finalize_pending(end_control, true)?;
        }
        self.closed = true;
        Ok(())
    }

    fn pending_flagged(&self) -> bool {
        self.pending.as_ref().map(|p| p.flagged).unwrap_or(false)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::invalid_action("transaction already committed or rolled back"));
        }
        Ok(())
    }

    /// Writes the end-control suffix for the currently pending row — just
    /// the second end-control byte, parity, and `ROW_END` if a prior
    /// `savepoint()` call already put the leading `S` byte on disk, or the
    /// full two-byte end-control otherwise — and advances the checksum
    /// interval. `fsync` should be `true` only at a transaction's terminal
    /// write (commit or rollback); intermediate rows within a still-open
    /// transaction don't need to be durable on their own.
    fn finalize_pending(&mut self, end_control: EndControl, fsync: bool) -> Result<(), Error> {
        let pending = match self.pending.take() {
            Some(p) => p,
            None => return Ok(()),
        };

        let end_bytes = end_control.to_bytes();
        let mut full = pending.body.clone();
        full.extend_from_slice(&end_bytes);
        let parity = crate::codec::lrc_parity(&full);

        let mut suffix = if pending.flagged {
            vec![end_bytes[1]]
        } else {
            end_bytes.to_vec()
        };
        suffix.extend_from_slice(&parity);
        suffix.push(ROW_END);

        self.file.write(suffix.clone(), fsync)?;

        let mut tracker = self.checksum_tracker.lock();
        tracker.record_bytes(&suffix);
        if let Some(checksum_row) = tracker.complete_row() {
            drop(tracker);
            self.file
                .write(checksum_row.marshal(self.row_size as usize), fsync)?;
        }
        Ok(())
    }

    fn write_null_row(&mut self) -> Result<(), Error> {
        let timestamp_ms = self.max_timestamp.load(Ordering::Acquire);
        let row = NullRow { timestamp_ms }.marshal(self.row_size as usize);
        self.file.write(row.clone(), true)?;

        let mut tracker = self.checksum_tracker.lock();
        tracker.record_bytes(&row);
        if let Some(checksum_row) = tracker.complete_row() {
            drop(tracker);
            self.file
                .write(checksum_row.marshal(self.row_size as usize), true)?;
        }
        Ok(())
    }
}

impl Drop for Transaction {
    /// A `Transaction` dropped without an explicit `commit`/`rollback` (e.g.
    /// the caller returned early via `?`) behaves like `rollback(0)`: the
    /// in-progress row, if any, is finalized as fully discarded so the file
    /// never carries a permanently dangling open transaction. Either way,
    /// releases the `transaction_open` flag so the next `begin_tx` can
    /// proceed.
    fn drop(&mut self) {
        if !self.closed && self.rows_in_tx > 0 {
            let end_control = if self.pending_flagged() {
                EndControl::SavepointRollback(0)
            } else {
                EndControl::Rollback(0)
            };
            if let Err(e) = self.finalize_pending(end_control, true) {
                tracing::error!(error = %e, "failed to finalize abandoned transaction on drop");
            }
        }
        self.transaction_open.store(false, Ordering::Release);
    }
}
