//! Shared bookkeeping for turning a stream of rows into resolved
//! transactions: which rows ended up visible, what their transaction's
//! start/end row indices are, and the running maximum key timestamp.
//!
//! [`crate::finder::simple::SimpleFinder`] and
//! [`crate::finder::in_memory::InMemoryFinder`] both drive one of these
//! from a sequence of `(row_index, &Row)` pairs; only what they do with the
//! results (a throwaway scan vs. persistent maps) differs.

use uuid::Uuid;

use crate::error::Error;
use crate::row::control::{EndControl, StartControl};
use crate::row::Row;

/// Receives the outcomes of transaction replay as they resolve.
pub trait ReplaySink {
    /// A `DataRow`'s key became visible (its transaction committed, and the
    /// row survived any savepoint rollback) at `row_index`.
    fn on_key_committed(&mut self, key: Uuid, row_index: u64);

    /// `row_index` belongs to a transaction spanning `[start, end]`
    /// (inclusive), regardless of whether that row ended up visible.
    fn on_transaction_span(&mut self, row_index: u64, start: u64, end: u64);

    /// A key (or `NullRow`) with this timestamp was observed, whether or not
    /// its transaction ultimately committed.
    fn on_max_timestamp(&mut self, timestamp_ms: i64);
}

struct OpenTransaction {
    start: u64,
    /// `(row_index, key)`; `key` is `None` for the lone row of a
    /// zero-row-committed (`NullRow`) transaction.
    rows: Vec<(u64, Option<Uuid>)>,
    /// Indices into `rows` of each savepoint-flagged row, in order.
    savepoint_marks: Vec<usize>,
}

/// Replays a linear sequence of rows, resolving each transaction as its
/// terminal row arrives.
#[derive(Default)]
pub struct TransactionReplay {
    open: Option<OpenTransaction>,
}

impl TransactionReplay {
    pub fn new() -> Self {
        TransactionReplay { open: None }
    }

    /// Feeds one more row, in file order, into the replay.
    pub fn observe(&mut self, row_index: u64, row: &Row, sink: &mut dyn ReplaySink) -> Result<(), Error> {
        match row {
            Row::Checksum(_) => Ok(()),
            Row::Data(data_row) => {
                sink.on_max_timestamp(data_row.timestamp_ms());
                self.observe_row(
                    row_index,
                    data_row.start_control,
                    Some(data_row.key),
                    data_row.end_control,
                    sink,
                )
            }
            Row::Null(null_row) => {
                sink.on_max_timestamp(null_row.timestamp_ms);
                self.observe_row(row_index, StartControl::Transaction, None, EndControl::Null, sink)
            }
        }
    }

    fn observe_row(
        &mut self,
        row_index: u64,
        start_control: StartControl,
        key: Option<Uuid>,
        end_control: EndControl,
        sink: &mut dyn ReplaySink,
    ) -> Result<(), Error> {
        match start_control {
            StartControl::Transaction => {
                if self.open.is_some() {
                    return Err(Error::corrupt(format!(
                        "row {row_index} starts a transaction while one is already open"
                    )));
                }
                self.open = Some(OpenTransaction {
                    start: row_index,
                    rows: vec![(row_index, key)],
                    savepoint_marks: Vec::new(),
                });
            }
            StartControl::Continuation => {
                let tx = self.open.as_mut().ok_or_else(|| {
                    Error::corrupt(format!(
                        "row {row_index} continues a transaction but none is open"
                    ))
                })?;
                tx.rows.push((row_index, key));
            }
        }

        let tx = self.open.as_mut().expect("just populated above");
        if end_control.is_savepoint_flagged() {
            tx.savepoint_marks.push(tx.rows.len() - 1);
        }

        if end_control.is_terminal() {
            let tx = self.open.take().expect("terminal row always has an open tx");
            for &(idx, _) in &tx.rows {
                sink.on_transaction_span(idx, tx.start, row_index);
            }

            let visible: &[(u64, Option<Uuid>)] = if end_control.is_committed() {
                &tx.rows[..]
            } else {
                let target = end_control
                    .rollback_target()
                    .expect("non-committed terminal control is always a rollback");
                if target == 0 {
                    &[]
                } else {
                    let mark = *tx.savepoint_marks.get(usize::from(target - 1)).ok_or_else(|| {
                        Error::corrupt(format!(
                            "row {row_index} rolls back to savepoint {target}, which was never recorded"
                        ))
                    })?;
                    &tx.rows[..=mark]
                }
            };
            for &(idx, key) in visible {
                if let Some(key) = key {
                    sink.on_key_committed(key, idx);
                }
            }
        }

        Ok(())
    }

    /// `true` if a transaction is currently open (its terminal row has not
    /// yet arrived).
    pub fn has_open_transaction(&self) -> bool {
        self.open.is_some()
    }
}
