//! The `O(1)`-memory, `O(n)`-per-query finder: holds nothing but a handle to
//! the file, and replays the whole transaction log from scratch on every
//! call. Suited to small databases or memory-constrained embedding.

use std::sync::Arc;

use uuid::Uuid;

use super::{read_row, scan_transaction_end, scan_transaction_start, Finder};
use crate::emitter::RowEmitter;
use crate::error::Error;
use crate::file_manager::FileManager;
use crate::transaction_replay::{ReplaySink, TransactionReplay};

pub struct SimpleFinder {
    file: Arc<FileManager>,
    emitter: Arc<RowEmitter>,
    row_size: u64,
}

impl SimpleFinder {
    pub fn new(file: Arc<FileManager>, emitter: Arc<RowEmitter>, row_size: u64) -> Self {
        SimpleFinder {
            file,
            emitter,
            row_size,
        }
    }

    fn row_count(&self) -> u64 {
        self.emitter.delivered_row_count()
    }

    fn full_scan<S: ReplaySink>(&self, sink: &mut S) -> Result<(), Error> {
        let mut replay = TransactionReplay::new();
        for row_index in 0..self.row_count() {
            let row = read_row(&self.file, self.row_size, row_index)?;
            replay.observe(row_index, &row, sink)?;
        }
        Ok(())
    }
}

struct FindKeySink {
    target: Uuid,
    found: Option<u64>,
    max_timestamp: i64,
}

impl ReplaySink for FindKeySink {
    fn on_key_committed(&mut self, key: Uuid, row_index: u64) {
        if key == self.target {
            self.found = Some(row_index);
        }
    }
    fn on_transaction_span(&mut self, _row_index: u64, _start: u64, _end: u64) {}
    fn on_max_timestamp(&mut self, timestamp_ms: i64) {
        self.max_timestamp = self.max_timestamp.max(timestamp_ms);
    }
}

#[derive(Default)]
struct MaxTimestampSink {
    max_timestamp: i64,
}

impl ReplaySink for MaxTimestampSink {
    fn on_key_committed(&mut self, _key: Uuid, _row_index: u64) {}
    fn on_transaction_span(&mut self, _row_index: u64, _start: u64, _end: u64) {}
    fn on_max_timestamp(&mut self, timestamp_ms: i64) {
        self.max_timestamp = self.max_timestamp.max(timestamp_ms);
    }
}

impl Finder for SimpleFinder {
    fn get_index(&self, key: &Uuid) -> Result<Option<u64>, Error> {
        let mut sink = FindKeySink {
            target: *key,
            found: None,
            max_timestamp: i64::MIN,
        };
        self.full_scan(&mut sink)?;
        Ok(sink.found)
    }

    fn get_transaction_start(&self, row_index: u64) -> Result<u64, Error> {
        scan_transaction_start(&self.file, self.row_size, row_index)
    }

    fn get_transaction_end(&self, row_index: u64) -> Result<u64, Error> {
        scan_transaction_end(&self.file, self.row_size, self.row_count(), row_index)
    }

    fn max_timestamp(&self) -> i64 {
        let mut sink = MaxTimestampSink::default();
        // A full scan never fails once the database has already been
        // validated at open time; if it somehow does, there is nothing
        // useful this infallible API can report, so fall back to the
        // smallest possible timestamp rather than panicking.
        let _ = self.full_scan(&mut sink);
        sink.max_timestamp
    }
}
