//! The low-memory finder: an ordered `(timestamp, row_index)` vector
//! (~16 bytes/row) plus a skew-window linear probe, trading some query-time
//! disk reads for memory well below [`super::in_memory::InMemoryFinder`]'s.
//!
//! Keys are only guaranteed ordered up to `skew_ms` (see
//! [`crate::codec::validate_uuidv7`] and the key-ordering invariant enforced
//! by [`crate::transaction::Transaction::add_row`]), so a lookup can't stop
//! at the first timestamp match: it must widen to every candidate whose
//! timestamp falls within `skew_ms` of the target and confirm each one
//! against the full key on disk.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::{read_row, scan_transaction_end, scan_transaction_start, Finder};
use crate::codec::uuid_timestamp_ms;
use crate::emitter::RowEmitter;
use crate::error::Error;
use crate::file_manager::FileManager;
use crate::transaction_replay::{ReplaySink, TransactionReplay};

struct Ordered {
    /// Sorted ascending by timestamp; ties broken by ascending row_index,
    /// which also reflects file order since row_index only increases.
    entries: Vec<(i64, u64)>,
    max_timestamp: i64,
}

impl ReplaySink for Ordered {
    fn on_key_committed(&mut self, key: Uuid, row_index: u64) {
        let ts = uuid_timestamp_ms(&key);
        let pos = self
            .entries
            .partition_point(|&(entry_ts, entry_idx)| (entry_ts, entry_idx) < (ts, row_index));
        self.entries.insert(pos, (ts, row_index));
    }

    fn on_transaction_span(&mut self, _row_index: u64, _start: u64, _end: u64) {}

    fn on_max_timestamp(&mut self, timestamp_ms: i64) {
        if timestamp_ms > self.max_timestamp {
            self.max_timestamp = timestamp_ms;
        }
    }
}

struct Inner {
    replay: TransactionReplay,
    ordered: Ordered,
}

pub struct BinarySearchFinder {
    file: Arc<FileManager>,
    emitter: Arc<RowEmitter>,
    row_size: u64,
    skew_ms: i64,
    inner: Arc<RwLock<Inner>>,
    listener_id: u64,
}

impl BinarySearchFinder {
    pub fn new(file: Arc<FileManager>, emitter: Arc<RowEmitter>, row_size: u64, skew_ms: i64) -> Self {
        let inner = Arc::new(RwLock::new(Inner {
            replay: TransactionReplay::new(),
            ordered: Ordered {
                entries: Vec::new(),
                max_timestamp: i64::MIN,
            },
        }));
        let inner_for_listener = Arc::clone(&inner);
        let listener_id = emitter.add_listener(move |row_index, row| {
            let mut guard = inner_for_listener.write();
            let Inner { replay, ordered } = &mut *guard;
            replay.observe(row_index, row, ordered)
        });

        BinarySearchFinder {
            file,
            emitter,
            row_size,
            skew_ms,
            inner,
            listener_id,
        }
    }
}

impl Drop for BinarySearchFinder {
    fn drop(&mut self) {
        self.emitter.remove_listener(self.listener_id);
    }
}

impl Finder for BinarySearchFinder {
    fn get_index(&self, key: &Uuid) -> Result<Option<u64>, Error> {
        let target_ts = uuid_timestamp_ms(key);
        let guard = self.inner.read();
        let entries = &guard.ordered.entries;
        let lower = target_ts.saturating_sub(self.skew_ms);
        let upper = target_ts.saturating_add(self.skew_ms);
        let start = entries.partition_point(|&(ts, _)| ts < lower);

        for &(ts, row_index) in &entries[start..] {
            if ts > upper {
                break;
            }
            let row = read_row(&self.file, self.row_size, row_index)?;
            if let Some(data_row) = row.as_data() {
                if data_row.key == *key {
                    return Ok(Some(row_index));
                }
            }
        }
        Ok(None)
    }

    fn get_transaction_start(&self, row_index: u64) -> Result<u64, Error> {
        scan_transaction_start(&self.file, self.row_size, row_index)
    }

    fn get_transaction_end(&self, row_index: u64) -> Result<u64, Error> {
        scan_transaction_end(
            &self.file,
            self.row_size,
            self.emitter.delivered_row_count(),
            row_index,
        )
    }

    fn max_timestamp(&self) -> i64 {
        self.inner.read().ordered.max_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::control::{EndControl, StartControl};
    use crate::row::data::DataRow;
    use crate::row::header::Header;
    use tempfile::tempdir;

    #[test]
    fn finds_key_via_skew_window_probe() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.frz");
        let file = Arc::new(FileManager::open_writer(&path).unwrap());
        file.write(Header::new(256, 5000).unwrap().marshal().to_vec(), true)
            .unwrap();
        let emitter = RowEmitter::new(Arc::clone(&file), 256);
        let finder = BinarySearchFinder::new(Arc::clone(&file), Arc::clone(&emitter), 256, 5000);
        emitter.start().unwrap();

        let key = Uuid::now_v7();
        let row = DataRow::new(StartControl::Transaction, key, b"{}".to_vec(), EndControl::Commit)
            .marshal(256)
            .unwrap();
        file.write(row, true).unwrap();

        assert_eq!(finder.get_index(&key).unwrap(), Some(0));
        assert_eq!(finder.get_index(&Uuid::now_v7()).unwrap(), None);
    }
}
