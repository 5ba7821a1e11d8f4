//! The `O(1)`-lookup finder: keeps three in-memory maps (~40 bytes/row) so
//! every query is a hash/map lookup instead of a file scan.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::Finder;
use crate::emitter::RowEmitter;
use crate::error::Error;
use crate::transaction_replay::{ReplaySink, TransactionReplay};

struct Maps {
    key_to_index: HashMap<Uuid, u64>,
    tx_start: HashMap<u64, u64>,
    tx_end: HashMap<u64, u64>,
    max_timestamp: i64,
}

impl ReplaySink for Maps {
    fn on_key_committed(&mut self, key: Uuid, row_index: u64) {
        self.key_to_index.insert(key, row_index);
    }

    fn on_transaction_span(&mut self, row_index: u64, start: u64, end: u64) {
        self.tx_start.insert(row_index, start);
        self.tx_end.insert(row_index, end);
    }

    fn on_max_timestamp(&mut self, timestamp_ms: i64) {
        if timestamp_ms > self.max_timestamp {
            self.max_timestamp = timestamp_ms;
        }
    }
}

struct Inner {
    replay: TransactionReplay,
    maps: Maps,
}

pub struct InMemoryFinder {
    inner: Arc<RwLock<Inner>>,
    listener_id: u64,
    emitter: Arc<RowEmitter>,
}

impl InMemoryFinder {
    /// Builds a finder backed by `emitter`, replaying every row delivered
    /// from this point forward (call [`RowEmitter::start`] only after this
    /// constructor has registered its listener, so recovery sees every row).
    pub fn new(emitter: Arc<RowEmitter>) -> Self {
        let inner = Arc::new(RwLock::new(Inner {
            replay: TransactionReplay::new(),
            maps: Maps {
                key_to_index: HashMap::new(),
                tx_start: HashMap::new(),
                tx_end: HashMap::new(),
                max_timestamp: i64::MIN,
            },
        }));
        let inner_for_listener = Arc::clone(&inner);
        let listener_id = emitter.add_listener(move |row_index, row| {
            let mut guard = inner_for_listener.write();
            let Inner { replay, maps } = &mut *guard;
            replay.observe(row_index, row, maps)
        });
        InMemoryFinder {
            inner,
            listener_id,
            emitter,
        }
    }
}

impl Drop for InMemoryFinder {
    fn drop(&mut self) {
        self.emitter.remove_listener(self.listener_id);
    }
}

impl Finder for InMemoryFinder {
    fn get_index(&self, key: &Uuid) -> Result<Option<u64>, Error> {
        Ok(self.inner.read().maps.key_to_index.get(key).copied())
    }

    fn get_transaction_start(&self, row_index: u64) -> Result<u64, Error> {
        self.inner
            .read()
            .maps
            .tx_start
            .get(&row_index)
            .copied()
            .ok_or_else(|| Error::corrupt(format!("no transaction span recorded for row {row_index}")))
    }

    fn get_transaction_end(&self, row_index: u64) -> Result<u64, Error> {
        self.inner
            .read()
            .maps
            .tx_end
            .get(&row_index)
            .copied()
            .ok_or(Error::TransactionActive { row_index })
    }

    fn max_timestamp(&self) -> i64 {
        self.inner.read().maps.max_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_manager::FileManager;
    use crate::row::control::{EndControl, StartControl};
    use crate::row::data::DataRow;
    use crate::row::header::Header;
    use tempfile::tempdir;

    #[test]
    fn lookups_reflect_replayed_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.frz");
        let file = Arc::new(FileManager::open_writer(&path).unwrap());
        file.write(Header::new(256, 0).unwrap().marshal().to_vec(), true)
            .unwrap();
        let emitter = RowEmitter::new(Arc::clone(&file), 256);

        let finder = InMemoryFinder::new(Arc::clone(&emitter));
        emitter.start().unwrap();

        let key = Uuid::now_v7();
        let row = DataRow::new(StartControl::Transaction, key, b"{}".to_vec(), EndControl::Commit)
            .marshal(256)
            .unwrap();
        file.write(row, true).unwrap();

        assert_eq!(finder.get_index(&key).unwrap(), Some(0));
        assert_eq!(finder.get_transaction_start(0).unwrap(), 0);
        assert_eq!(finder.get_transaction_end(0).unwrap(), 0);
    }

    #[test]
    fn open_transaction_has_no_end_yet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.frz");
        let file = Arc::new(FileManager::open_writer(&path).unwrap());
        file.write(Header::new(256, 0).unwrap().marshal().to_vec(), true)
            .unwrap();
        let emitter = RowEmitter::new(Arc::clone(&file), 256);
        let finder = InMemoryFinder::new(Arc::clone(&emitter));
        emitter.start().unwrap();

        let row = DataRow::new(
            StartControl::Transaction,
            Uuid::now_v7(),
            b"{}".to_vec(),
            EndControl::Intermediate,
        )
        .marshal(256)
        .unwrap();
        file.write(row, true).unwrap();

        assert!(matches!(
            finder.get_transaction_end(0).unwrap_err(),
            Error::TransactionActive { row_index: 0 }
        ));
    }
}
