//! Translates file-size growth into an ordered stream of parsed rows.
//!
//! [`FileManager`] only knows about bytes; `RowEmitter` is what turns "the
//! file grew to N bytes" into "row 17 looks like this", exactly once per
//! row, strictly in file order. The [`crate::finder`] strategies and
//! [`crate::database::Database`]'s recovery path are both just listeners on
//! this stream — neither ever reads the file directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, instrument, trace};

use crate::error::Error;
use crate::file_manager::FileManager;
use crate::row::header::HEADER_LEN;
use crate::row::Row;

type RowCallback = Box<dyn Fn(u64, &Row) -> Result<(), Error> + Send + Sync>;

/// Subscribes to a [`FileManager`] and emits `(row_index, Row)` events for
/// every complete row as it becomes available.
pub struct RowEmitter {
    file: Arc<FileManager>,
    row_size: u64,
    last_delivered_file_size: Mutex<u64>,
    listeners: Mutex<Vec<(u64, RowCallback)>>,
    next_listener_id: AtomicU64,
    own_subscription_id: Mutex<Option<u64>>,
}

impl RowEmitter {
    /// Builds a new emitter over `file`. Callers must register listeners
    /// with [`RowEmitter::add_listener`] and then call
    /// [`RowEmitter::start`] to begin delivery — rows that exist before
    /// `start` is called are not delivered until then, by design, so
    /// recovery can register the finder's listener before anything replays.
    pub fn new(file: Arc<FileManager>, row_size: u64) -> Arc<Self> {
        Arc::new(RowEmitter {
            file,
            row_size,
            last_delivered_file_size: Mutex::new(HEADER_LEN as u64),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            own_subscription_id: Mutex::new(None),
        })
    }

    pub fn add_listener(&self, callback: impl Fn(u64, &Row) -> Result<(), Error> + Send + Sync + 'static) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::AcqRel);
        self.listeners.lock().push((id, Box::new(callback)));
        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.listeners.lock().retain(|(l_id, _)| *l_id != id);
    }

    /// Subscribes to future file growth and delivers every row that exists
    /// right now. Must be called exactly once, after all initial listeners
    /// (typically the [`crate::finder`] being warmed up) are registered.
    pub fn start(self: &Arc<Self>) -> Result<(), Error> {
        let weak: Weak<RowEmitter> = Arc::downgrade(self);
        let subscription_id = self.file.subscribe(move |new_size| match weak.upgrade() {
            Some(emitter) => emitter.deliver_up_to(new_size),
            None => Ok(()),
        });
        *self.own_subscription_id.lock() = Some(subscription_id);
        self.deliver_up_to(self.file.size())
    }

    /// Row index of the last fully delivered row's successor, i.e. how many
    /// rows have been delivered so far.
    pub fn delivered_row_count(&self) -> u64 {
        complete_row_count(*self.last_delivered_file_size.lock(), self.row_size)
    }

    #[instrument(skip(self), fields(row_size = self.row_size))]
    fn deliver_up_to(&self, new_size: u64) -> Result<(), Error> {
        let mut last_size = self.last_delivered_file_size.lock();
        let start_index = complete_row_count(*last_size, self.row_size);
        let end_index = complete_row_count(new_size, self.row_size);
        if end_index <= start_index {
            return Ok(());
        }

        let listeners = self.listeners.lock();
        for row_index in start_index..end_index {
            let offset = HEADER_LEN as u64 + row_index * self.row_size;
            let bytes = self.file.read(offset, self.row_size as usize)?;
            // Parity is intentionally not checked here: a row independently
            // corrupted after it was written should not stop every later
            // row from being indexed. `Database::get` re-reads and
            // strictly re-parses the specific row it's asked for, which is
            // where such corruption is meant to surface.
            let row = match Row::parse_lenient(&bytes) {
                Ok(row) => row,
                Err(e) => {
                    error!(error = %e, row_index, offset, "skipping corrupt row during replay");
                    continue;
                }
            };
            trace!(row_index, offset, "emitting row");
            for (_, listener) in listeners.iter() {
                listener(row_index, &row)?;
            }
        }
        *last_size = HEADER_LEN as u64 + end_index * self.row_size;
        Ok(())
    }
}

impl Drop for RowEmitter {
    fn drop(&mut self) {
        if let Some(id) = self.own_subscription_id.lock().take() {
            self.file.unsubscribe(id);
        }
    }
}

fn complete_row_count(file_size: u64, row_size: u64) -> u64 {
    if file_size <= HEADER_LEN as u64 {
        0
    } else {
        (file_size - HEADER_LEN as u64) / row_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::null::NullRow;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn write_header(file: &FileManager, row_size: u32) {
        let header = crate::row::header::Header::new(row_size, 0).unwrap();
        file.write(header.marshal().to_vec(), true).unwrap();
    }

    #[test]
    fn delivers_rows_exactly_once_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.frz");
        let file = Arc::new(FileManager::open_writer(&path).unwrap());
        write_header(&file, 128);

        let emitter = RowEmitter::new(Arc::clone(&file), 128);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        emitter.add_listener(move |idx, row| {
            seen_clone.lock().push((idx, row.clone()));
            Ok(())
        });
        emitter.start().unwrap();

        let row1 = NullRow { timestamp_ms: 1 }.marshal(128);
        let row2 = NullRow { timestamp_ms: 2 }.marshal(128);
        file.write(row1, true).unwrap();
        file.write(row2, true).unwrap();

        let delivered = seen.lock();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0, 0);
        assert_eq!(delivered[1].0, 1);
    }

    #[test]
    fn start_replays_rows_written_before_subscription() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.frz");
        let file = Arc::new(FileManager::open_writer(&path).unwrap());
        write_header(&file, 128);
        file.write(NullRow { timestamp_ms: 1 }.marshal(128), true)
            .unwrap();

        let emitter = RowEmitter::new(Arc::clone(&file), 128);
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        emitter.add_listener(move |_, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        emitter.start().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.delivered_row_count(), 1);
    }
}
