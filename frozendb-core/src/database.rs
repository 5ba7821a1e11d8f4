//! The embeddable `Database` facade: wires [`FileManager`], [`RowEmitter`],
//! a [`Finder`] strategy, and the transaction engine together, and owns the
//! crash-recovery path that runs once at open time.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::checksum_tracker::ChecksumTracker;
use crate::emitter::RowEmitter;
use crate::error::Error;
use crate::file_manager::FileManager;
use crate::finder::binary_search::BinarySearchFinder;
use crate::finder::in_memory::InMemoryFinder;
use crate::finder::simple::SimpleFinder;
use crate::finder::Finder;
use crate::row::checksum::{ChecksumRow, CHECKSUM_INTERVAL};
use crate::row::header::{Header, HEADER_LEN};
use crate::row::partial;
use crate::row::{Row, StartControl};
use crate::transaction::Transaction;

/// Selects which [`Finder`] strategy a [`Database`] builds at open time,
/// trading memory for query speed. See [`crate::finder`] for the tradeoffs
/// of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinderStrategy {
    /// `O(1)` memory, `O(n)` per query. Best for small databases.
    Simple,
    /// `O(1)` queries, ~40 bytes/row resident.
    InMemory,
    /// `O(log n)` queries plus a skew-window probe, ~16 bytes/row resident.
    BinarySearch,
}

/// An open frozenDB file: a single-writer-or-many-readers handle over one
/// append-only, checksummed, UUIDv7-keyed log.
pub struct Database {
    file: Arc<FileManager>,
    // Keeps the emitter (and its replay-driven Finder listeners) alive for
    // exactly as long as the Database that built them.
    _emitter: Arc<RowEmitter>,
    finder: Box<dyn Finder>,
    row_size: u64,
    skew_ms: i64,
    checksum_tracker: Arc<Mutex<ChecksumTracker>>,
    max_timestamp: Arc<AtomicI64>,
    transaction_open: Arc<AtomicBool>,
}

impl Database {
    /// Creates a new database file at `path` and opens it for writing.
    /// Fails if a file already exists there.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn create(path: &Path, row_size: u32, skew_ms: i64, strategy: FinderStrategy) -> Result<Self, Error> {
        if path.exists() {
            return Err(Error::invalid_action(format!(
                "{} already exists",
                path.display()
            )));
        }
        let header = Header::new(row_size, skew_ms)?;
        let file = Arc::new(FileManager::open_writer(path)?);
        let header_bytes = header.marshal();
        file.write(header_bytes.to_vec(), true)?;

        // The header gets its own checksum row immediately, separate from
        // (and not counted against) the periodic 10,000-row interval that
        // covers data/null rows.
        let initial_checksum = ChecksumRow {
            crc32: crc32fast::hash(&header_bytes),
        };
        file.write(initial_checksum.marshal(row_size as usize), true)?;

        debug!(row_size, skew_ms, "created new database");
        Self::from_file(file, strategy)
    }

    /// Opens an existing database for writing. Before attaching the
    /// background writer, truncates any trailing, well-formed
    /// `PartialDataRow` left behind by a crash mid-row, so `FileManager`
    /// only ever sees whole rows past the header.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open_writer(path: &Path, strategy: FinderStrategy) -> Result<Self, Error> {
        Self::recover_tail(path)?;
        let file = Arc::new(FileManager::open_writer(path)?);
        Self::from_file(file, strategy)
    }

    /// Opens an existing database for reading only. A trailing partial row
    /// is never truncated; [`RowEmitter`] already floors file size down to
    /// whole rows, so it is simply not observed by any query.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open_reader(path: &Path, strategy: FinderStrategy) -> Result<Self, Error> {
        let file = Arc::new(FileManager::open_reader(path)?);
        Self::from_file(file, strategy)
    }

    /// Undoes everything a crash left behind mid-transaction: a trailing,
    /// less-than-a-full-row byte remainder (if any), classified via
    /// [`partial::classify`] and dropped, and then — since earlier rows of
    /// the same transaction can be fully-written, complete rows that just
    /// never received a terminal end_control — every complete row back to
    /// and including the transaction's own `StartControl::Transaction` row,
    /// if the last complete row turns out to be non-terminal
    /// (`Intermediate`/`SavepointIntermediate`). A tail remainder that
    /// doesn't match any of the three durable partial states is corruption,
    /// not a crash artifact, and is reported rather than silently discarded.
    fn recover_tail(path: &Path) -> Result<(), Error> {
        use std::fs::OpenOptions;
        use std::io::{Read, Seek, SeekFrom};

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Path {
                path: path.to_path_buf(),
                source,
            })?;
        let size = file.metadata().map_err(|source| Error::Read { source })?.len();
        if size < HEADER_LEN as u64 {
            return Err(Error::corrupt("database file is smaller than its header"));
        }

        let mut header_bytes = [0u8; HEADER_LEN];
        file.read_exact(&mut header_bytes)
            .map_err(|source| Error::Read { source })?;
        let header = Header::parse(&header_bytes)?;
        let row_size = u64::from(header.row_size);

        let rows_region = size - HEADER_LEN as u64;
        let remainder = rows_region % row_size;
        let mut truncate_at = size;

        if remainder != 0 {
            let partial_offset = size - remainder;
            file.seek(SeekFrom::Start(partial_offset))
                .map_err(|source| Error::Read { source })?;
            let mut tail = vec![0u8; remainder as usize];
            file.read_exact(&mut tail).map_err(|source| Error::Read { source })?;
            partial::classify(&tail, header.row_size as usize)?;
            truncate_at = partial_offset;
        }

        let mut row_count = (truncate_at - HEADER_LEN as u64) / row_size;
        while row_count > 0 {
            let row_index = row_count - 1;
            let offset = HEADER_LEN as u64 + row_index * row_size;
            file.seek(SeekFrom::Start(offset)).map_err(|source| Error::Read { source })?;
            let mut bytes = vec![0u8; row_size as usize];
            file.read_exact(&mut bytes).map_err(|source| Error::Read { source })?;

            let Row::Data(data) = Row::parse(&bytes)? else {
                // A `NullRow` or `ChecksumRow` is always terminal.
                break;
            };
            if data.end_control.is_terminal() {
                break;
            }
            truncate_at = offset;
            row_count -= 1;
            if data.start_control == StartControl::Transaction {
                break;
            }
        }

        if truncate_at == size {
            return Ok(());
        }
        warn!(
            truncate_at,
            original_size = size,
            "truncating incomplete transaction tail left by a crash"
        );
        file.set_len(truncate_at).map_err(|source| Error::Write { source })
    }

    fn from_file(file: Arc<FileManager>, strategy: FinderStrategy) -> Result<Self, Error> {
        let header_bytes = file.read(0, HEADER_LEN)?;
        let header = Header::parse(&header_bytes)?;
        let row_size = u64::from(header.row_size);

        let emitter = RowEmitter::new(Arc::clone(&file), row_size);
        let finder: Box<dyn Finder> = match strategy {
            FinderStrategy::Simple => {
                Box::new(SimpleFinder::new(Arc::clone(&file), Arc::clone(&emitter), row_size))
            }
            FinderStrategy::InMemory => Box::new(InMemoryFinder::new(Arc::clone(&emitter))),
            FinderStrategy::BinarySearch => Box::new(BinarySearchFinder::new(
                Arc::clone(&file),
                Arc::clone(&emitter),
                row_size,
                header.skew_ms,
            )),
        };
        // Listeners are registered above; only now is it safe to call
        // `start`, so recovery replay reaches the finder without gaps.
        emitter.start()?;

        let max_timestamp = Arc::new(AtomicI64::new(finder.max_timestamp()));
        let checksum_tracker = Arc::new(Mutex::new(resume_checksum_tracker(
            &file,
            row_size,
            emitter.delivered_row_count(),
        )?));

        Ok(Database {
            file,
            _emitter: emitter,
            finder,
            row_size,
            skew_ms: header.skew_ms,
            checksum_tracker,
            max_timestamp,
            transaction_open: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Looks up the value stored at `key`. Returns `None` if no committed
    /// transaction ever wrote it, or if it was written but later rolled
    /// back (past or present savepoint).
    #[instrument(skip(self))]
    pub fn get(&self, key: &Uuid) -> Result<Option<Value>, Error> {
        let Some(row_index) = self.finder.get_index(key)? else {
            return Ok(None);
        };
        let offset = HEADER_LEN as u64 + row_index * self.row_size;
        let bytes = self.file.read(offset, self.row_size as usize)?;
        let row = Row::parse(&bytes)?;
        let data = row
            .as_data()
            .ok_or_else(|| Error::corrupt(format!("row {row_index} indexed as a key but is not a DataRow")))?;
        Ok(Some(data.value()?))
    }

    /// Begins a new append transaction. Only one may be open at a time per
    /// `Database`; the returned `Transaction` holds that exclusivity,
    /// via a flag shared with this `Database`, until it is committed,
    /// rolled back, or dropped.
    pub fn begin_tx(&self) -> Result<Transaction, Error> {
        if !self.file.is_writer() {
            return Err(Error::invalid_action("this database was opened read-only"));
        }
        if self.transaction_open.swap(true, Ordering::AcqRel) {
            return Err(Error::invalid_action("a transaction is already open on this database"));
        }
        Ok(Transaction::begin(
            Arc::clone(&self.file),
            self.row_size,
            self.skew_ms,
            Arc::clone(&self.checksum_tracker),
            Arc::clone(&self.max_timestamp),
            Arc::clone(&self.transaction_open),
        ))
    }

    pub fn row_size(&self) -> u32 {
        self.row_size as u32
    }

    pub fn skew_ms(&self) -> i64 {
        self.skew_ms
    }

    pub fn is_tombstoned(&self) -> bool {
        self.file.is_tombstoned()
    }
}

/// Rebuilds the running checksum tracker at open time by locating the last
/// `ChecksumRow` (if any) and hashing every row written after it, so the
/// next 10,000-row boundary lands exactly where it would have if the
/// process had never restarted.
fn resume_checksum_tracker(
    file: &Arc<FileManager>,
    row_size: u64,
    row_count: u64,
) -> Result<ChecksumTracker, Error> {
    let mut last_checksum_row = None;
    for row_index in 0..row_count {
        let offset = HEADER_LEN as u64 + row_index * row_size;
        let bytes = file.read(offset, row_size as usize)?;
        if let Row::Checksum(_) = Row::parse_lenient(&bytes)? {
            last_checksum_row = Some(row_index);
        }
    }

    let start = last_checksum_row.map_or(0, |idx| idx + 1);
    let mut hashed = Vec::new();
    let mut rows_since = 0u64;
    for row_index in start..row_count {
        let offset = HEADER_LEN as u64 + row_index * row_size;
        let bytes = file.read(offset, row_size as usize)?;
        hashed.extend_from_slice(&bytes);
        rows_since += 1;
    }
    debug_assert!(rows_since < CHECKSUM_INTERVAL);
    Ok(ChecksumTracker::resume(rows_since, &hashed))
}
