//! Builder for creating or opening a [`Database`], mirroring
//! `vector-buffers`'s `DiskBufferConfigBuilder`: collect parameters on a
//! plain struct, validate them in one place, and only then touch the
//! filesystem.

use std::path::PathBuf;

use crate::database::{Database, FinderStrategy};
use crate::error::Error;
use crate::row::header::{MAX_ROW_SIZE, MAX_SKEW_MS, MIN_ROW_SIZE};

const DEFAULT_ROW_SIZE: u32 = 512;
const DEFAULT_SKEW_MS: i64 = 1_000;

/// Parameters for creating or opening a frozenDB file.
///
/// `row_size` and `skew_ms` only take effect on [`DatabaseConfig::create`];
/// [`DatabaseConfig::open_writer`] and [`DatabaseConfig::open_reader`] read
/// both back out of the file's own header, which is the sole source of
/// truth once a database exists.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    path: PathBuf,
    row_size: u32,
    skew_ms: i64,
    finder: FinderStrategy,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DatabaseConfig {
            path: path.into(),
            row_size: DEFAULT_ROW_SIZE,
            skew_ms: DEFAULT_SKEW_MS,
            finder: FinderStrategy::InMemory,
        }
    }

    pub fn row_size(mut self, row_size: u32) -> Self {
        self.row_size = row_size;
        self
    }

    pub fn skew_ms(mut self, skew_ms: i64) -> Self {
        self.skew_ms = skew_ms;
        self
    }

    pub fn finder(mut self, finder: FinderStrategy) -> Self {
        self.finder = finder;
        self
    }

    fn validate(&self) -> Result<(), Error> {
        if !(MIN_ROW_SIZE..=MAX_ROW_SIZE).contains(&self.row_size) {
            return Err(Error::invalid_input(format!(
                "row_size {} out of range [{MIN_ROW_SIZE}, {MAX_ROW_SIZE}]",
                self.row_size
            )));
        }
        if !(0..=MAX_SKEW_MS).contains(&self.skew_ms) {
            return Err(Error::invalid_input(format!(
                "skew_ms {} out of range [0, {MAX_SKEW_MS}]",
                self.skew_ms
            )));
        }
        Ok(())
    }

    /// Creates a brand new database file, failing if one already exists at
    /// this path.
    pub fn create(self) -> Result<Database, Error> {
        self.validate()?;
        Database::create(&self.path, self.row_size, self.skew_ms, self.finder)
    }

    /// Opens an existing database for writing, recovering any
    /// crash-truncated tail row first.
    pub fn open_writer(self) -> Result<Database, Error> {
        Database::open_writer(&self.path, self.finder)
    }

    /// Opens an existing database for reading only.
    pub fn open_reader(self) -> Result<Database, Error> {
        Database::open_reader(&self.path, self.finder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_out_of_range_row_size_before_touching_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.frz");
        let err = DatabaseConfig::new(&path).row_size(4).create().unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert!(!path.exists());
    }

    #[test]
    fn builder_creates_and_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.frz");
        DatabaseConfig::new(&path)
            .row_size(256)
            .skew_ms(500)
            .finder(FinderStrategy::BinarySearch)
            .create()
            .unwrap();

        let db = DatabaseConfig::new(&path).finder(FinderStrategy::Simple).open_writer().unwrap();
        assert_eq!(db.row_size(), 256);
        assert_eq!(db.skew_ms(), 500);
    }
}
