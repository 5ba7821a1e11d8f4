//! Tracks the running CRC32 over rows written since the last
//! [`ChecksumRow`](crate::row::checksum::ChecksumRow), so
//! [`crate::transaction::Transaction`] knows when to insert the next one.

use crate::codec::crc32_ieee;
use crate::row::checksum::{ChecksumRow, CHECKSUM_INTERVAL};

/// Accumulates bytes and a row count between two `ChecksumRow`s.
///
/// One instance is shared (behind a lock) by every `Transaction` over a
/// database's lifetime, since the 10,000-row interval spans transaction
/// boundaries.
pub struct ChecksumTracker {
    buffer: Vec<u8>,
    rows_since_checksum: u64,
}

impl ChecksumTracker {
    pub fn new() -> Self {
        ChecksumTracker {
            buffer: Vec::new(),
            rows_since_checksum: 0,
        }
    }

    /// Rebuilds a tracker mid-stream, e.g. during recovery: `rows_since_checksum`
    /// rows have already contributed `hashed_bytes` since the last checksum.
    pub fn resume(rows_since_checksum: u64, hashed_bytes: &[u8]) -> Self {
        ChecksumTracker {
            buffer: hashed_bytes.to_vec(),
            rows_since_checksum,
        }
    }

    /// Feeds newly written row bytes into the running checksum.
    pub fn record_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Call once a complete `DataRow`/`NullRow` has finished writing.
    /// Returns the `ChecksumRow` to append when the interval boundary is hit.
    pub fn complete_row(&mut self) -> Option<ChecksumRow> {
        self.rows_since_checksum += 1;
        if self.rows_since_checksum < CHECKSUM_INTERVAL {
            return None;
        }
        let crc32 = crc32_ieee(&self.buffer);
        self.buffer.clear();
        self.rows_since_checksum = 0;
        Some(ChecksumRow { crc32 })
    }
}

impl Default for ChecksumTracker {
    fn default() -> Self {
        Self::new()
    }
}
