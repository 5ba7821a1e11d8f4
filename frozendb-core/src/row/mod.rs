//! Binary row formats: header, checksum, data, null, and partial rows.
//!
//! Every complete row is exactly `row_size` bytes, starts with
//! [`codec::ROW_START`](crate::codec::ROW_START), and ends with
//! [`codec::ROW_END`](crate::codec::ROW_END). [`Row::parse`] recognizes
//! which variant a given slice holds by its start_control/end_control byte
//! pair, per the dispatch order fixed by the file format.

pub mod checksum;
pub mod control;
pub mod data;
pub mod header;
pub mod null;
pub mod partial;

pub use checksum::ChecksumRow;
pub use control::{EndControl, StartControl};
pub use data::DataRow;
pub use header::Header;
pub use null::NullRow;

use crate::codec::{ROW_END, ROW_START};
use crate::error::Error;

/// Any one of the three complete (non-partial) row variants that can
/// appear past offset 64.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Checksum(ChecksumRow),
    Data(DataRow),
    Null(NullRow),
}

impl Row {
    /// Parses a complete, `row_size`-byte row, dispatching on the
    /// discriminator byte at offset 1 and, for `'T'`-prefixed rows, on
    /// whether the end_control is `NR`.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let row_size = bytes.len();
        if row_size < 19 {
            return Err(Error::corrupt("row too short to hold its fixed fields"));
        }
        if bytes[0] != ROW_START {
            return Err(Error::corrupt("row missing ROW_START sentinel"));
        }
        if bytes[row_size - 1] != ROW_END {
            return Err(Error::corrupt("row missing ROW_END sentinel"));
        }

        match bytes[1] {
            b'C' => ChecksumRow::parse(bytes).map(Row::Checksum),
            b'T' | b'R' => {
                let end_control = &bytes[row_size - 5..row_size - 3];
                if end_control == b"NR" {
                    NullRow::parse(bytes).map(Row::Null)
                } else {
                    DataRow::parse(bytes).map(Row::Data)
                }
            }
            other => Err(Error::corrupt(format!(
                "unrecognized row discriminator byte {other:#04x}"
            ))),
        }
    }

    /// Parses a complete row the same way [`Row::parse`] does, but without
    /// validating LRC parity. Used only by replay paths (rebuilding a
    /// `Finder`'s index, resuming the checksum tracker) that need to keep
    /// scanning past a row corrupted after it was written; the strict,
    /// parity-checked [`Row::parse`] is what actually reading that row's
    /// value uses, which is where the corruption is meant to surface.
    pub fn parse_lenient(bytes: &[u8]) -> Result<Self, Error> {
        let row_size = bytes.len();
        if row_size < 19 {
            return Err(Error::corrupt("row too short to hold its fixed fields"));
        }
        if bytes[0] != ROW_START {
            return Err(Error::corrupt("row missing ROW_START sentinel"));
        }
        if bytes[row_size - 1] != ROW_END {
            return Err(Error::corrupt("row missing ROW_END sentinel"));
        }

        match bytes[1] {
            b'C' => ChecksumRow::parse_lenient(bytes).map(Row::Checksum),
            b'T' | b'R' => {
                let end_control = &bytes[row_size - 5..row_size - 3];
                if end_control == b"NR" {
                    NullRow::parse_lenient(bytes).map(Row::Null)
                } else {
                    DataRow::parse_lenient(bytes).map(Row::Data)
                }
            }
            other => Err(Error::corrupt(format!(
                "unrecognized row discriminator byte {other:#04x}"
            ))),
        }
    }

    pub fn as_data(&self) -> Option<&DataRow> {
        match self {
            Row::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_null(&self) -> Option<&NullRow> {
        match self {
            Row::Null(n) => Some(n),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn dispatches_checksum_row() {
        let row = ChecksumRow { crc32: 7 }.marshal(256);
        assert!(matches!(Row::parse(&row).unwrap(), Row::Checksum(_)));
    }

    #[test]
    fn dispatches_data_row() {
        let row = DataRow::new(
            StartControl::Transaction,
            Uuid::now_v7(),
            b"{}".to_vec(),
            EndControl::Commit,
        )
        .marshal(256)
        .unwrap();
        assert!(matches!(Row::parse(&row).unwrap(), Row::Data(_)));
    }

    #[test]
    fn dispatches_null_row() {
        let row = NullRow { timestamp_ms: 1000 }.marshal(256);
        assert!(matches!(Row::parse(&row).unwrap(), Row::Null(_)));
    }
}
