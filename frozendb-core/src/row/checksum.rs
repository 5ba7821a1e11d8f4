//! `ChecksumRow`: a block-level CRC32 inserted after every 10,000 data/null
//! rows (and once, immediately after the header).

use crate::codec::{
    check_lrc_parity, crc32_to_hex, hex_to_crc32, lrc_parity, ROW_END, ROW_START,
};
use crate::error::Error;

/// Number of committed `DataRow`/`NullRow` rows between consecutive
/// `ChecksumRow`s (the header's initial checksum is not counted against
/// this; it covers the header alone).
pub const CHECKSUM_INTERVAL: u64 = 10_000;

const CRC_FIELD_LEN: usize = 8;
const TAG_FIELD: &[u8; 2] = b"CS";
const PARITY_FIELD_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumRow {
    pub crc32: u32,
}

impl ChecksumRow {
    pub fn marshal(&self, row_size: usize) -> Vec<u8> {
        let mut out = vec![0u8; row_size];
        out[0] = ROW_START;
        out[1] = b'C';
        out[2..2 + CRC_FIELD_LEN].copy_from_slice(&crc32_to_hex(self.crc32));
        // bytes [10 .. row_size-5) are already zeroed as padding.
        let tag_start = row_size - 5;
        out[tag_start..tag_start + 2].copy_from_slice(TAG_FIELD);
        let parity = lrc_parity(&out[..row_size - 3]);
        out[row_size - 3..row_size - 1].copy_from_slice(&parity);
        out[row_size - 1] = ROW_END;
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Self::parse_impl(bytes, true)
    }

    /// Parses a checksum row without validating its LRC parity. See
    /// [`crate::row::data::DataRow::parse_lenient`] for why replay uses this
    /// instead of [`ChecksumRow::parse`].
    pub fn parse_lenient(bytes: &[u8]) -> Result<Self, Error> {
        Self::parse_impl(bytes, false)
    }

    fn parse_impl(bytes: &[u8], check_parity: bool) -> Result<Self, Error> {
        let row_size = bytes.len();
        if row_size < 19 {
            return Err(Error::corrupt(
                "checksum row too short to hold its fixed fields",
            ));
        }
        if bytes[0] != ROW_START {
            return Err(Error::corrupt("checksum row missing ROW_START sentinel"));
        }
        if bytes[row_size - 1] != ROW_END {
            return Err(Error::corrupt("checksum row missing ROW_END sentinel"));
        }
        if bytes[1] != b'C' {
            return Err(Error::corrupt("checksum row missing 'C' discriminator"));
        }
        let tag_start = row_size - 5;
        if &bytes[tag_start..tag_start + 2] != TAG_FIELD {
            return Err(Error::corrupt("checksum row missing 'CS' tag field"));
        }
        let padding = &bytes[2 + CRC_FIELD_LEN..tag_start];
        if padding.iter().any(|&b| b != 0) {
            return Err(Error::corrupt("checksum row padding contains non-NUL bytes"));
        }
        if check_parity {
            check_lrc_parity(
                &bytes[..row_size - 3],
                &bytes[row_size - 3..row_size - 1],
            )?;
        }
        let crc32 = hex_to_crc32(&bytes[2..2 + CRC_FIELD_LEN])?;
        let _ = PARITY_FIELD_LEN;
        Ok(ChecksumRow { crc32 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_row_round_trips() {
        let row = ChecksumRow { crc32: 0xDEADBEEF };
        let bytes = row.marshal(128);
        let parsed = ChecksumRow::parse(&bytes).unwrap();
        assert_eq!(parsed, row);
    }

    #[test]
    fn detects_parity_corruption() {
        let row = ChecksumRow { crc32: 0x1234 };
        let mut bytes = row.marshal(256);
        bytes[20] ^= 0xFF;
        assert!(ChecksumRow::parse(&bytes).is_err());
    }
}
