//! `NullRow`: emitted in place of a `DataRow` when a transaction commits
//! with no rows added to it.

use uuid::Uuid;

use crate::codec::{
    check_lrc_parity, decode_uuid, encode_uuid, lrc_parity, validate_uuidv7, ENCODED_UUID_LEN,
    ROW_END, ROW_START,
};
use crate::error::Error;
use crate::row::control::EndControl;

const UUID_FIELD_START: usize = 2;
const UUID_FIELD_END: usize = UUID_FIELD_START + ENCODED_UUID_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullRow {
    pub timestamp_ms: i64,
}

impl NullRow {
    /// Builds the reserved UUIDv7 used by `NullRow`: version nibble 7,
    /// RFC 4122 variant bits, and otherwise all-zero randomness.
    pub fn sentinel_uuid(timestamp_ms: i64) -> Uuid {
        let ts = (timestamp_ms as u64) & 0x0000_FFFF_FFFF_FFFF;
        let ts_bytes = ts.to_be_bytes();
        let mut bytes = [0u8; 16];
        bytes[0..6].copy_from_slice(&ts_bytes[2..8]);
        bytes[6] = 0x70; // version 7, zero randomness in the low nibble
        bytes[7] = 0x00;
        bytes[8] = 0x80; // RFC 4122 variant, zero randomness otherwise
        Uuid::from_bytes(bytes)
    }

    pub fn marshal(&self, row_size: usize) -> Vec<u8> {
        let mut out = vec![0u8; row_size];
        out[0] = ROW_START;
        out[1] = b'T';
        out[UUID_FIELD_START..UUID_FIELD_END]
            .copy_from_slice(&encode_uuid(&Self::sentinel_uuid(self.timestamp_ms)));
        // bytes [UUID_FIELD_END .. row_size-5) stay NUL: the payload region
        // of a NullRow is always empty.
        let end_start = row_size - 5;
        out[end_start..end_start + 2].copy_from_slice(&EndControl::Null.to_bytes());
        let parity = lrc_parity(&out[..row_size - 3]);
        out[row_size - 3..row_size - 1].copy_from_slice(&parity);
        out[row_size - 1] = ROW_END;
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Self::parse_impl(bytes, true)
    }

    /// Parses a null row without validating its LRC parity. See
    /// [`crate::row::data::DataRow::parse_lenient`] for why replay uses this
    /// instead of [`NullRow::parse`].
    pub fn parse_lenient(bytes: &[u8]) -> Result<Self, Error> {
        Self::parse_impl(bytes, false)
    }

    fn parse_impl(bytes: &[u8], check_parity: bool) -> Result<Self, Error> {
        let row_size = bytes.len();
        if bytes[0] != ROW_START {
            return Err(Error::corrupt("null row missing ROW_START sentinel"));
        }
        if bytes[row_size - 1] != ROW_END {
            return Err(Error::corrupt("null row missing ROW_END sentinel"));
        }
        if bytes[1] != b'T' {
            return Err(Error::corrupt("null row must have start_control 'T'"));
        }
        if check_parity {
            check_lrc_parity(&bytes[..row_size - 3], &bytes[row_size - 3..row_size - 1])?;
        }

        let end_control = EndControl::from_bytes(&bytes[row_size - 5..row_size - 3])?;
        if !matches!(end_control, EndControl::Null) {
            return Err(Error::corrupt(
                "null row end_control must be 'NR'",
            ));
        }
        let key = decode_uuid(&bytes[UUID_FIELD_START..UUID_FIELD_END])?;
        validate_uuidv7(&key, true)?;
        let payload_region = &bytes[UUID_FIELD_END..row_size - 5];
        if payload_region.iter().any(|&b| b != 0) {
            return Err(Error::corrupt("null row payload region must be all NUL"));
        }

        Ok(NullRow {
            timestamp_ms: crate::codec::uuid_timestamp_ms(&key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_row_round_trips() {
        let row = NullRow { timestamp_ms: 1_700_000_000_000 };
        let bytes = row.marshal(256);
        let parsed = NullRow::parse(&bytes).unwrap();
        assert_eq!(parsed, row);
    }

    #[test]
    fn rejects_nonempty_payload() {
        let row = NullRow { timestamp_ms: 42 };
        let mut bytes = row.marshal(256);
        bytes[40] = b'x';
        // Corrupting the payload also breaks parity, which is checked first.
        assert!(NullRow::parse(&bytes).is_err());
    }
}
