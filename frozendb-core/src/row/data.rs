//! `DataRow`: the row variant that carries an actual key/value pair.

use uuid::Uuid;

use crate::codec::{
    check_lrc_parity, decode_uuid, encode_uuid, lrc_parity, pad_payload, unpad_payload,
    validate_uuidv7, ENCODED_UUID_LEN, ROW_END, ROW_START,
};
use crate::error::Error;
use crate::row::control::{EndControl, StartControl};

const UUID_FIELD_START: usize = 2;
const UUID_FIELD_END: usize = UUID_FIELD_START + ENCODED_UUID_LEN; // 26

/// A fully parsed `DataRow`.
///
/// `payload` is stored in its padded on-disk form; callers that need the
/// JSON value call [`DataRow::value`], which strips padding and decodes.
/// Deferring JSON decoding keeps recovery scans (which only need the key
/// and the control bytes) from paying for a parse they don't need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    pub start_control: StartControl,
    pub key: Uuid,
    payload: Vec<u8>,
    pub end_control: EndControl,
}

impl DataRow {
    pub fn new(
        start_control: StartControl,
        key: Uuid,
        payload_json: Vec<u8>,
        end_control: EndControl,
    ) -> Self {
        DataRow {
            start_control,
            key,
            payload: payload_json,
            end_control,
        }
    }

    /// Decodes the JSON payload. Returns a structural error if the stored
    /// bytes are not valid JSON (which should only happen on independently
    /// corrupted data, since `add_row` validates JSON before writing).
    pub fn value(&self) -> Result<serde_json::Value, Error> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::corrupt(format!("payload is not valid JSON: {e}")))
    }

    pub fn timestamp_ms(&self) -> i64 {
        crate::codec::uuid_timestamp_ms(&self.key)
    }

    pub fn marshal(&self, row_size: usize) -> Result<Vec<u8>, Error> {
        let mut out = vec![0u8; row_size];
        write_prefix(&mut out, self.start_control, &self.key, &self.payload, row_size)?;
        let end_start = row_size - 5;
        out[end_start..end_start + 2].copy_from_slice(&self.end_control.to_bytes());
        let parity = lrc_parity(&out[..row_size - 3]);
        out[row_size - 3..row_size - 1].copy_from_slice(&parity);
        out[row_size - 1] = ROW_END;
        Ok(out)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        Self::parse_impl(bytes, true)
    }

    /// Parses a data row without validating its LRC parity.
    ///
    /// Used only by [`crate::emitter::RowEmitter`] while replaying
    /// already-committed rows to rebuild a `Finder`'s index: a row can be
    /// independently corrupted (a bit flip long after it was written)
    /// without that corruption ever affecting whether its key is
    /// discoverable. The strict, parity-checked [`DataRow::parse`] is what
    /// [`crate::database::Database::get`] uses once a specific row is
    /// actually read, which is where such corruption is meant to surface.
    pub fn parse_lenient(bytes: &[u8]) -> Result<Self, Error> {
        Self::parse_impl(bytes, false)
    }

    fn parse_impl(bytes: &[u8], check_parity: bool) -> Result<Self, Error> {
        let row_size = bytes.len();
        if bytes[0] != ROW_START {
            return Err(Error::corrupt("data row missing ROW_START sentinel"));
        }
        if bytes[row_size - 1] != ROW_END {
            return Err(Error::corrupt("data row missing ROW_END sentinel"));
        }
        if check_parity {
            check_lrc_parity(&bytes[..row_size - 3], &bytes[row_size - 3..row_size - 1])?;
        }

        let start_control = StartControl::from_byte(bytes[1])?;
        let key = decode_uuid(&bytes[UUID_FIELD_START..UUID_FIELD_END])?;
        validate_uuidv7(&key, false)?;
        let end_control = EndControl::from_bytes(&bytes[row_size - 5..row_size - 3])?;
        if matches!(end_control, EndControl::Null) {
            return Err(Error::corrupt(
                "data row end_control decoded as NR; this belongs to NullRow",
            ));
        }
        let padded_payload = &bytes[UUID_FIELD_END..row_size - 5];
        let payload = unpad_payload(padded_payload)?.to_vec();

        Ok(DataRow {
            start_control,
            key,
            payload,
            end_control,
        })
    }
}

/// Writes the shared prefix (`ROW_START`, start_control, UUID, padded
/// payload) common to both full and partial row construction.
fn write_prefix(
    out: &mut [u8],
    start_control: StartControl,
    key: &Uuid,
    payload_json: &[u8],
    row_size: usize,
) -> Result<(), Error> {
    out[0] = ROW_START;
    out[1] = start_control.to_byte();
    out[UUID_FIELD_START..UUID_FIELD_END].copy_from_slice(&encode_uuid(key));
    let payload_width = row_size - UUID_FIELD_END - 5;
    let padded = pad_payload(payload_json, payload_width)?;
    out[UUID_FIELD_END..UUID_FIELD_END + payload_width].copy_from_slice(&padded);
    Ok(())
}

/// Builds the body of a `DataRow` up through the end of the padded payload
/// (i.e. everything except end_control, parity, and `ROW_END`) — the shape
/// a `PartialDataRow` takes in state S2, and the image [`crate::transaction::Transaction`]
/// writes incrementally.
pub fn marshal_body(
    start_control: StartControl,
    key: &Uuid,
    payload_json: &[u8],
    row_size: usize,
) -> Result<Vec<u8>, Error> {
    let body_len = row_size - 5;
    let mut out = vec![0u8; body_len];
    write_prefix(&mut out, start_control, key, payload_json, row_size)?;
    Ok(out)
}
