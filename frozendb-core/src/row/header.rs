//! The 64-byte file header.

use crate::error::Error;

pub const HEADER_LEN: usize = 64;
pub const SIGNATURE: &str = "fDB";
pub const VERSION: u32 = 1;
pub const MIN_ROW_SIZE: u32 = 128;
pub const MAX_ROW_SIZE: u32 = 65536;
pub const MAX_SKEW_MS: i64 = 86_400_000;

/// Parsed form of the fixed 64-byte header at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub row_size: u32,
    pub skew_ms: i64,
}

impl Header {
    pub fn new(row_size: u32, skew_ms: i64) -> Result<Self, Error> {
        let header = Header { row_size, skew_ms };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.row_size < MIN_ROW_SIZE || self.row_size > MAX_ROW_SIZE {
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

    /// Serializes this header to its fixed 64-byte on-disk form: a compact
    /// JSON object with a fixed key order, NUL-padded to offset 62, with
    /// byte 63 holding the terminating newline.
    pub fn marshal(&self) -> [u8; HEADER_LEN] {
        let json = format!(
            "{{\"sig\":\"{SIGNATURE}\",\"ver\":{VERSION},\"row_size\":{},\"skew_ms\":{}}}",
            self.row_size, self.skew_ms
        );
        let json = json.into_bytes();
        assert!(
            json.len() <= HEADER_LEN - 2,
            "header JSON of {} bytes does not fit before the padding boundary",
            json.len()
        );
        let mut out = [0u8; HEADER_LEN];
        out[..json.len()].copy_from_slice(&json);
        out[HEADER_LEN - 1] = b'\n';
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != HEADER_LEN {
            return Err(Error::corrupt(format!(
                "header must be {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[HEADER_LEN - 1] != b'\n' {
            return Err(Error::corrupt("header byte 63 must be a newline"));
        }
        let json_end = bytes[..HEADER_LEN - 1]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(HEADER_LEN - 1);
        if bytes[json_end..HEADER_LEN - 1].iter().any(|&b| b != 0) {
            return Err(Error::corrupt("header padding contains non-NUL bytes"));
        }
        let json_str = std::str::from_utf8(&bytes[..json_end])
            .map_err(|e| Error::corrupt(format!("header is not valid UTF-8: {e}")))?;
        let value: serde_json::Value = serde_json::from_str(json_str)
            .map_err(|e| Error::corrupt(format!("header is not valid JSON: {e}")))?;

        let sig = value
            .get("sig")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::corrupt("header missing string field 'sig'"))?;
        if sig != SIGNATURE {
            return Err(Error::corrupt(format!(
                "header signature {sig:?} does not match expected {SIGNATURE:?}"
            )));
        }
        let ver = value
            .get("ver")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| Error::corrupt("header missing integer field 'ver'"))?;
        if ver != u64::from(VERSION) {
            return Err(Error::corrupt(format!(
                "unsupported header version {ver}, expected {VERSION}"
            )));
        }
        let row_size = value
            .get("row_size")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Error::corrupt("header missing integer field 'row_size'"))?;
        let skew_ms = value
            .get("skew_ms")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| Error::corrupt("header missing integer field 'skew_ms'"))?;

        let header = Header { row_size, skew_ms };
        header.validate()?;
        Ok(header)
    }
}
