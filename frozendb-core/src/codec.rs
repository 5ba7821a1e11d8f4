//! Pure, allocation-light codec primitives shared by every row variant.
//!
//! Nothing in this module touches a file handle. Row marshal/parse logic in
//! [`crate::row`] builds on top of these functions; keeping them separate
//! makes each one independently testable and keeps the on-disk format's
//! bit-exact rules (ASCII-only fields, uppercase hex, fixed sentinel bytes)
//! in one place.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use uuid::Uuid;

use crate::error::Error;

/// Marks the first byte of every row (checksum, data, null, or partial).
pub const ROW_START: u8 = 0x1F;
/// Marks the last byte of every complete (non-partial) row.
pub const ROW_END: u8 = 0x0A;
/// Padding byte used to fill unused space in payload and header regions.
pub const NUL: u8 = 0x00;

/// Width, in bytes, of the base64-standard encoding of a 16-byte UUID.
pub const ENCODED_UUID_LEN: usize = 24;

/// Encodes a UUID as 24 bytes of base64-standard (with padding), matching
/// the on-disk field at bytes `[2..26)` of a `DataRow`/`NullRow`.
pub fn encode_uuid(uuid: &Uuid) -> [u8; ENCODED_UUID_LEN] {
    let mut out = [0u8; ENCODED_UUID_LEN];
    let written = BASE64_STANDARD
        .encode_slice(uuid.as_bytes(), &mut out)
        .expect("16 bytes always encode to exactly 24 base64-standard bytes");
    debug_assert_eq!(written, ENCODED_UUID_LEN);
    out
}

/// Decodes the 24-byte base64-standard UUID field written by [`encode_uuid`].
///
/// Does not enforce UUIDv7 shape or non-zero randomness; callers validate
/// those separately, since `NullRow` intentionally violates the
/// non-zero-randomness rule.
pub fn decode_uuid(bytes: &[u8]) -> Result<Uuid, Error> {
    if bytes.len() != ENCODED_UUID_LEN {
        return Err(Error::invalid_input(format!(
            "uuid field must be {ENCODED_UUID_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut raw = [0u8; 16];
    let written = BASE64_STANDARD
        .decode_slice(bytes, &mut raw)
        .map_err(|e| Error::corrupt(format!("invalid base64 uuid field: {e}")))?;
    if written != 16 {
        return Err(Error::corrupt(format!(
            "decoded uuid field had {written} bytes, expected 16"
        )));
    }
    Ok(Uuid::from_bytes(raw))
}

/// Returns the UUIDv7 timestamp (milliseconds since the Unix epoch) encoded
/// in the first 48 bits, regardless of what the version nibble says — used
/// by [`validate_uuidv7`] and by callers who already know the shape is fine.
pub fn uuid_timestamp_ms(uuid: &Uuid) -> i64 {
    let b = uuid.as_bytes();
    let ms = u64::from_be_bytes([0, 0, b[0], b[1], b[2], b[3], b[4], b[5]]);
    ms as i64
}

/// Validates that `uuid` has version nibble 7 and, unless `allow_zero_random`
/// is set (the `NullRow` exception), non-zero randomness bits.
pub fn validate_uuidv7(uuid: &Uuid, allow_zero_random: bool) -> Result<(), Error> {
    let b = uuid.as_bytes();
    let version_nibble = b[6] >> 4;
    if version_nibble != 7 {
        return Err(Error::invalid_input(format!(
            "uuid {uuid} is not a UUIDv7 (version nibble {version_nibble})"
        )));
    }
    if !allow_zero_random {
        // Randomness occupies the low nibble of byte 6, all of byte 7 (minus
        // the variant bits already baked into byte 8), and bytes 8..16 minus
        // the two variant bits. We conservatively treat "all of bytes 8..16
        // and the low nibble of byte 6 and all of byte 7 are zero" as the
        // all-zero-randomness pattern reserved for NullRow.
        let random_is_zero = (b[6] & 0x0F) == 0
            && b[7] == 0
            && b[8..16].iter().all(|&x| x == 0 || x == 0x80);
        if random_is_zero {
            return Err(Error::invalid_input(
                "uuid has all-zero randomness, which is reserved for NullRow",
            ));
        }
    }
    Ok(())
}

/// Appends NUL padding to `json_bytes` until it is exactly `target_len`
/// bytes long. Fails if `json_bytes` is already longer than `target_len`.
pub fn pad_payload(json_bytes: &[u8], target_len: usize) -> Result<Vec<u8>, Error> {
    if json_bytes.len() > target_len {
        return Err(Error::invalid_input(format!(
            "payload of {} bytes exceeds padded field width of {target_len} bytes",
            json_bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(target_len);
    out.extend_from_slice(json_bytes);
    out.resize(target_len, NUL);
    Ok(out)
}

/// Strips trailing NUL padding, validating that every trailing byte actually
/// is NUL (a non-NUL byte after the JSON value indicates framing corruption).
pub fn unpad_payload(padded: &[u8]) -> Result<&[u8], Error> {
    // A NUL byte can never appear inside a valid JSON text, so the first NUL
    // unambiguously marks the start of padding.
    match padded.iter().position(|&b| b == NUL) {
        Some(end) => {
            if padded[end..].iter().any(|&b| b != NUL) {
                return Err(Error::corrupt(
                    "payload padding contains non-NUL bytes after the JSON value",
                ));
            }
            Ok(&padded[..end])
        }
        None => Ok(padded),
    }
}

/// XOR-reduces every byte of `data` and renders the 8-bit result as two
/// ASCII uppercase hex digits.
pub fn lrc_parity(data: &[u8]) -> [u8; 2] {
    let parity = data.iter().fold(0u8, |acc, &b| acc ^ b);
    hex2_upper(parity)
}

/// Recomputes the LRC parity over `data` and compares it against the
/// two-byte ASCII hex field read from disk.
pub fn check_lrc_parity(data: &[u8], on_disk: &[u8]) -> Result<(), Error> {
    let expected = lrc_parity(data);
    if expected != on_disk {
        return Err(Error::corrupt(format!(
            "lrc parity mismatch: expected {}, found {}",
            ascii2(&expected),
            ascii2(on_disk)
        )));
    }
    Ok(())
}

/// Computes the IEEE CRC32 (polynomial 0xEDB88320) of `data`.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Renders a CRC32 value as 8 ASCII uppercase hex digits, the on-disk form
/// used by `ChecksumRow`.
pub fn crc32_to_hex(crc: u32) -> [u8; 8] {
    let bytes = crc.to_be_bytes();
    let mut out = [0u8; 8];
    for (i, &b) in bytes.iter().enumerate() {
        let pair = hex2_upper(b);
        out[i * 2] = pair[0];
        out[i * 2 + 1] = pair[1];
    }
    out
}

/// Parses 8 ASCII uppercase hex digits back into a CRC32 value, rejecting
/// lowercase or non-hex bytes.
pub fn hex_to_crc32(hex: &[u8]) -> Result<u32, Error> {
    if hex.len() != 8 {
        return Err(Error::corrupt(format!(
            "crc32 hex field must be 8 bytes, got {}",
            hex.len()
        )));
    }
    let mut bytes = [0u8; 4];
    for i in 0..4 {
        bytes[i] = parse_hex_byte_upper(hex[i * 2], hex[i * 2 + 1])?;
    }
    Ok(u32::from_be_bytes(bytes))
}

/// Parses the two-byte ASCII uppercase hex parity field back into its 8-bit value.
pub fn hex_to_u8(hex: &[u8]) -> Result<u8, Error> {
    if hex.len() != 2 {
        return Err(Error::corrupt(format!(
            "hex byte field must be 2 bytes, got {}",
            hex.len()
        )));
    }
    parse_hex_byte_upper(hex[0], hex[1])
}

fn hex2_upper(byte: u8) -> [u8; 2] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    [DIGITS[(byte >> 4) as usize], DIGITS[(byte & 0x0F) as usize]]
}

fn ascii2(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn hex_nibble_upper(b: u8) -> Result<u8, Error> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        b'a'..=b'f' => Err(Error::corrupt(
            "lowercase hex digit where uppercase is required",
        )),
        _ => Err(Error::corrupt(format!("invalid hex digit {:#04x}", b))),
    }
}

fn parse_hex_byte_upper(hi: u8, lo: u8) -> Result<u8, Error> {
    Ok((hex_nibble_upper(hi)? << 4) | hex_nibble_upper(lo)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn uuid_round_trips_through_encoding() {
        let uuid = Uuid::now_v7();
        let encoded = encode_uuid(&uuid);
        let decoded = decode_uuid(&encoded).unwrap();
        assert_eq!(uuid, decoded);
    }

    #[test]
    fn pad_payload_rejects_oversized_input() {
        let err = pad_payload(b"0123456789", 4).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn pad_then_unpad_is_identity() {
        let padded = pad_payload(b"{\"a\":1}", 32).unwrap();
        assert_eq!(unpad_payload(&padded).unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn unpad_rejects_garbage_after_nul() {
        let mut padded = pad_payload(b"{}", 8).unwrap();
        *padded.last_mut().unwrap() = b'x';
        assert!(unpad_payload(&padded).is_err());
    }

    #[test]
    fn crc32_hex_round_trips() {
        let crc = crc32_ieee(b"the quick brown fox");
        let hex = crc32_to_hex(crc);
        assert_eq!(hex_to_crc32(&hex).unwrap(), crc);
    }

    #[test]
    fn lrc_parity_rejects_lowercase() {
        let data = b"hello world";
        let mut hex = lrc_parity(data);
        hex[0] = hex[0].to_ascii_lowercase();
        assert!(check_lrc_parity(data, &hex).is_err());
    }

    proptest! {
        #[test]
        fn lrc_parity_detects_single_byte_flip(data in proptest::collection::vec(any::<u8>(), 1..256), flip_index in 0usize..255) {
            let idx = flip_index % data.len();
            let parity = lrc_parity(&data);
            let mut corrupted = data.clone();
            corrupted[idx] ^= 0xFF;
            if corrupted != data {
                prop_assert_ne!(lrc_parity(&corrupted), parity);
            }
        }

        #[test]
        fn crc32_hex_encoding_is_reversible(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let crc = crc32_ieee(&data);
            let hex = crc32_to_hex(crc);
            prop_assert_eq!(hex_to_crc32(&hex).unwrap(), crc);
        }
    }
}
