//! `PartialDataRow`: the shape of an in-progress transaction's trailing,
//! not-yet-terminated row.
//!
//! Three durable states exist, distinguished purely by byte length:
//! `S1` (just the two framing bytes), `S2` (body through the padded
//! payload), and `S3` (`S2` plus the single byte `savepoint()` writes
//! ahead of the end_control pair). Recovery uses [`classify`] to decide
//! whether a file's tail is a well-formed partial row it should ignore
//! (read mode) or truncate away (write mode).

use crate::codec::ROW_START;
use crate::error::Error;
use crate::row::control::StartControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialState {
    S1,
    S2,
    S3,
}

pub fn expected_lengths(row_size: usize) -> (usize, usize, usize) {
    (2, row_size - 5, row_size - 4)
}

/// Validates that `bytes` (the file's trailing, less-than-a-full-row tail)
/// forms one of the three legal `PartialDataRow` states for the given
/// `row_size`, and returns which one.
pub fn classify(bytes: &[u8], row_size: usize) -> Result<PartialState, Error> {
    let (s1, s2, s3) = expected_lengths(row_size);
    if bytes.is_empty() {
        return Err(Error::corrupt("partial row cannot be empty"));
    }
    if bytes[0] != ROW_START {
        return Err(Error::corrupt("partial row missing ROW_START sentinel"));
    }

    match bytes.len() {
        len if len == s1 => {
            StartControl::from_byte(bytes[1])?;
            Ok(PartialState::S1)
        }
        len if len == s2 => {
            StartControl::from_byte(bytes[1])?;
            Ok(PartialState::S2)
        }
        len if len == s3 => {
            StartControl::from_byte(bytes[1])?;
            if bytes[len - 1] != b'S' {
                return Err(Error::corrupt(
                    "partial row in S3 must end with the savepoint marker byte 'S'",
                ));
            }
            Ok(PartialState::S3)
        }
        other => Err(Error::corrupt(format!(
            "trailing {other} bytes do not match any PartialDataRow length ({s1}, {s2}, {s3})"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_state() {
        let row_size = 256;
        assert_eq!(
            classify(&[ROW_START, b'T'], row_size).unwrap(),
            PartialState::S1
        );
        let mut s2 = vec![0u8; row_size - 5];
        s2[0] = ROW_START;
        s2[1] = b'R';
        assert_eq!(classify(&s2, row_size).unwrap(), PartialState::S2);
        let mut s3 = s2.clone();
        s3.push(b'S');
        assert_eq!(classify(&s3, row_size).unwrap(), PartialState::S3);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(classify(&[ROW_START, b'T', 0], 256).is_err());
    }

    #[test]
    fn rejects_missing_savepoint_byte_in_s3() {
        let row_size = 256;
        let mut s3 = vec![0u8; row_size - 5];
        s3[0] = ROW_START;
        s3[1] = b'T';
        s3.push(b'X');
        assert!(classify(&s3, row_size).is_err());
    }
}
