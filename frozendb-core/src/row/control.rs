//! Start-control and end-control byte pairs shared by every `DataRow`.
//!
//! These are kept separate from the row variants themselves because the
//! transaction engine, the finders, and the recovery path all need to
//! reason about end-control semantics without necessarily holding a fully
//! parsed row in hand.

use crate::error::Error;

/// Byte 1 of a `DataRow`: does this row begin a transaction, or continue one
/// already in progress?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartControl {
    /// `'T'` — first row of a transaction.
    Transaction,
    /// `'R'` — continuation of the transaction begun by a prior row.
    Continuation,
}

impl StartControl {
    pub fn to_byte(self) -> u8 {
        match self {
            StartControl::Transaction => b'T',
            StartControl::Continuation => b'R',
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, Error> {
        match b {
            b'T' => Ok(StartControl::Transaction),
            b'R' => Ok(StartControl::Continuation),
            other => Err(Error::corrupt(format!(
                "invalid start_control byte {other:#04x}"
            ))),
        }
    }
}

/// The two-byte end-control field of a `DataRow`.
///
/// Ordered roughly by how often each is produced in practice: plain
/// intermediate and commit rows dominate real workloads, rollbacks and
/// savepoints are comparatively rare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndControl {
    /// `TC` — final row of a committed transaction, no savepoint pending.
    Commit,
    /// `RE` — intermediate row, no savepoint pending on it.
    Intermediate,
    /// `SC` — final row of a committed transaction that was itself
    /// flagged as a savepoint via [`savepoint`](crate::transaction::Transaction::savepoint).
    SavepointCommit,
    /// `SE` — intermediate row flagged as a savepoint.
    SavepointIntermediate,
    /// `R0`..`R9` — transaction rolled back; 0 means fully discarded, N
    /// means rolled back to savepoint N. Produced when the row being
    /// finalized had not itself been flagged as a savepoint.
    Rollback(u8),
    /// `S1`..`S9` — rollback-to-savepoint-N, produced when the row being
    /// finalized had already been flagged as a savepoint (the leading `S`
    /// byte was already durable on disk before the rollback digit).
    /// `S0` is reserved and never produced by this implementation.
    SavepointRollback(u8),
    /// `NR` — the row is a `NullRow`, not a `DataRow`. `DataRow::parse`
    /// never returns this variant; it exists so shared helpers over
    /// "any terminal control" do not need a separate null case.
    Null,
}

impl EndControl {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            EndControl::Commit => *b"TC",
            EndControl::Intermediate => *b"RE",
            EndControl::SavepointCommit => *b"SC",
            EndControl::SavepointIntermediate => *b"SE",
            EndControl::Rollback(n) => [b'R', digit_to_ascii(n)],
            EndControl::SavepointRollback(n) => [b'S', digit_to_ascii(n)],
            EndControl::Null => *b"NR",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 2 {
            return Err(Error::corrupt("end_control must be exactly 2 bytes"));
        }
        match bytes {
            b"TC" => Ok(EndControl::Commit),
            b"RE" => Ok(EndControl::Intermediate),
            b"SC" => Ok(EndControl::SavepointCommit),
            b"SE" => Ok(EndControl::SavepointIntermediate),
            b"NR" => Ok(EndControl::Null),
            [b'R', d] if d.is_ascii_digit() => Ok(EndControl::Rollback(ascii_to_digit(*d))),
            [b'S', d] if d.is_ascii_digit() => {
                Ok(EndControl::SavepointRollback(ascii_to_digit(*d)))
            }
            _ => Err(Error::corrupt(format!(
                "unrecognized end_control {:?}",
                String::from_utf8_lossy(bytes)
            ))),
        }
    }

    /// `true` for any end_control that terminates a transaction (as opposed
    /// to `RE`/`SE`, which mark an intermediate row with more to come).
    pub fn is_terminal(self) -> bool {
        !matches!(self, EndControl::Intermediate | EndControl::SavepointIntermediate)
    }

    /// `true` when this terminal row represents a successful commit
    /// (`TC`/`SC`), as opposed to a rollback.
    pub fn is_committed(self) -> bool {
        matches!(self, EndControl::Commit | EndControl::SavepointCommit)
    }

    /// `true` when this row (terminal or intermediate) was itself flagged
    /// via `savepoint()`, i.e. its on-disk form carries a leading `S` byte.
    pub fn is_savepoint_flagged(self) -> bool {
        matches!(
            self,
            EndControl::SavepointCommit
                | EndControl::SavepointIntermediate
                | EndControl::SavepointRollback(_)
        )
    }

    /// For a terminal rollback control, the savepoint id rolled back to
    /// (`0` means the whole transaction was discarded).
    pub fn rollback_target(self) -> Option<u8> {
        match self {
            EndControl::Rollback(n) | EndControl::SavepointRollback(n) => Some(n),
            _ => None,
        }
    }
}

fn digit_to_ascii(n: u8) -> u8 {
    debug_assert!(n <= 9);
    b'0' + n
}

fn ascii_to_digit(b: u8) -> u8 {
    b - b'0'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_control_round_trips() {
        for ec in [
            EndControl::Commit,
            EndControl::Intermediate,
            EndControl::SavepointCommit,
            EndControl::SavepointIntermediate,
            EndControl::Rollback(0),
            EndControl::Rollback(9),
            EndControl::SavepointRollback(1),
            EndControl::Null,
        ] {
            let bytes = ec.to_bytes();
            assert_eq!(EndControl::from_bytes(&bytes).unwrap(), ec);
        }
    }

    #[test]
    fn rejects_lowercase_end_control() {
        assert!(EndControl::from_bytes(b"tc").is_err());
    }

    #[test]
    fn start_control_round_trips() {
        assert_eq!(
            StartControl::from_byte(StartControl::Transaction.to_byte()).unwrap(),
            StartControl::Transaction
        );
        assert_eq!(
            StartControl::from_byte(StartControl::Continuation.to_byte()).unwrap(),
            StartControl::Continuation
        );
    }
}
