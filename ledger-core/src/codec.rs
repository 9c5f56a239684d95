//! Fixed-size binary record shared by the wire protocol and segment files
//!
//! ```text
//!  0   1   2                               10              14                      24
//! +---+---+-------------------------------+---------------+-----------------------+
//! |id |knd|  timestamp ms (i64 LE)        | magnitude i32 | description, 0-padded |
//! +---+---+-------------------------------+---------------+-----------------------+
//! ```
//!
//! The codec is total: decoding never fails, and the kind byte is passed
//! through untouched. Callers decide what to do with an unknown kind.

use crate::error::{Error, Result};
use crate::types::{AccountId, Transaction, TransactionKind, MAX_DESCRIPTION_LEN};

/// Encoded record size in bytes
pub const RECORD_SIZE: usize = 24;

const KIND_OFFSET: usize = 1;
const TIMESTAMP_OFFSET: usize = 2;
const MAGNITUDE_OFFSET: usize = 10;
const DESCRIPTION_OFFSET: usize = 14;

/// One encoded transaction plus its owning account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record([u8; RECORD_SIZE]);

impl Record {
    /// Encode a transaction for `account`
    ///
    /// Descriptions longer than 10 bytes are truncated.
    pub fn encode(account: AccountId, tx: &Transaction) -> Self {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = account.as_byte();
        buf[KIND_OFFSET] = tx.kind.tag();
        buf[TIMESTAMP_OFFSET..MAGNITUDE_OFFSET].copy_from_slice(&tx.timestamp_ms.to_le_bytes());
        buf[MAGNITUDE_OFFSET..DESCRIPTION_OFFSET].copy_from_slice(&tx.magnitude.to_le_bytes());

        let desc = tx.description.as_bytes();
        let len = desc.len().min(MAX_DESCRIPTION_LEN);
        buf[DESCRIPTION_OFFSET..DESCRIPTION_OFFSET + len].copy_from_slice(&desc[..len]);

        Self(buf)
    }

    /// Decode all fields without validating kind semantics
    pub fn decode(&self) -> DecodedRecord {
        let b = &self.0;

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&b[TIMESTAMP_OFFSET..MAGNITUDE_OFFSET]);
        let mut mag = [0u8; 4];
        mag.copy_from_slice(&b[MAGNITUDE_OFFSET..DESCRIPTION_OFFSET]);

        let desc = &b[DESCRIPTION_OFFSET..];
        let end = desc.iter().rposition(|&c| c != 0).map_or(0, |p| p + 1);

        DecodedRecord {
            account: AccountId::new(b[0]),
            kind_tag: b[KIND_OFFSET],
            timestamp_ms: i64::from_le_bytes(ts),
            magnitude: i32::from_le_bytes(mag),
            description: String::from_utf8_lossy(&desc[..end]).into_owned(),
        }
    }

    /// Wrap raw bytes
    pub fn from_bytes(bytes: [u8; RECORD_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy from a slice of exactly `RECORD_SIZE` bytes
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; RECORD_SIZE] = slice.try_into().map_err(|_| {
            Error::Protocol(format!(
                "record must be {} bytes, got {}",
                RECORD_SIZE,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; RECORD_SIZE] {
        &self.0
    }

    /// Account byte without a full decode
    pub fn account(&self) -> AccountId {
        AccountId::new(self.0[0])
    }

    /// Signed balance contribution, read straight from the kind and magnitude
    /// bytes. Anything other than a debit counts as a credit.
    pub fn signed_delta(&self) -> i64 {
        let mut mag = [0u8; 4];
        mag.copy_from_slice(&self.0[MAGNITUDE_OFFSET..DESCRIPTION_OFFSET]);
        let magnitude = i32::from_le_bytes(mag) as i64;
        if self.0[KIND_OFFSET] == TransactionKind::Debit.tag() {
            -magnitude
        } else {
            magnitude
        }
    }
}

/// Fields of a record as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    /// Owning account
    pub account: AccountId,
    /// Raw kind byte
    pub kind_tag: u8,
    /// Milliseconds since epoch
    pub timestamp_ms: i64,
    /// Magnitude as stored (may be negative on untrusted input)
    pub magnitude: i32,
    /// Description with trailing zero bytes trimmed
    pub description: String,
}

impl DecodedRecord {
    /// Validate the kind byte and the transaction fields
    pub fn into_transaction(self) -> Result<(AccountId, Transaction)> {
        let kind = TransactionKind::from_tag(self.kind_tag).ok_or_else(|| {
            Error::Validation(format!("invalid kind byte 0x{:02x}", self.kind_tag))
        })?;

        let tx = Transaction {
            kind,
            magnitude: self.magnitude,
            description: self.description,
            timestamp_ms: self.timestamp_ms,
        };
        tx.validate()?;

        Ok((self.account, tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(kind: TransactionKind, magnitude: i32, description: &str) -> Transaction {
        Transaction {
            kind,
            magnitude,
            description: description.to_string(),
            timestamp_ms: 1_708_169_655_190,
        }
    }

    #[test]
    fn test_known_layout() {
        let bytes = [
            49, 99, 150, 115, 216, 182, 141, 1, 0, 0, 100, 0, 0, 0, 116, 101, 115, 116, 0, 0, 0,
            0, 0, 0,
        ];
        let decoded = Record::from_bytes(bytes).decode();

        assert_eq!(decoded.account, AccountId::new(b'1'));
        assert_eq!(decoded.kind_tag, b'c');
        assert_eq!(decoded.timestamp_ms, 1_708_169_655_190);
        assert_eq!(decoded.magnitude, 100);
        assert_eq!(decoded.description, "test");
    }

    #[test]
    fn test_encode_matches_layout() {
        let record = Record::encode(AccountId::new(b'1'), &tx(TransactionKind::Credit, 100, "test"));
        let bytes = record.as_bytes();

        assert_eq!(bytes[0], b'1');
        assert_eq!(bytes[1], b'c');
        assert_eq!(&bytes[10..14], &[100, 0, 0, 0]);
        assert_eq!(&bytes[14..18], b"test");
        assert!(bytes[18..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_description_padding_boundaries() {
        let full = Record::encode(AccountId::new(b'2'), &tx(TransactionKind::Debit, 5, "0123456789"));
        assert_eq!(&full.as_bytes()[14..], b"0123456789");

        let single = Record::encode(AccountId::new(b'2'), &tx(TransactionKind::Debit, 5, "x"));
        assert_eq!(single.as_bytes()[14], b'x');
        assert_eq!(single.as_bytes()[15..].iter().filter(|&&b| b == 0).count(), 9);
    }

    #[test]
    fn test_long_description_truncated() {
        let record = Record::encode(
            AccountId::new(b'1'),
            &tx(TransactionKind::Credit, 1, "testasdasdasdasdasd"),
        );
        assert_eq!(record.decode().description, "testasdasd");
    }

    #[test]
    fn test_round_trip() {
        let original = tx(TransactionKind::Debit, 1000, "buy");
        let (account, decoded) = Record::encode(AccountId::new(b'1'), &original)
            .decode()
            .into_transaction()
            .unwrap();

        assert_eq!(account, AccountId::new(b'1'));
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_unknown_kind_rejected_by_caller() {
        let mut bytes = *Record::encode(AccountId::new(b'1'), &tx(TransactionKind::Credit, 1, "a")).as_bytes();
        bytes[1] = b'x';

        let decoded = Record::from_bytes(bytes).decode();
        assert_eq!(decoded.kind_tag, b'x');
        assert!(matches!(decoded.into_transaction(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_negative_magnitude_decodes() {
        let bytes = [
            49, 99, 33, 221, 97, 186, 141, 1, 0, 0, 156, 255, 255, 255, 116, 101, 115, 116, 0, 0,
            0, 0, 0, 0,
        ];
        let decoded = Record::from_bytes(bytes).decode();
        assert_eq!(decoded.magnitude, -100);
        assert_eq!(decoded.timestamp_ms, 1_708_228_992_289);
        assert!(decoded.into_transaction().is_err());
    }

    #[test]
    fn test_signed_delta() {
        let credit = Record::encode(AccountId::new(b'1'), &tx(TransactionKind::Credit, 7, "c"));
        let debit = Record::encode(AccountId::new(b'1'), &tx(TransactionKind::Debit, 7, "d"));
        assert_eq!(credit.signed_delta(), 7);
        assert_eq!(debit.signed_delta(), -7);
    }

    #[test]
    fn test_from_slice_length() {
        assert!(Record::from_slice(&[0u8; RECORD_SIZE]).is_ok());
        assert!(matches!(Record::from_slice(&[0u8; 23]), Err(Error::Protocol(_))));
    }
}
