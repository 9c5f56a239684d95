//! Wire protocol frames
//!
//! Requests are framed by length alone:
//!
//! | Request | Bytes | Layout                         |
//! |---------|-------|--------------------------------|
//! | Save    | 25    | `'1'` + 24-byte record         |
//! | Extract | 2     | `'0'` + account id byte        |
//!
//! Responses start with a status byte. `'0'` is followed by the LE `i32`
//! limit and balance (and, for extracts, up to five records, most recent
//! first). `'e'` is followed by a one-byte error code.

use crate::{
    codec::{Record, RECORD_SIZE},
    error::{Error, Result},
    types::{AccountId, LimitAndBalance, Statement, RECENT_CAPACITY},
};
use bytes::{Buf, BufMut, BytesMut};

/// Save opcode
pub const OP_SAVE: u8 = b'1';
/// Extract opcode
pub const OP_EXTRACT: u8 = b'0';

/// Length of a save request frame
pub const SAVE_FRAME_LEN: usize = 1 + RECORD_SIZE;
/// Length of an extract request frame
pub const EXTRACT_FRAME_LEN: usize = 2;

/// Success status byte
pub const STATUS_OK: u8 = b'0';
/// Error status byte
pub const STATUS_ERROR: u8 = b'e';

const LIMIT_BALANCE_LEN: usize = 1 + 4 + 4;
/// Largest response frame (full extract)
pub const MAX_RESPONSE_LEN: usize = LIMIT_BALANCE_LEN + RECENT_CAPACITY * RECORD_SIZE;

/// Error codes carried after `'e'`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// `'n'` account not provisioned
    NotInitialized,
    /// `'l'` debit would breach the credit limit
    LimitExceeded,
    /// `'v'` malformed transaction
    Invalid,
}

impl ErrorCode {
    /// Wire byte
    pub fn byte(&self) -> u8 {
        match self {
            ErrorCode::NotInitialized => b'n',
            ErrorCode::LimitExceeded => b'l',
            ErrorCode::Invalid => b'v',
        }
    }

    /// Parse a wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'n' => Some(ErrorCode::NotInitialized),
            b'l' => Some(ErrorCode::LimitExceeded),
            b'v' => Some(ErrorCode::Invalid),
            _ => None,
        }
    }

    /// Code to answer with for a ledger error, if the error has one
    pub fn for_error(err: &Error) -> Option<Self> {
        match err {
            Error::ClientNotInitialized(_) => Some(ErrorCode::NotInitialized),
            Error::LimitExceeded(_) => Some(ErrorCode::LimitExceeded),
            Error::Validation(_) => Some(ErrorCode::Invalid),
            _ => None,
        }
    }

    /// Turn a received code back into a ledger error
    pub fn into_error(self, account: AccountId) -> Error {
        match self {
            ErrorCode::NotInitialized => Error::ClientNotInitialized(account),
            ErrorCode::LimitExceeded => Error::LimitExceeded(account),
            ErrorCode::Invalid => Error::Validation("rejected by server".to_string()),
        }
    }
}

/// Decoded request frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Apply the transaction in the record
    Save(Record),
    /// Statement for an account
    Extract(AccountId),
}

impl Request {
    /// Parse one frame; any length other than 25 or 2 is a protocol error
    pub fn parse(frame: &[u8]) -> Result<Self> {
        match (frame.len(), frame.first()) {
            (SAVE_FRAME_LEN, Some(&OP_SAVE)) => Ok(Request::Save(Record::from_slice(&frame[1..])?)),
            (EXTRACT_FRAME_LEN, Some(&OP_EXTRACT)) => Ok(Request::Extract(AccountId::new(frame[1]))),
            (SAVE_FRAME_LEN, Some(&op)) | (EXTRACT_FRAME_LEN, Some(&op)) => Err(Error::Protocol(
                format!("unknown opcode 0x{:02x} for {}-byte frame", op, frame.len()),
            )),
            (len, _) => Err(Error::Protocol(format!("unexpected frame length {}", len))),
        }
    }

    /// Encode as a request frame
    pub fn encode(&self) -> BytesMut {
        match self {
            Request::Save(record) => {
                let mut buf = BytesMut::with_capacity(SAVE_FRAME_LEN);
                buf.put_u8(OP_SAVE);
                buf.put_slice(record.as_bytes());
                buf
            }
            Request::Extract(account) => {
                let mut buf = BytesMut::with_capacity(EXTRACT_FRAME_LEN);
                buf.put_u8(OP_EXTRACT);
                buf.put_u8(account.as_byte());
                buf
            }
        }
    }
}

fn narrow(value: i64, what: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| Error::Protocol(format!("{} {} does not fit the wire format", what, value)))
}

fn put_limit_balance(buf: &mut BytesMut, limit: i64, balance: i64) -> Result<()> {
    buf.put_u8(STATUS_OK);
    buf.put_i32_le(narrow(limit, "limit")?);
    buf.put_i32_le(narrow(balance, "balance")?);
    Ok(())
}

/// Successful save response
pub fn encode_save_ok(result: &LimitAndBalance) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(LIMIT_BALANCE_LEN);
    put_limit_balance(&mut buf, result.limit, result.balance)?;
    Ok(buf)
}

/// Successful extract response; records follow most recent first
pub fn encode_extract_ok(account: AccountId, statement: &Statement) -> Result<BytesMut> {
    let count = statement.recent.len().min(RECENT_CAPACITY);
    let mut buf = BytesMut::with_capacity(LIMIT_BALANCE_LEN + count * RECORD_SIZE);
    put_limit_balance(&mut buf, statement.limit, statement.balance)?;

    for tx in statement.recent.iter().take(count) {
        buf.put_slice(Record::encode(account, tx).as_bytes());
    }
    Ok(buf)
}

/// Two-byte error response
pub fn encode_error(code: ErrorCode) -> BytesMut {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u8(STATUS_ERROR);
    buf.put_u8(code.byte());
    buf
}

/// Decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Limit, balance and any trailing records
    Ok {
        /// Credit limit
        limit: i32,
        /// Balance
        balance: i32,
        /// Extract records, most recent first (empty for saves)
        records: Vec<Record>,
    },
    /// Error status
    Error(ErrorCode),
}

impl Response {
    /// Parse a response frame
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let mut buf = frame;
        if buf.remaining() < 2 {
            return Err(Error::Protocol(format!("response too short: {} bytes", frame.len())));
        }

        match buf.get_u8() {
            STATUS_ERROR => {
                let code = buf.get_u8();
                ErrorCode::from_byte(code)
                    .map(Response::Error)
                    .ok_or_else(|| Error::Protocol(format!("unknown error code 0x{:02x}", code)))
            }
            STATUS_OK => {
                if buf.remaining() < 8 {
                    return Err(Error::Protocol(format!(
                        "truncated response: {} bytes",
                        frame.len()
                    )));
                }
                let limit = buf.get_i32_le();
                let balance = buf.get_i32_le();

                if buf.remaining() % RECORD_SIZE != 0 {
                    return Err(Error::Protocol(format!(
                        "{} trailing bytes are not whole records",
                        buf.remaining()
                    )));
                }
                let records = buf
                    .chunks_exact(RECORD_SIZE)
                    .map(Record::from_slice)
                    .collect::<Result<Vec<_>>>()?;

                Ok(Response::Ok {
                    limit,
                    balance,
                    records,
                })
            }
            status => Err(Error::Protocol(format!("unknown status 0x{:02x}", status))),
        }
    }
}
