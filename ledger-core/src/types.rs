//! Core types for the ledger
//!
//! Amounts are plain integers (cents). Balances are carried as `i64`
//! internally; the wire and disk formats narrow them to `i32`.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum description length in bytes
pub const MAX_DESCRIPTION_LEN: usize = 10;

/// Number of recent transactions kept per account
pub const RECENT_CAPACITY: usize = 5;

/// Account identifier
///
/// Only the first character of an external id is significant: `"12"` and
/// `"1"` address the same account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(u8);

impl AccountId {
    /// Create from the raw id byte
    pub const fn new(byte: u8) -> Self {
        Self(byte)
    }

    /// Parse an external id, keeping its first byte
    pub fn parse(id: &str) -> Result<Self> {
        id.as_bytes()
            .first()
            .copied()
            .map(Self)
            .ok_or_else(|| Error::Validation("account id is empty".to_string()))
    }

    /// Raw id byte
    pub fn as_byte(&self) -> u8 {
        self.0
    }

    /// Index into a 256-slot table
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Directory name used by segment storage
    ///
    /// Alphanumeric ids map to themselves; every other byte is hex-encoded
    /// (`x2f` for `/`) so no id can name a path outside its own directory.
    pub fn dir_name(&self) -> String {
        if self.0.is_ascii_alphanumeric() {
            (self.0 as char).to_string()
        } else {
            format!("x{:02x}", self.0)
        }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_ascii_graphic() {
            write!(f, "{}", self.0 as char)
        } else {
            write!(f, "0x{:02x}", self.0)
        }
    }
}

impl TryFrom<String> for AccountId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.to_string()
    }
}

/// Transaction kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Increases balance
    Credit,
    /// Decreases balance
    Debit,
}

impl TransactionKind {
    /// Wire tag (`c` / `d`)
    pub fn tag(&self) -> u8 {
        match self {
            TransactionKind::Credit => b'c',
            TransactionKind::Debit => b'd',
        }
    }

    /// Parse a wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'c' => Some(TransactionKind::Credit),
            b'd' => Some(TransactionKind::Debit),
            _ => None,
        }
    }

    /// Parse the gateway form (`c`, `d`, `credit`, `debit`)
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "c" | "credit" => Ok(TransactionKind::Credit),
            "d" | "debit" => Ok(TransactionKind::Debit),
            other => Err(Error::Validation(format!("invalid kind {:?}", other))),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag() as char)
    }
}

/// A credit or debit against one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Credit or debit
    pub kind: TransactionKind,

    /// Unsigned amount; the sign comes from `kind`
    pub magnitude: i32,

    /// 1..=10 bytes
    pub description: String,

    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl Transaction {
    /// Create a transaction stamped with the current time
    pub fn new(kind: TransactionKind, magnitude: i32, description: impl Into<String>) -> Self {
        Self {
            kind,
            magnitude,
            description: description.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Shorthand for a credit
    pub fn credit(magnitude: i32, description: impl Into<String>) -> Self {
        Self::new(TransactionKind::Credit, magnitude, description)
    }

    /// Shorthand for a debit
    pub fn debit(magnitude: i32, description: impl Into<String>) -> Self {
        Self::new(TransactionKind::Debit, magnitude, description)
    }

    /// Balance change this transaction applies
    pub fn signed_delta(&self) -> i64 {
        match self.kind {
            TransactionKind::Credit => self.magnitude as i64,
            TransactionKind::Debit => -(self.magnitude as i64),
        }
    }

    /// Timestamp as a `DateTime`
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Reject malformed transactions before they reach the ledger
    pub fn validate(&self) -> Result<()> {
        if self.magnitude < 0 {
            return Err(Error::Validation(format!(
                "invalid magnitude {}",
                self.magnitude
            )));
        }

        let len = self.description.len();
        if len == 0 || len > MAX_DESCRIPTION_LEN {
            return Err(Error::Validation(format!(
                "invalid description {:?} ({} bytes)",
                self.description, len
            )));
        }

        Ok(())
    }
}

/// Result of an accepted save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitAndBalance {
    /// Credit limit
    pub limit: i64,
    /// Balance after the save
    pub balance: i64,
}

/// Account statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Credit limit
    pub limit: i64,

    /// Current balance
    pub balance: i64,

    /// When the statement was taken
    pub as_of: DateTime<Utc>,

    /// Up to five transactions, most recent first
    pub recent: Vec<Transaction>,
}

/// Fixed-size ring of the most recent transactions
///
/// Slots are overwritten oldest first once full.
#[derive(Debug, Clone, Default)]
pub struct RecentTransactions {
    slots: [Option<Transaction>; RECENT_CAPACITY],
    next: usize,
    len: usize,
}

impl RecentTransactions {
    /// Empty ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, overwriting the oldest slot when full
    pub fn push(&mut self, tx: Transaction) {
        self.slots[self.next] = Some(tx);
        self.next = (self.next + 1) % RECENT_CAPACITY;
        self.len = (self.len + 1).min(RECENT_CAPACITY);
    }

    /// Number of held transactions
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been inserted
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Held transactions, most recent first
    pub fn most_recent_first(&self) -> Vec<Transaction> {
        (1..=self.len)
            .filter_map(|back| {
                let idx = (self.next + RECENT_CAPACITY - back) % RECENT_CAPACITY;
                self.slots[idx].clone()
            })
            .collect()
    }
}

impl Extend<Transaction> for RecentTransactions {
    fn extend<I: IntoIterator<Item = Transaction>>(&mut self, iter: I) {
        for tx in iter {
            self.push(tx);
        }
    }
}
