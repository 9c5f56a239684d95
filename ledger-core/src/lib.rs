//! Credit Ledger Core
//!
//! Per-account credit ledger with write-behind segment storage and a
//! length-framed TCP protocol.
//!
//! # Architecture
//!
//! - **Per-account locking**: saves on one account are linearized, accounts never contend
//! - **Write-behind**: saves are confirmed from memory, persisted in batches
//! - **Segments**: append-only 24-byte records, one file per flushed batch
//! - **Recovery**: balances rebuilt by full scan, recent history from the newest segment
//!
//! # Invariants
//!
//! - A debit is accepted only if `balance - magnitude >= -limit`
//! - Limits never change after provisioning
//! - Per-account segments preserve save order

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod codec;
pub mod storage;
pub mod writer;
pub mod ledger;
pub mod recovery;
pub mod protocol;
pub mod server;
pub mod client;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{AccountId, LimitAndBalance, Statement, Transaction, TransactionKind};
pub use codec::Record;
pub use storage::SegmentStorage;
pub use ledger::Ledger;
pub use server::LedgerServer;
pub use client::LedgerClient;
pub use config::Config;
