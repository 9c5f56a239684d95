//! Error types for the ledger

use crate::types::AccountId;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Account id outside the provisioned set
    #[error("Client not initialized: {0}")]
    ClientNotInitialized(AccountId),

    /// Debit would push the balance below `-limit`
    #[error("Limit exceeded: {0}")]
    LimitExceeded(AccountId),

    /// Malformed transaction (kind, magnitude, description)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Frame of unexpected length or opcode
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Concurrency error (writer queue closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (segment read/write, sockets)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Business outcomes are returned to the caller, not treated as failures
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Error::ClientNotInitialized(_) | Error::LimitExceeded(_)
        )
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Config(format!("metrics registry: {}", err))
    }
}
