//! Ledger registry
//!
//! Holds one slot per provisioned account, indexed by the id byte. Each slot
//! has its own lock, so saves on distinct accounts never contend.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger, Transaction, AccountId};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let account = AccountId::parse("1")?;
//!     let result = ledger.save(account, Transaction::debit(1000, "buy")).await?;
//!     println!("limit {} balance {}", result.limit, result.balance);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    config::AccountConfig,
    metrics::Metrics,
    recovery,
    storage::SegmentStorage,
    types::{AccountId, LimitAndBalance, RecentTransactions, Statement, Transaction},
    writer::{spawn_writer, WriterHandle},
    Config, Error, Result,
};
use chrono::Utc;
use parking_lot::Mutex;

const SLOT_COUNT: usize = 256;

/// Mutable part of an account, guarded by the slot lock
#[derive(Debug, Default)]
pub struct AccountState {
    /// Current balance
    pub balance: i64,

    /// Most recent accepted transactions
    pub recent: RecentTransactions,
}

/// One provisioned account
#[derive(Debug)]
struct AccountSlot {
    limit: i64,
    state: Mutex<AccountState>,
}

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Indexed by `AccountId::index`
    slots: Vec<Option<AccountSlot>>,

    /// Write-behind queue
    writer: WriterHandle,

    /// Segment storage (recovery, tooling)
    storage: SegmentStorage,

    metrics: Metrics,
}

impl Ledger {
    /// Open storage, recover provisioned accounts and start the writer
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = SegmentStorage::open(&config.data_dir)?;
        let metrics = Metrics::new()?;

        let mut seeds = Vec::with_capacity(config.accounts.len());
        for account in &config.accounts {
            let state = if config.recovery.enabled {
                recovery::recover_account(&storage, account.id).await?
            } else {
                AccountState::default()
            };
            seeds.push((account.clone(), state));
        }

        let writer = spawn_writer(storage.clone(), &config.batching, metrics.clone());
        let ledger = Self::with_accounts(seeds, writer, storage, metrics);

        tracing::info!(
            service = %config.service_name,
            accounts = config.accounts.len(),
            recovered = config.recovery.enabled,
            "Ledger opened"
        );

        Ok(ledger)
    }

    /// Build from already-seeded accounts
    pub fn with_accounts(
        accounts: impl IntoIterator<Item = (AccountConfig, AccountState)>,
        writer: WriterHandle,
        storage: SegmentStorage,
        metrics: Metrics,
    ) -> Self {
        let mut slots: Vec<Option<AccountSlot>> = (0..SLOT_COUNT).map(|_| None).collect();

        for (account, state) in accounts {
            tracing::debug!(
                account = %account.id,
                limit = account.limit,
                balance = state.balance,
                recent = state.recent.len(),
                "Provisioned account"
            );
            slots[account.id.index()] = Some(AccountSlot {
                limit: account.limit,
                state: Mutex::new(state),
            });
        }

        Self {
            slots,
            writer,
            storage,
            metrics,
        }
    }

    fn slot(&self, account: AccountId) -> Result<&AccountSlot> {
        self.slots[account.index()]
            .as_ref()
            .ok_or(Error::ClientNotInitialized(account))
    }

    /// Apply a transaction and queue it for persistence
    ///
    /// The balance check and update happen in one locked step. A balance
    /// that would leave the `i32` wire range is rejected as invalid.
    ///
    /// The transaction is handed to the writer without waiting while the
    /// lock is still held, so the writer sees saves on one account in the
    /// order they were applied. Only when the queue is full does the save
    /// wait for room after releasing the lock; under that backpressure two
    /// racing saves may reach the segment out of order (balances are
    /// unaffected, the recovered recent list may differ).
    pub async fn save(&self, account: AccountId, transaction: Transaction) -> Result<LimitAndBalance> {
        let slot = self.slot(account)?;
        transaction.validate()?;
        let delta = transaction.signed_delta();

        let (balance, queued) = {
            let mut state = slot.state.lock();
            let balance = state.balance + delta;

            if delta < 0 && balance < -slot.limit {
                self.metrics.record_rejection();
                tracing::debug!(
                    account = %account,
                    balance = state.balance,
                    limit = slot.limit,
                    magnitude = transaction.magnitude,
                    "Debit rejected by limit"
                );
                return Err(Error::LimitExceeded(account));
            }
            if i32::try_from(balance).is_err() {
                tracing::debug!(
                    account = %account,
                    balance = state.balance,
                    delta,
                    "Save rejected, balance would leave the wire range"
                );
                return Err(Error::Validation(format!(
                    "balance {} out of range for account {}",
                    balance, account
                )));
            }

            state.balance = balance;
            state.recent.push(transaction.clone());
            (balance, self.writer.try_enqueue(account, transaction))
        };

        self.metrics.record_save();

        let queued = match queued {
            Ok(Some(message)) => self.writer.send(message).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = queued {
            // Already applied in memory; only persistence is lost
            tracing::warn!(account = %account, error = %e, "Transaction not queued for persistence");
        }

        Ok(LimitAndBalance {
            limit: slot.limit,
            balance,
        })
    }

    /// Current limit, balance and last five transactions
    ///
    /// Taken as a snapshot under the account lock.
    pub fn extract(&self, account: AccountId) -> Result<Statement> {
        let slot = self.slot(account)?;
        let state = slot.state.lock();

        Ok(Statement {
            limit: slot.limit,
            balance: state.balance,
            as_of: Utc::now(),
            recent: state.recent.most_recent_first(),
        })
    }

    /// Provisioned account ids
    pub fn accounts(&self) -> Vec<AccountId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| AccountId::new(idx as u8))
            .collect()
    }

    /// Segment storage backing this ledger
    pub fn storage(&self) -> &SegmentStorage {
        &self.storage
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Flush every buffered transaction now
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    /// Close the write-behind queue and wait for the final flush
    pub async fn shutdown(&self) -> Result<()> {
        self.writer.shutdown().await?;
        tracing::info!("Ledger shut down, pending writes flushed");
        Ok(())
    }
}
