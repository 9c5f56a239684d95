//! Startup recovery from segment storage
//!
//! Balance comes from a full scan of every segment. Recent transactions come
//! from the tail of the newest segment only, so an account whose last flush
//! held fewer than five records recovers fewer than five.

use crate::{
    ledger::AccountState,
    storage::SegmentStorage,
    types::{AccountId, RECENT_CAPACITY},
    Result,
};

/// Rebuild one account's balance and recent transactions
pub async fn recover_account(storage: &SegmentStorage, account: AccountId) -> Result<AccountState> {
    let balance = storage.read_all_balance(account).await?;

    let mut state = AccountState {
        balance,
        ..AccountState::default()
    };

    for record in storage.read_tail(account, RECENT_CAPACITY)? {
        match record.decode().into_transaction() {
            Ok((owner, tx)) if owner == account => state.recent.push(tx),
            Ok((owner, _)) => {
                tracing::warn!(account = %account, owner = %owner, "Skipping foreign record in segment tail");
            }
            Err(e) => {
                tracing::warn!(account = %account, error = %e, "Skipping invalid record in segment tail");
            }
        }
    }

    tracing::info!(
        account = %account,
        balance = state.balance,
        recent = state.recent.len(),
        "Recovered account"
    );

    Ok(state)
}
