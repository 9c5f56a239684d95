//! Write-behind persistence
//!
//! Saves are confirmed from memory; the transaction is then queued to a
//! single writer task that batches per account and writes segments.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Ledger::save (any connection task)             │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ WriterHandle::enqueue
//!                       │ mpsc::channel (bounded, senders wait when full)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │             WriteBehindWriter (single task)           │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ buffers: AccountId -> Vec<Transaction>         │  │
//! │  │ FlushPolicy (default: 100 per account)         │  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                               │
//! │                       ▼                               │
//! │          SegmentStorage::write_segment()              │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! A failed segment write is logged and the batch is dropped. The in-memory
//! ledger already reflects those transactions and keeps serving.

use crate::{
    codec::Record,
    config::BatchingConfig,
    metrics::Metrics,
    storage::SegmentStorage,
    types::{AccountId, Transaction},
    Error, Result,
};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};

/// Decides when an account buffer becomes a segment
pub trait FlushPolicy: Send + 'static {
    /// Called after every append with the account's buffered count
    fn should_flush(&self, buffered: usize) -> bool;
}

/// Flush once a buffer holds `max_batch_size` transactions
#[derive(Debug, Clone, Copy)]
pub struct SizeThreshold {
    /// Buffered transactions that trigger a flush
    pub max_batch_size: usize,
}

impl FlushPolicy for SizeThreshold {
    fn should_flush(&self, buffered: usize) -> bool {
        buffered >= self.max_batch_size
    }
}

/// Message sent to the writer
#[derive(Debug)]
pub enum WriterMessage {
    /// Persist a confirmed transaction
    Append {
        /// Owning account
        account: AccountId,
        /// Already applied transaction
        transaction: Transaction,
    },

    /// Write every non-empty buffer now
    Flush {
        /// Signalled once the buffers are written
        response: oneshot::Sender<()>,
    },

    /// Close the queue, drain it, flush everything, stop
    Shutdown {
        /// Signalled after the final flush
        response: oneshot::Sender<()>,
    },
}

/// Single consumer of the write-behind queue
pub struct WriteBehindWriter {
    storage: SegmentStorage,
    mailbox: mpsc::Receiver<WriterMessage>,
    buffers: BTreeMap<AccountId, Vec<Transaction>>,
    policy: Box<dyn FlushPolicy>,
    flush_interval: Option<Duration>,
    metrics: Metrics,
}

impl fmt::Debug for WriteBehindWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBehindWriter")
            .field("storage", &self.storage)
            .field("buffered_accounts", &self.buffers.len())
            .field("flush_interval", &self.flush_interval)
            .finish_non_exhaustive()
    }
}

impl WriteBehindWriter {
    /// Create new writer
    pub fn new(
        storage: SegmentStorage,
        mailbox: mpsc::Receiver<WriterMessage>,
        policy: Box<dyn FlushPolicy>,
        flush_interval: Option<Duration>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            mailbox,
            buffers: BTreeMap::new(),
            policy,
            flush_interval,
            metrics,
        }
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let mut ticker = self.flush_interval.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                msg = self.mailbox.recv() => match msg {
                    Some(WriterMessage::Shutdown { response }) => {
                        self.drain_and_stop(vec![response]).await;
                        return;
                    }
                    Some(msg) => {
                        if let Some(waiter) = self.handle_message(msg).await {
                            self.drain_and_stop(vec![waiter]).await;
                            return;
                        }
                    }
                    None => {
                        tracing::debug!("Writer queue closed by all senders");
                        self.flush_all().await;
                        return;
                    }
                },

                _ = next_tick(&mut ticker) => {
                    self.flush_all().await;
                }
            }
        }
    }

    /// Returns the responder of a shutdown request
    async fn handle_message(&mut self, msg: WriterMessage) -> Option<oneshot::Sender<()>> {
        match msg {
            WriterMessage::Append {
                account,
                transaction,
            } => {
                let buffer = self.buffers.entry(account).or_default();
                buffer.push(transaction);
                if self.policy.should_flush(buffer.len()) {
                    self.flush(account).await;
                }
                None
            }
            WriterMessage::Flush { response } => {
                self.flush_all().await;
                let _ = response.send(());
                None
            }
            WriterMessage::Shutdown { response } => Some(response),
        }
    }

    async fn drain_and_stop(&mut self, mut waiters: Vec<oneshot::Sender<()>>) {
        tracing::debug!("Writer closing, draining queue");
        self.mailbox.close();

        while let Some(msg) = self.mailbox.recv().await {
            if let Some(waiter) = self.handle_message(msg).await {
                waiters.push(waiter);
            }
        }

        self.flush_all().await;
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    async fn flush_all(&mut self) {
        let pending: Vec<AccountId> = self
            .buffers
            .iter()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(account, _)| *account)
            .collect();

        for account in pending {
            self.flush(account).await;
        }
    }

    async fn flush(&mut self, account: AccountId) {
        let Some(buffer) = self.buffers.get_mut(&account) else {
            return;
        };
        if buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(buffer);
        let records: Vec<Record> = batch.iter().map(|tx| Record::encode(account, tx)).collect();
        let count = records.len();

        let storage = self.storage.clone();
        let written =
            tokio::task::spawn_blocking(move || storage.write_segment(account, &records)).await;

        match written {
            Ok(Ok(segment)) => {
                self.metrics.record_flush(count);
                tracing::debug!(account = %account, segment = %segment, records = count, "Flushed batch");
            }
            Ok(Err(e)) => {
                self.metrics.record_flush_failure();
                tracing::error!(account = %account, records = count, error = %e, "Flush failed, batch dropped");
            }
            Err(e) => {
                self.metrics.record_flush_failure();
                tracing::error!(account = %account, records = count, error = %e, "Flush task failed, batch dropped");
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle for sending to the writer
#[derive(Clone, Debug)]
pub struct WriterHandle {
    sender: mpsc::Sender<WriterMessage>,
}

impl WriterHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<WriterMessage>) -> Self {
        Self { sender }
    }

    /// Queue a confirmed transaction; waits while the queue is full
    pub async fn enqueue(&self, account: AccountId, transaction: Transaction) -> Result<()> {
        self.sender
            .send(WriterMessage::Append {
                account,
                transaction,
            })
            .await
            .map_err(|_| Error::Concurrency("Writer queue closed".to_string()))
    }

    /// Queue a confirmed transaction without waiting
    ///
    /// Returns the message back when the queue is full so the caller can
    /// [`send`](Self::send) it once it may wait.
    pub fn try_enqueue(
        &self,
        account: AccountId,
        transaction: Transaction,
    ) -> Result<Option<WriterMessage>> {
        match self.sender.try_send(WriterMessage::Append {
            account,
            transaction,
        }) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(message)) => Ok(Some(message)),
            Err(TrySendError::Closed(_)) => Err(Error::Concurrency("Writer queue closed".to_string())),
        }
    }

    /// Send a message, waiting while the queue is full
    pub async fn send(&self, message: WriterMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| Error::Concurrency("Writer queue closed".to_string()))
    }

    /// Force every buffered transaction to storage
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WriterMessage::Flush { response: tx })
            .await
            .map_err(|_| Error::Concurrency("Writer queue closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Writer stopped before flushing".to_string()))
    }

    /// Close the queue and wait for the final flush
    ///
    /// Calling it on an already stopped writer is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(WriterMessage::Shutdown { response: tx })
            .await
            .is_err()
        {
            return Ok(());
        }

        rx.await
            .map_err(|_| Error::Concurrency("Writer stopped before final flush".to_string()))
    }

    /// True once the writer stopped accepting transactions
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Spawn the write-behind writer with the configured batching
pub fn spawn_writer(
    storage: SegmentStorage,
    batching: &BatchingConfig,
    metrics: Metrics,
) -> WriterHandle {
    let policy = SizeThreshold {
        max_batch_size: batching.max_batch_size,
    };
    let flush_interval = match batching.flush_interval_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    spawn_writer_with_policy(
        storage,
        Box::new(policy),
        batching.queue_capacity,
        flush_interval,
        metrics,
    )
}

/// Spawn the writer with a custom flush policy
pub fn spawn_writer_with_policy(
    storage: SegmentStorage,
    policy: Box<dyn FlushPolicy>,
    queue_capacity: usize,
    flush_interval: Option<Duration>,
    metrics: Metrics,
) -> WriterHandle {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let writer = WriteBehindWriter::new(storage, rx, policy, flush_interval, metrics);

    tokio::spawn(async move {
        writer.run().await;
    });

    WriterHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(max_batch_size: usize) -> (tempfile::TempDir, SegmentStorage, Metrics, WriterHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        let metrics = Metrics::new().unwrap();
        let batching = BatchingConfig {
            max_batch_size,
            queue_capacity: 16,
            flush_interval_ms: 0,
        };
        let handle = spawn_writer(storage.clone(), &batching, metrics.clone());
        (temp_dir, storage, metrics, handle)
    }

    #[tokio::test]
    async fn test_flush_at_threshold_and_shutdown() {
        let (_dir, storage, metrics, handle) = setup(100);
        let account = AccountId::new(b'1');

        for i in 0..150 {
            handle
                .enqueue(account, Transaction::credit(1, format!("t{}", i)))
                .await
                .unwrap();
        }
        handle.shutdown().await.unwrap();

        assert_eq!(storage.list_segments(account).unwrap().len(), 2);
        assert_eq!(storage.read_all_balance(account).await.unwrap(), 150);
        assert_eq!(metrics.flushes_total.get(), 2);
        assert_eq!(metrics.flush_batch_size.get_sample_sum(), 150.0);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_per_account_buffers() {
        let (_dir, storage, _metrics, handle) = setup(2);
        let a = AccountId::new(b'1');
        let b = AccountId::new(b'2');

        handle.enqueue(a, Transaction::credit(10, "a1")).await.unwrap();
        handle.enqueue(b, Transaction::debit(5, "b1")).await.unwrap();
        handle.enqueue(a, Transaction::credit(20, "a2")).await.unwrap();
        handle.flush().await.unwrap();

        // a flushed on threshold, b only by the explicit flush
        assert_eq!(storage.list_segments(a).unwrap().len(), 1);
        assert_eq!(storage.list_segments(b).unwrap().len(), 1);
        assert_eq!(storage.read_all_balance(b).await.unwrap(), -5);

        let tail = storage.read_tail(a, 5).unwrap();
        let descriptions: Vec<String> = tail.iter().map(|r| r.decode().description).collect();
        assert_eq!(descriptions, vec!["a1", "a2"]);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let (_dir, _storage, _metrics, handle) = setup(100);
        handle.shutdown().await.unwrap();

        let result = handle.enqueue(AccountId::new(b'1'), Transaction::credit(1, "late")).await;
        assert!(matches!(result, Err(Error::Concurrency(_))));
        // Second shutdown is a no-op
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_failure_drops_batch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        // A regular file where the account directory should be
        std::fs::write(temp_dir.path().join("1"), b"blocker").unwrap();

        let metrics = Metrics::new().unwrap();
        let handle = spawn_writer(storage.clone(), &BatchingConfig::default(), metrics.clone());

        handle.enqueue(AccountId::new(b'1'), Transaction::credit(1, "x")).await.unwrap();
        handle.shutdown().await.unwrap();

        assert_eq!(metrics.flush_failures.get(), 1);
        assert_eq!(metrics.flushes_total.get(), 0);
    }

    #[tokio::test]
    async fn test_try_enqueue_hands_back_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = WriterHandle::new(tx);
        let account = AccountId::new(b'1');

        assert!(handle
            .try_enqueue(account, Transaction::credit(1, "first"))
            .unwrap()
            .is_none());

        let message = handle
            .try_enqueue(account, Transaction::credit(2, "second"))
            .unwrap()
            .expect("queue of one is full");
        assert!(matches!(
            &message,
            WriterMessage::Append { transaction, .. } if transaction.description == "second"
        ));

        assert!(matches!(rx.recv().await, Some(WriterMessage::Append { .. })));
        handle.send(message).await.unwrap();
        match rx.recv().await {
            Some(WriterMessage::Append { transaction, .. }) => assert_eq!(transaction.magnitude, 2),
            other => panic!("unexpected message {:?}", other),
        }

        drop(rx);
        let result = handle.try_enqueue(account, Transaction::credit(3, "late"));
        assert!(matches!(result, Err(Error::Concurrency(_))));
    }

    #[tokio::test]
    async fn test_periodic_flush() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        let handle = spawn_writer_with_policy(
            storage.clone(),
            Box::new(SizeThreshold { max_batch_size: 100 }),
            16,
            Some(Duration::from_millis(10)),
            Metrics::new().unwrap(),
        );

        let account = AccountId::new(b'5');
        handle.enqueue(account, Transaction::credit(3, "tick")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(storage.read_all_balance(account).await.unwrap(), 3);
        handle.shutdown().await.unwrap();
    }
}
