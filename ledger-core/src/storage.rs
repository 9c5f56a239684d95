//! Segment storage
//!
//! # Layout
//!
//! ```text
//! <data_dir>/
//!   1/
//!     018db6d8739670c1a2b3c4d5e6f70812   segment: N × 24-byte records
//!     018db6d8a01c7d44b0e1f2a3b4c5d6e7
//!     LAST                               id of the newest complete segment
//!   2/
//!     ...
//! ```
//!
//! Segments are headerless; the record count is `file size / 24`. Segment ids
//! are UUIDv7 in simple form, so lexical order is creation order. `LAST` is
//! replaced by writing `LAST.tmp` and renaming it over the old pointer once
//! the segment has been synced.

use crate::{
    codec::{Record, RECORD_SIZE},
    error::{Error, Result},
    types::AccountId,
};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Name of the newest-segment pointer file
const LAST_FILE: &str = "LAST";
const LAST_TMP_FILE: &str = "LAST.tmp";

/// Time-ordered segment identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(String);

impl SegmentId {
    /// Fresh id for a segment being created now
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    /// File name of the segment
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only per-account segment files
#[derive(Debug, Clone)]
pub struct SegmentStorage {
    root: PathBuf,
}

impl SegmentStorage {
    /// Open or create the storage root
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        tracing::info!(root = ?root, "Opened segment storage");

        Ok(Self { root })
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn account_dir(&self, account: AccountId) -> PathBuf {
        self.root.join(account.dir_name())
    }

    /// Write `records` as a new segment and point `LAST` at it
    pub fn write_segment(&self, account: AccountId, records: &[Record]) -> Result<SegmentId> {
        if records.is_empty() {
            return Err(Error::Validation("refusing to write an empty segment".to_string()));
        }

        let dir = self.account_dir(account);
        fs::create_dir_all(&dir)?;

        let id = SegmentId::generate();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(id.as_str()))?;

        let mut writer = BufWriter::with_capacity(records.len() * RECORD_SIZE, file);
        for record in records {
            writer.write_all(record.as_bytes())?;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        self.update_last(&dir, &id)?;

        tracing::debug!(
            account = %account,
            segment = %id,
            records = records.len(),
            "Segment written"
        );

        Ok(id)
    }

    fn update_last(&self, dir: &Path, id: &SegmentId) -> Result<()> {
        let tmp = dir.join(LAST_TMP_FILE);
        let mut file = File::create(&tmp)?;
        file.write_all(id.as_str().as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, dir.join(LAST_FILE))?;
        Ok(())
    }

    /// Id of the newest complete segment, if any
    pub fn last_segment(&self, account: AccountId) -> Result<Option<SegmentId>> {
        match fs::read_to_string(self.account_dir(account).join(LAST_FILE)) {
            Ok(content) => {
                let id = content.trim();
                if id.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(SegmentId(id.to_string())))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Last up to `n` records of the newest segment, in file order
    ///
    /// Only the segment `LAST` points at is read. When it holds fewer than
    /// `n` records, older segments are not consulted.
    pub fn read_tail(&self, account: AccountId, n: usize) -> Result<Vec<Record>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let Some(id) = self.last_segment(account)? else {
            return Ok(Vec::new());
        };

        let mut file = File::open(self.account_dir(account).join(id.as_str()))?;
        let whole = file.metadata()?.len() / RECORD_SIZE as u64 * RECORD_SIZE as u64;
        let start = whole.saturating_sub((n * RECORD_SIZE) as u64);

        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (whole - start) as usize];
        file.read_exact(&mut buf)?;

        buf.chunks_exact(RECORD_SIZE)
            .map(Record::from_slice)
            .collect()
    }

    /// Segment ids for `account`, oldest first
    pub fn list_segments(&self, account: AccountId) -> Result<Vec<SegmentId>> {
        let entries = match fs::read_dir(self.account_dir(account)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LAST_FILE || name == LAST_TMP_FILE {
                continue;
            }
            ids.push(SegmentId(name));
        }
        ids.sort();

        Ok(ids)
    }

    /// Sum of signed magnitudes over every segment of `account`
    ///
    /// Segments are scanned concurrently on the blocking pool and summed.
    pub async fn read_all_balance(&self, account: AccountId) -> Result<i64> {
        let dir = self.account_dir(account);
        let mut scans = JoinSet::new();

        for id in self.list_segments(account)? {
            let path = dir.join(id.as_str());
            scans.spawn_blocking(move || scan_segment(&path));
        }

        let mut total = 0i64;
        while let Some(joined) = scans.join_next().await {
            total += joined.map_err(|e| Error::Concurrency(format!("segment scan: {}", e)))??;
        }

        Ok(total)
    }
}

/// Signed sum of one segment file
fn scan_segment(path: &Path) -> Result<i64> {
    let bytes = fs::read(path)?;
    let chunks = bytes.chunks_exact(RECORD_SIZE);

    if !chunks.remainder().is_empty() {
        tracing::warn!(
            segment = ?path,
            trailing = chunks.remainder().len(),
            "Ignoring partial record at segment end"
        );
    }

    let mut sum = 0i64;
    for chunk in chunks {
        sum += Record::from_slice(chunk)?.signed_delta();
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transaction;

    fn records(account: AccountId, txs: &[Transaction]) -> Vec<Record> {
        txs.iter().map(|tx| Record::encode(account, tx)).collect()
    }

    #[test]
    fn test_write_segment_updates_last() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        let account = AccountId::new(b'1');

        assert!(storage.last_segment(account).unwrap().is_none());

        let first = storage
            .write_segment(account, &records(account, &[Transaction::credit(1, "a")]))
            .unwrap();
        assert_eq!(storage.last_segment(account).unwrap(), Some(first.clone()));

        let second = storage
            .write_segment(account, &records(account, &[Transaction::credit(2, "b")]))
            .unwrap();
        assert_eq!(storage.last_segment(account).unwrap(), Some(second.clone()));

        let listed = storage.list_segments(account).unwrap();
        assert_eq!(listed, vec![first, second]);
    }

    #[test]
    fn test_segment_file_size() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        let account = AccountId::new(b'2');

        let txs: Vec<_> = (0..7).map(|i| Transaction::credit(i, "x")).collect();
        let id = storage.write_segment(account, &records(account, &txs)).unwrap();

        let len = fs::metadata(temp_dir.path().join("2").join(id.as_str()))
            .unwrap()
            .len();
        assert_eq!(len, 7 * RECORD_SIZE as u64);
    }

    #[tokio::test]
    async fn test_punctuation_ids_stay_in_own_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("data");
        let storage = SegmentStorage::open(&root).unwrap();
        let plain = AccountId::new(b'1');
        let dot = AccountId::new(b'.');
        let slash = AccountId::new(b'/');

        storage
            .write_segment(plain, &records(plain, &[Transaction::credit(5, "a")]))
            .unwrap();
        let id = storage
            .write_segment(dot, &records(dot, &[Transaction::credit(7, "b")]))
            .unwrap();
        storage
            .write_segment(slash, &records(slash, &[Transaction::credit(9, "c")]))
            .unwrap();

        assert!(root.join("x2e").join(id.as_str()).is_file());
        assert!(root.join("x2f").join(LAST_FILE).is_file());
        assert!(!root.join(LAST_FILE).exists());

        assert_eq!(storage.read_all_balance(dot).await.unwrap(), 7);
        assert_eq!(storage.read_all_balance(slash).await.unwrap(), 9);
        assert_eq!(storage.read_all_balance(plain).await.unwrap(), 5);
    }

    #[test]
    fn test_empty_segment_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        assert!(storage.write_segment(AccountId::new(b'1'), &[]).is_err());
    }

    #[test]
    fn test_read_tail() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        let account = AccountId::new(b'1');

        assert!(storage.read_tail(account, 5).unwrap().is_empty());

        let txs: Vec<_> = (0..8).map(|i| Transaction::credit(i, "x")).collect();
        storage.write_segment(account, &records(account, &txs)).unwrap();

        let tail = storage.read_tail(account, 5).unwrap();
        let magnitudes: Vec<i32> = tail.iter().map(|r| r.decode().magnitude).collect();
        assert_eq!(magnitudes, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_read_tail_only_newest_segment() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        let account = AccountId::new(b'1');

        let old: Vec<_> = (0..10).map(|i| Transaction::credit(i, "old")).collect();
        storage.write_segment(account, &records(account, &old)).unwrap();
        let new: Vec<_> = (100..102).map(|i| Transaction::credit(i, "new")).collect();
        storage.write_segment(account, &records(account, &new)).unwrap();

        let tail = storage.read_tail(account, 5).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail.iter().all(|r| r.decode().description == "new"));
    }

    #[tokio::test]
    async fn test_read_all_balance() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        let account = AccountId::new(b'3');

        assert_eq!(storage.read_all_balance(account).await.unwrap(), 0);

        storage
            .write_segment(
                account,
                &records(account, &[Transaction::credit(500, "a"), Transaction::debit(200, "b")]),
            )
            .unwrap();
        storage
            .write_segment(account, &records(account, &[Transaction::debit(1000, "c")]))
            .unwrap();

        assert_eq!(storage.read_all_balance(account).await.unwrap(), -700);
        // Other accounts untouched
        assert_eq!(storage.read_all_balance(AccountId::new(b'4')).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_partial_trailing_record_ignored() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = SegmentStorage::open(temp_dir.path()).unwrap();
        let account = AccountId::new(b'1');

        let id = storage
            .write_segment(account, &records(account, &[Transaction::credit(42, "a")]))
            .unwrap();

        let path = temp_dir.path().join("1").join(id.as_str());
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xff; 5]).unwrap();

        assert_eq!(storage.read_all_balance(account).await.unwrap(), 42);
        assert_eq!(storage.read_tail(account, 5).unwrap().len(), 1);
    }
}
