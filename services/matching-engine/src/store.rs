//! Durable commit store
//!
//! Every engine mutation is persisted as one `CommitBatch`: the order
//! records it touched, the trade it produced (if any) and the post-state of
//! every balance cell it moved. A batch is written whole or not at all.
//!
//! # Journal format
//! One batch per line: `<crc32c as 8 hex digits> <batch as JSON>\n`, the
//! checksum taken over the JSON bytes.

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};
use types::account::{Balance, BalanceKey};
use types::errors::EngineError;
use types::order::Order;
use types::trade::Trade;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt journal line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// One atomic unit of persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitBatch {
    pub orders: Vec<Order>,
    pub trade: Option<Trade>,
    pub balances: Vec<(BalanceKey, Balance)>,
}

impl CommitBatch {
    pub fn orders(orders: Vec<Order>, balances: &[(BalanceKey, Balance)]) -> Self {
        Self {
            orders,
            trade: None,
            balances: balances.to_vec(),
        }
    }
}

/// Durable storage for commit batches
pub trait EngineStore: Send + Sync {
    fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError>;
}

/// Retry budget for transient persistence failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Commit `batch`, retrying the whole unit on failure
///
/// Blocks the calling thread between attempts.
pub fn commit_with_retry(
    store: &dyn EngineStore,
    batch: &CommitBatch,
    policy: &RetryPolicy,
) -> Result<(), EngineError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.commit(batch) {
            Ok(()) => return Ok(()),
            Err(err) if attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %err, "commit failed, retrying");
                std::thread::sleep(policy.backoff(attempt));
            }
            Err(err) => {
                error!(attempts = attempt, error = %err, "commit failed, giving up");
                return Err(EngineError::TransientPersistence {
                    attempts: attempt,
                    reason: err.to_string(),
                });
            }
        }
    }
}

/// In-memory store, also the default when no journal is configured
#[derive(Debug, Default)]
pub struct MemoryStore {
    batches: Mutex<Vec<CommitBatch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<CommitBatch> {
        match self.batches.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.batches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EngineStore for MemoryStore {
    fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        self.batches
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))?
            .push(batch.clone());
        Ok(())
    }
}

/// Append-only checksummed JSON-lines journal
///
/// A line only counts once its trailing newline is on disk. A commit that
/// fails part way truncates the file back to where it started; a fragment
/// left by a crash mid-write is dropped when the journal is reopened.
#[derive(Debug)]
pub struct JournalStore {
    path: PathBuf,
    file: Mutex<File>,
    torn: AtomicBool,
}

impl JournalStore {
    /// Open (or create) the journal at `path` for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let content = std::fs::read(&path)?;
        let complete = complete_len(&content);
        if complete < content.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = content.len() - complete,
                "dropping torn journal tail"
            );
            file.set_len(complete as u64)?;
            file.sync_data()?;
        }
        Ok(Self {
            path,
            file: Mutex::new(file),
            torn: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every complete batch back, verifying checksums
    ///
    /// A missing file replays as empty. An unterminated final fragment is
    /// ignored; a bad checksum on a complete line is an error.
    pub fn replay(path: impl AsRef<Path>) -> Result<Vec<CommitBatch>, StoreError> {
        let content = match std::fs::read(path.as_ref()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let complete = complete_len(&content);
        if complete < content.len() {
            warn!(
                path = %path.as_ref().display(),
                ignored_bytes = content.len() - complete,
                "ignoring torn journal tail"
            );
        }

        let mut batches = Vec::new();
        for (idx, raw) in content[..complete].split(|b| *b == b'\n').enumerate() {
            if raw.is_empty() {
                continue;
            }
            let corrupt = |reason: String| StoreError::Corrupt {
                line: idx + 1,
                reason,
            };
            let line = std::str::from_utf8(raw).map_err(|_| corrupt("not UTF-8".to_string()))?;
            let (checksum, json) = line
                .split_once(' ')
                .ok_or_else(|| corrupt("missing checksum".to_string()))?;
            let expected = u32::from_str_radix(checksum, 16)
                .map_err(|_| corrupt(format!("bad checksum field {checksum:?}")))?;
            if crc32c(json.as_bytes()) != expected {
                return Err(corrupt("checksum mismatch".to_string()));
            }
            batches.push(serde_json::from_str(json)?);
        }
        Ok(batches)
    }
}

/// Length of the prefix made of newline-terminated lines
fn complete_len(content: &[u8]) -> usize {
    content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1)
}

impl EngineStore for JournalStore {
    fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        let json = serde_json::to_string(batch)?;
        let line = format!("{:08x} {}\n", crc32c(json.as_bytes()), json);

        let mut file = self
            .file
            .lock()
            .map_err(|_| StoreError::Unavailable("journal writer poisoned".to_string()))?;
        if self.torn.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("journal has a torn tail".to_string()));
        }
        let start = file.metadata()?.len();
        if let Err(err) = append_line(&mut file, line.as_bytes()) {
            if let Err(truncate_err) = file.set_len(start) {
                error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "could not drop partial journal line"
                );
                self.torn.store(true, Ordering::Release);
                return Err(StoreError::Unavailable(format!(
                    "journal left torn after {err}: {truncate_err}"
                )));
            }
            return Err(err.into());
        }
        Ok(())
    }
}

fn append_line(file: &mut File, line: &[u8]) -> io::Result<()> {
    file.write_all(line)?;
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use types::ids::UserId;

    struct FlakyStore {
        failures_left: AtomicU32,
        inner: MemoryStore,
    }

    impl EngineStore for FlakyStore {
        fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("flaky".to_string()));
            }
            self.inner.commit(batch)
        }
    }

    fn batch() -> CommitBatch {
        let key = BalanceKey::new(UserId::new(), "USDT");
        CommitBatch {
            orders: Vec::new(),
            trade: None,
            balances: vec![(key, Balance::new("USDT", Decimal::from(5)))],
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    #[test]
    fn test_retry_recovers_from_transient_failure() {
        let store = FlakyStore {
            failures_left: AtomicU32::new(2),
            inner: MemoryStore::new(),
        };
        commit_with_retry(&store, &batch(), &fast_policy(3)).unwrap();
        assert_eq!(store.inner.len(), 1);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let store = FlakyStore {
            failures_left: AtomicU32::new(5),
            inner: MemoryStore::new(),
        };
        let err = commit_with_retry(&store, &batch(), &fast_policy(3)).unwrap_err();
        assert_eq!(
            err,
            EngineError::TransientPersistence {
                attempts: 3,
                reason: "Store unavailable: flaky".to_string(),
            }
        );
        assert!(store.inner.is_empty());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(5), Duration::from_millis(50));
    }

    #[test]
    fn test_journal_roundtrip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.journal");

        let store = JournalStore::open(&path).unwrap();
        let first = batch();
        store.commit(&first).unwrap();
        store.commit(&batch()).unwrap();

        let replayed = JournalStore::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], first);

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replacen("USDT", "USDC", 1)).unwrap();
        assert!(matches!(
            JournalStore::replay(&path),
            Err(StoreError::Corrupt { line: 1, .. })
        ));
    }

    #[test]
    fn test_torn_tail_is_ignored_and_dropped_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.journal");

        let store = JournalStore::open(&path).unwrap();
        store.commit(&batch()).unwrap();
        store.commit(&batch()).unwrap();
        drop(store);

        let intact = std::fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"0badf00d {\"orders\":[],\"tra").unwrap();
        drop(file);

        assert_eq!(JournalStore::replay(&path).unwrap().len(), 2);

        let store = JournalStore::open(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact);
        let third = batch();
        store.commit(&third).unwrap();

        let replayed = JournalStore::replay(&path).unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[2], third);
    }

    #[test]
    fn test_missing_journal_replays_empty() {
        let dir = tempfile::tempdir().unwrap();
        let replayed = JournalStore::replay(dir.path().join("absent.journal")).unwrap();
        assert!(replayed.is_empty());
    }
}
