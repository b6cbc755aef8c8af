//! Persistence of candles and daily closes
//!
//! The engine only needs four operations from storage, so any backend
//! implementing [`Storage`] can be plugged in. Two are provided:
//! [`MemoryStore`] for tests and ephemeral runs, and [`JsonlStore`], an
//! append-only JSON-lines store.
//!
//! # File layout of [`JsonlStore`]
//! ```text
//! <dir>/candles.jsonl   one CandleStick per line, in write order
//! <dir>/closes.jsonl    one DailyClose per line, in write order
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::candles::CandleStick;
use crate::daily_close::DailyClose;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage is closed")]
    Closed,
}

// ── Contract ────────────────────────────────────────────────────────

#[async_trait]
pub trait Storage: Send + Sync {
    /// Most recent daily close, if any was ever written.
    async fn last_close(&self) -> Result<Option<DailyClose>, StorageError>;

    async fn write_close(&self, close: &DailyClose) -> Result<(), StorageError>;

    /// The last `count` candles, oldest first.
    async fn history(&self, count: usize) -> Result<Vec<CandleStick>, StorageError>;

    async fn write_candlestick(&self, candle: &CandleStick) -> Result<(), StorageError>;

    /// Release resources. Later writes fail with [`StorageError::Closed`].
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

fn tail<T>(mut items: Vec<T>, count: usize) -> Vec<T> {
    let skip = items.len().saturating_sub(count);
    items.drain(..skip);
    items
}

// ── In-memory ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    candles: Mutex<Vec<CandleStick>>,
    closes: Mutex<Vec<DailyClose>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect every written candle.
    pub fn candles(&self) -> Vec<CandleStick> {
        self.candles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Inspect every written daily close.
    pub fn closes(&self) -> Vec<DailyClose> {
        self.closes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn last_close(&self) -> Result<Option<DailyClose>, StorageError> {
        let closes = self.closes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(closes.iter().max_by_key(|c| c.date).cloned())
    }

    async fn write_close(&self, close: &DailyClose) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.closes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(close.clone());
        Ok(())
    }

    async fn history(&self, count: usize) -> Result<Vec<CandleStick>, StorageError> {
        Ok(tail(self.candles(), count))
    }

    async fn write_candlestick(&self, candle: &CandleStick) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.candles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(candle.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── JSON lines ──────────────────────────────────────────────────────

const CANDLES_FILE: &str = "candles.jsonl";
const CLOSES_FILE: &str = "closes.jsonl";

pub struct JsonlStore {
    dir: PathBuf,
    /// Serializes appends so lines never interleave.
    write_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl JsonlStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened JSON-lines store");
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    async fn append<T: Serialize>(&self, file: &str, record: &T) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        handle.write_all(line.as_bytes()).await?;
        handle.flush().await?;
        Ok(())
    }

    /// Read every well-formed record of `file`. A missing file is empty.
    async fn read_all<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, StorageError> {
        let path = self.dir.join(file);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for (number, bytes) in raw.split(|b| *b == b'\n').enumerate() {
            let line = match std::str::from_utf8(bytes) {
                Ok(line) => line,
                Err(err) => {
                    warn!(
                        file = %path.display(),
                        line = number + 1,
                        error = %err,
                        "Skipping record that is not UTF-8"
                    );
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(
                    file = %path.display(),
                    line = number + 1,
                    error = %err,
                    "Skipping malformed record"
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Storage for JsonlStore {
    async fn last_close(&self) -> Result<Option<DailyClose>, StorageError> {
        let closes: Vec<DailyClose> = self.read_all(CLOSES_FILE).await?;
        Ok(closes.into_iter().max_by_key(|c| c.date))
    }

    async fn write_close(&self, close: &DailyClose) -> Result<(), StorageError> {
        self.append(CLOSES_FILE, close).await
    }

    async fn history(&self, count: usize) -> Result<Vec<CandleStick>, StorageError> {
        let candles = self.read_all(CANDLES_FILE).await?;
        Ok(tail(candles, count))
    }

    async fn write_candlestick(&self, candle: &CandleStick) -> Result<(), StorageError> {
        self.append(CANDLES_FILE, candle).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        // Wait for an in-flight append before refusing new ones.
        let _guard = self.write_lock.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        debug!(dir = %self.dir.display(), "Closed JSON-lines store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn close_on(day: u32, value: rust_decimal::Decimal) -> DailyClose {
        DailyClose::create(NaiveDate::from_ymd_opt(2024, 5, day).unwrap(), value)
    }

    #[tokio::test]
    async fn test_memory_store_history_tail() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .write_candlestick(&CandleStick::new(i, dec!(100)))
                .await
                .unwrap();
        }
        let times: Vec<i64> = store.history(3).await.unwrap().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![2, 3, 4]);
        assert_eq!(store.history(50).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_writes_after_close() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        let err = store
            .write_candlestick(&CandleStick::new(0, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Closed));
    }

    #[tokio::test]
    async fn test_jsonl_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).await.unwrap();

        assert!(store.last_close().await.unwrap().is_none());
        assert!(store.history(10).await.unwrap().is_empty());

        store.write_close(&close_on(2, dec!(1000))).await.unwrap();
        store.write_close(&close_on(3, dec!(1100))).await.unwrap();
        for i in 0..4 {
            store
                .write_candlestick(&CandleStick::new(i * 3600, dec!(500)))
                .await
                .unwrap();
        }

        // A second handle sees what the first wrote.
        let reopened = JsonlStore::open(dir.path()).await.unwrap();
        let last = reopened.last_close().await.unwrap().unwrap();
        assert_eq!(last.date, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        assert_eq!(last.close, dec!(1100));

        let history = reopened.history(2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].time, 2 * 3600);
    }

    #[tokio::test]
    async fn test_jsonl_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).await.unwrap();
        store
            .write_candlestick(&CandleStick::new(1, dec!(10)))
            .await
            .unwrap();
        tokio::fs::write(
            dir.path().join(CANDLES_FILE),
            format!(
                "{}\nnot json\n\n{}\n",
                serde_json::to_string(&CandleStick::new(1, dec!(10))).unwrap(),
                serde_json::to_string(&CandleStick::new(2, dec!(20))).unwrap(),
            ),
        )
        .await
        .unwrap();

        let history = store.history(10).await.unwrap();
        assert_eq!(history.iter().map(|c| c.time).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_jsonl_skips_lines_that_are_not_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).await.unwrap();

        let mut candles = b"\xff\xfe\n".to_vec();
        candles.extend(serde_json::to_string(&CandleStick::new(7, dec!(70))).unwrap().into_bytes());
        candles.push(b'\n');
        tokio::fs::write(dir.path().join(CANDLES_FILE), candles).await.unwrap();
        tokio::fs::write(dir.path().join(CLOSES_FILE), b"\xff\xfe\n").await.unwrap();

        let history = store.history(96).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].time, 7);
        assert!(store.last_close().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_jsonl_closed_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("nested")).await.unwrap();
        store.close().await.unwrap();
        let err = store.write_close(&close_on(1, dec!(1))).await.unwrap_err();
        assert!(matches!(err, StorageError::Closed));
        // Reads still work after close.
        assert!(store.last_close().await.unwrap().is_none());
    }
}
