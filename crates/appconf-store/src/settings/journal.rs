//! Append-only persistence for setting revisions
//!
//! The store replays the journal at open and appends one record per
//! mutation. Implementations are swappable: NDJSON file or in-memory.

use crate::atomic::append_record;
use crate::codec::{decode_key_value, encode_key_value};
use crate::errors::{cancelled, io_error, Result};
use appconf_core::model::KeyValue;
use appconf_core::CancelSignal;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[async_trait]
pub trait SettingsJournal: Send + Sync {
    /// Every recorded revision in append order
    async fn load(&self) -> Result<Vec<KeyValue>>;

    /// Record `revision`, or leave the journal unchanged and fail
    ///
    /// A `Cancelled` or `Timeout` result guarantees the revision is not
    /// replayed by a later `load`.
    async fn append(&self, revision: &KeyValue, limit: Duration, cancel: &CancelSignal) -> Result<()>;
}

/// Newline-delimited JSON journal file
///
/// A delimiter is written before each record except the first. Interrupted
/// appends are rolled back; a crash mid-append leaves at most one truncated
/// trailing line, which replay skips.
pub struct NdjsonJournal {
    path: PathBuf,
    append_gate: tokio::sync::Mutex<()>,
}

impl NdjsonJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsJournal for NdjsonJournal {
    async fn load(&self) -> Result<Vec<KeyValue>> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("journal_load", e)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut revisions = Vec::new();
        let mut pending_error = None;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| io_error("journal_load", e))?
        {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(err) = pending_error.take() {
                return Err(err);
            }
            match decode_key_value(&line) {
                Ok(kv) => revisions.push(kv),
                Err(err) => pending_error = Some(err),
            }
        }

        if let Some(err) = pending_error {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "Skipping truncated trailing journal record"
            );
        }
        tracing::debug!(
            path = %self.path.display(),
            revisions = revisions.len(),
            "Replayed settings journal"
        );
        Ok(revisions)
    }

    async fn append(&self, revision: &KeyValue, limit: Duration, cancel: &CancelSignal) -> Result<()> {
        let record = encode_key_value(revision)?;
        let _gate = self.append_gate.lock().await;
        append_record("journal_append", &self.path, &record, limit, cancel).await
    }
}

/// Journal kept in process memory
#[derive(Default)]
pub struct MemoryJournal {
    revisions: Mutex<Vec<KeyValue>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously recorded revisions
    pub fn with_revisions(revisions: Vec<KeyValue>) -> Self {
        Self {
            revisions: Mutex::new(revisions),
        }
    }

    pub fn revisions(&self) -> Vec<KeyValue> {
        self.revisions.lock().clone()
    }
}

#[async_trait]
impl SettingsJournal for MemoryJournal {
    async fn load(&self) -> Result<Vec<KeyValue>> {
        Ok(self.revisions())
    }

    async fn append(&self, revision: &KeyValue, _limit: Duration, cancel: &CancelSignal) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(cancelled("journal_append"));
        }
        self.revisions.lock().push(revision.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LIMIT: Duration = Duration::from_secs(5);

    fn revision(key: &str, etag: &str) -> KeyValue {
        KeyValue {
            etag: etag.to_string(),
            ..KeyValue::new(key, None).with_value("v")
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let journal = NdjsonJournal::new(dir.path().join("kv.ndjson"));
        assert!(journal.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delimiter_precedes_every_record_but_the_first() {
        let dir = TempDir::new().unwrap();
        let journal = NdjsonJournal::new(dir.path().join("nested").join("kv.ndjson"));

        journal.append(&revision("a", "e1"), LIMIT, &CancelSignal::never()).await.unwrap();
        journal.append(&revision("b", "e2"), LIMIT, &CancelSignal::never()).await.unwrap();

        let text = std::fs::read_to_string(journal.path()).unwrap();
        assert!(!text.starts_with('\n'));
        assert!(!text.ends_with('\n'));
        assert_eq!(text.lines().count(), 2);

        let loaded = journal.load().await.unwrap();
        let etags: Vec<&str> = loaded.iter().map(|kv| kv.etag.as_str()).collect();
        assert_eq!(etags, ["e1", "e2"]);
    }

    #[tokio::test]
    async fn test_truncated_tail_is_skipped() {
        let dir = TempDir::new().unwrap();
        let journal = NdjsonJournal::new(dir.path().join("kv.ndjson"));
        journal.append(&revision("a", "e1"), LIMIT, &CancelSignal::never()).await.unwrap();

        let mut text = std::fs::read_to_string(journal.path()).unwrap();
        text.push_str("\n{\"etag\":\"e2\",\"ke");
        std::fs::write(journal.path(), text).unwrap();

        let loaded = journal.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_middle_record_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.ndjson");
        std::fs::write(&path, "garbage\n{\"etag\":\"e\",\"key\":\"a\",\"ts\":1}").unwrap();

        let err = NdjsonJournal::new(path).load().await.unwrap_err();
        assert_eq!(err.kind(), appconf_core::ExErrorKind::Serialization);
    }
}
