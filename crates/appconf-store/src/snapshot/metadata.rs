//! Snapshot metadata log
//!
//! New snapshots are appended; updates rewrite the whole log to a temporary
//! file and publish it with the same atomic replace used for content.

use crate::atomic::{append_record, atomic_write};
use crate::codec::{decode_snapshot, encode_snapshot, RECORD_DELIMITER};
use crate::errors::{io_error, Result};
use appconf_core::model::Snapshot;
use appconf_core::CancelSignal;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone)]
pub struct SnapshotLog {
    path: PathBuf,
}

impl SnapshotLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest record of every snapshot, keyed by name
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Io` on read failure, `ExErrorKind::Serialization` for a
    /// corrupt record other than a truncated last line.
    pub async fn load(&self) -> Result<BTreeMap<String, Snapshot>> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_error("snapshot_log_load", e)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut snapshots = BTreeMap::new();
        let mut pending_error = None;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| io_error("snapshot_log_load", e))?
        {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(err) = pending_error.take() {
                return Err(err);
            }
            match decode_snapshot(&line) {
                Ok(snapshot) => {
                    snapshots.insert(snapshot.name.clone(), snapshot);
                }
                Err(err) => pending_error = Some(err),
            }
        }
        if let Some(err) = pending_error {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "Skipping truncated trailing snapshot record"
            );
        }
        Ok(snapshots)
    }

    /// Append one record; on error the log is unchanged
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Serialization`, `ExErrorKind::Io`, `ExErrorKind::Timeout`
    /// or `ExErrorKind::Cancelled`.
    pub async fn append(&self, snapshot: &Snapshot, limit: Duration, cancel: &CancelSignal) -> Result<()> {
        let record = encode_snapshot(snapshot)?;
        append_record("snapshot_log_append", &self.path, &record, limit, cancel).await
    }

    /// Replace the log with exactly `snapshots`
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Io` or `ExErrorKind::Serialization`; the previous log
    /// stays in place on failure.
    pub async fn rewrite<'a>(&self, snapshots: impl IntoIterator<Item = &'a Snapshot>) -> Result<()> {
        let mut buf = Vec::new();
        for snapshot in snapshots {
            if !buf.is_empty() {
                buf.extend_from_slice(RECORD_DELIMITER);
            }
            buf.extend_from_slice(&encode_snapshot(snapshot)?);
        }
        atomic_write(&self.path, &buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appconf_core::model::{now, CompositionType, SnapshotStatus};
    use tempfile::TempDir;

    const LIMIT: Duration = Duration::from_secs(5);

    fn snapshot(name: &str, status: SnapshotStatus) -> Snapshot {
        let t = now();
        Snapshot {
            id: format!("id-{}", name),
            name: name.to_string(),
            etag: "e".into(),
            status,
            status_code: 202,
            status_message: None,
            filters: Vec::new(),
            composition_type: CompositionType::Key,
            retention_period_seconds: 3600,
            created: t,
            last_modified: t,
            expires: None,
            items_count: 0,
            size_bytes: 0,
            tags: Default::default(),
            media: None,
        }
    }

    #[tokio::test]
    async fn test_later_records_win() {
        let dir = TempDir::new().unwrap();
        let log = SnapshotLog::new(dir.path().join("snapshot.ndjson"));

        log.append(&snapshot("a", SnapshotStatus::Provisioning), LIMIT, &CancelSignal::never()).await.unwrap();
        log.append(&snapshot("b", SnapshotStatus::Provisioning), LIMIT, &CancelSignal::never()).await.unwrap();
        log.append(&snapshot("a", SnapshotStatus::Ready), LIMIT, &CancelSignal::never()).await.unwrap();

        let loaded = log.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["a"].status, SnapshotStatus::Ready);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_everything() {
        let dir = TempDir::new().unwrap();
        let log = SnapshotLog::new(dir.path().join("snapshot.ndjson"));
        log.append(&snapshot("a", SnapshotStatus::Provisioning), LIMIT, &CancelSignal::never()).await.unwrap();

        let b = snapshot("b", SnapshotStatus::Failed);
        log.rewrite([&b]).await.unwrap();

        let loaded = log.load().await.unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), ["b"]);
        assert!(!dir.path().join("snapshot.ndjson.tmp").exists());
        assert!(!dir.path().join("snapshot.ndjson.bac").exists());
    }

    #[tokio::test]
    async fn test_cancelled_append_is_not_loaded() {
        let dir = TempDir::new().unwrap();
        let log = SnapshotLog::new(dir.path().join("snapshot.ndjson"));
        log.append(&snapshot("a", SnapshotStatus::Ready), LIMIT, &CancelSignal::never())
            .await
            .unwrap();

        let source = appconf_core::CancelSource::new();
        source.cancel();
        let err = log
            .append(&snapshot("b", SnapshotStatus::Provisioning), LIMIT, &source.signal())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), appconf_core::ExErrorKind::Cancelled);
        assert_eq!(log.load().await.unwrap().keys().collect::<Vec<_>>(), ["a"]);
    }
}
