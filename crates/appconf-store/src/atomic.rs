//! Atomic file publication
//!
//! Content is written to `<target>.tmp`, then published over the target.
//! An existing target is kept reachable as `<target>.bac` until the rename
//! succeeds. Neither suffix survives a returning call.
//!
//! Append-only logs get the same all-or-nothing visibility from
//! [`append_record`], which rolls a failed append back to the previous length.

use crate::codec::RECORD_DELIMITER;
use crate::deadline::{run_to_completion, with_deadline};
use crate::errors::{cancelled, io_error, Result};
use appconf_core::CancelSignal;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Temporary path used while `target` is being written
pub fn temp_path(target: &Path) -> PathBuf {
    with_suffix(target, ".tmp")
}

/// Transient backup path used while `target` is being replaced
pub fn backup_path(target: &Path) -> PathBuf {
    with_suffix(target, ".bac")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Publish `tmp` at `target`
///
/// Readers observe either the previous file or the new one, never a partial
/// write. `tmp` is removed on failure.
///
/// # Errors
///
/// `ExErrorKind::Io` when linking, renaming or cleanup fails.
pub async fn replace_file(tmp: &Path, target: &Path) -> Result<()> {
    let backup = backup_path(target);
    remove_if_exists(&backup).await?;

    let had_target = match tokio::fs::hard_link(target, &backup).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            discard(tmp).await;
            return Err(io_error("replace_backup", e));
        }
    };

    if let Err(e) = tokio::fs::rename(tmp, target).await {
        discard(tmp).await;
        if had_target {
            discard(&backup).await;
        }
        return Err(io_error("replace_rename", e));
    }

    if had_target {
        remove_if_exists(&backup).await?;
    }
    Ok(())
}

/// Write `content` to `target` through a temporary file
///
/// # Errors
///
/// `ExErrorKind::Io` when the directory, the temp file or the publish step
/// fails.
pub async fn atomic_write(target: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error("create_dir", e))?;
    }
    let tmp = temp_path(target);
    if let Err(e) = tokio::fs::write(&tmp, content).await {
        discard(&tmp).await;
        return Err(io_error("write_temp", e));
    }
    replace_file(&tmp, target).await
}

/// Append one record to the delimited log at `path`
///
/// A delimiter precedes every record but the first. Once bytes are handed to
/// the file the write is never abandoned: if `cancel` fires or `limit`
/// elapses meanwhile, the write finishes, the log is truncated back to its
/// previous length and the interruption is returned. A failed write is
/// rolled back the same way. Callers serialize appends to one path.
///
/// # Errors
///
/// `ExErrorKind::Cancelled`, `ExErrorKind::Timeout` or `ExErrorKind::Io`;
/// the log is unchanged in every case.
pub async fn append_record(
    op: &str,
    path: &Path,
    record: &[u8],
    limit: Duration,
    cancel: &CancelSignal,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(cancelled(op));
    }
    let (mut file, existing) = with_deadline(op, limit, cancel, open_for_append(op, path)).await?;

    let mut buf = Vec::with_capacity(record.len() + RECORD_DELIMITER.len());
    if existing > 0 {
        buf.extend_from_slice(RECORD_DELIMITER);
    }
    buf.extend_from_slice(record);

    let owned_op = op.to_string();
    let (written, interrupted) = run_to_completion(op, limit, cancel, async move {
        file.write_all(&buf).await.map_err(|e| io_error(&owned_op, e))?;
        file.flush().await.map_err(|e| io_error(&owned_op, e))
    })
    .await;

    let error = match (written, interrupted) {
        (Ok(()), None) => return Ok(()),
        (_, Some(error)) | (Err(error), None) => error,
    };
    truncate(op, path, existing).await?;
    tracing::debug!(path = %path.display(), error = %error, "Rolled back interrupted append");
    Err(error)
}

async fn open_for_append(op: &str, path: &Path) -> Result<(tokio::fs::File, u64)> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(op, e))?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| io_error(op, e))?;
    let existing = file.metadata().await.map_err(|e| io_error(op, e))?.len();
    Ok((file, existing))
}

async fn truncate(op: &str, path: &Path, len: u64) -> Result<()> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| io_error(op, e))?;
    file.set_len(len).await.map_err(|e| io_error(op, e))
}

/// Best-effort removal used on failure paths
pub async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error("remove_backup", e)),
    }
}
