//! Snapshot content storage
//!
//! A content store turns a composed list of settings into a published blob
//! and streams it back. The file-backed store writes NDJSON through a
//! temporary file and publishes it with an atomic replace. The null store
//! keeps no content at all.

use crate::atomic::{discard, replace_file, temp_path};
use crate::codec::{decode_key_value, encode_key_value, RECORD_DELIMITER};
use crate::config::SnapshotOptions;
use crate::deadline::with_deadline;
use crate::errors::{self, io_error, Result};
use appconf_core::etag::{encode_digest, generate_snapshot_etag};
use appconf_core::model::{KeyValue, MediaInfo, Snapshot};
use appconf_core::CancelSignal;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};

/// Media category of snapshot content
pub const MEDIA_CATEGORY: &str = "snapshots";
/// Media type of snapshot content
pub const MEDIA_CONTENT_TYPE: &str = "application/x-ndjson";

/// Lazy, forward-only sequence of stored settings
///
/// Restarting means opening a new stream at an offset.
pub type KeyValueStream = BoxStream<'static, Result<KeyValue>>;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `items` as the content of `snapshot`
    ///
    /// Returns `None` when the store keeps no content.
    async fn provision(
        &self,
        snapshot: &Snapshot,
        items: &[KeyValue],
        cancel: &CancelSignal,
    ) -> Result<Option<MediaInfo>>;

    /// Stream the stored items, skipping the first `offset`
    async fn read(
        &self,
        media: &MediaInfo,
        offset: u64,
        cancel: &CancelSignal,
    ) -> Result<KeyValueStream>;
}

/// File name of a snapshot's content blob
pub fn content_file_name(snapshot_id: &str) -> String {
    format!("{}.ndjson", snapshot_id)
}

/// NDJSON files under a content directory
pub struct FsContentStore {
    directory: PathBuf,
    write_buffer_size: usize,
    read_buffer_size: usize,
    write_timeout: Duration,
    read_timeout: Duration,
}

struct Written {
    size: u64,
    lines: u64,
    sha256: Vec<u8>,
}

impl FsContentStore {
    pub fn new(options: &SnapshotOptions) -> Self {
        Self {
            directory: options.content_directory.clone(),
            write_buffer_size: options.write_buffer_size.max(1),
            read_buffer_size: options.read_buffer_size.max(1),
            write_timeout: options.write_timeout(),
            read_timeout: options.read_timeout(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Published location of `media`
    pub fn path_of(&self, media: &MediaInfo) -> PathBuf {
        self.directory.join(&media.name)
    }

    async fn write_items(&self, tmp: &Path, items: &[KeyValue]) -> Result<Written> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| io_error("provision_content", e))?;
        let file = File::create(tmp)
            .await
            .map_err(|e| io_error("provision_content", e))?;
        let mut writer = BufWriter::with_capacity(self.write_buffer_size, file);
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut lines = 0u64;

        for kv in items {
            let mut line = Vec::new();
            if lines > 0 {
                line.extend_from_slice(RECORD_DELIMITER);
            }
            line.extend_from_slice(&encode_key_value(kv)?);
            writer
                .write_all(&line)
                .await
                .map_err(|e| io_error("provision_content", e))?;
            hasher.update(&line);
            size += line.len() as u64;
            lines += 1;
        }

        writer
            .flush()
            .await
            .map_err(|e| io_error("provision_content", e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| io_error("provision_content", e))?;

        Ok(Written {
            size,
            lines,
            sha256: hasher.finalize().to_vec(),
        })
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn provision(
        &self,
        snapshot: &Snapshot,
        items: &[KeyValue],
        cancel: &CancelSignal,
    ) -> Result<Option<MediaInfo>> {
        let name = content_file_name(&snapshot.id);
        let target = self.directory.join(&name);
        let tmp = temp_path(&target);

        let written = with_deadline(
            "provision_content",
            self.write_timeout,
            cancel,
            self.write_items(&tmp, items),
        )
        .await;
        let written = match written {
            Ok(written) => written,
            Err(e) => {
                discard(&tmp).await;
                return Err(e);
            }
        };
        replace_file(&tmp, &target).await?;

        tracing::debug!(
            snapshot = snapshot.name.as_str(),
            path = %target.display(),
            size_bytes = written.size,
            item_count = written.lines,
            "Published snapshot content"
        );
        Ok(Some(MediaInfo {
            category: MEDIA_CATEGORY.to_string(),
            name,
            size: written.size,
            etag: generate_snapshot_etag(),
            content_type: MEDIA_CONTENT_TYPE.to_string(),
            sha256: encode_digest(&written.sha256),
        }))
    }

    async fn read(
        &self,
        media: &MediaInfo,
        offset: u64,
        cancel: &CancelSignal,
    ) -> Result<KeyValueStream> {
        let path = self.path_of(media);
        let file = with_deadline("read_content", self.read_timeout, cancel, async {
            File::open(&path)
                .await
                .map_err(|e| io_error("read_content", e))
        })
        .await?;

        let reader = ContentReader {
            lines: BufReader::with_capacity(self.read_buffer_size, file).lines(),
            skip: offset,
            read_timeout: self.read_timeout,
            cancel: cancel.clone(),
            done: false,
        };
        Ok(stream::unfold(reader, |mut reader| async move {
            if reader.done {
                return None;
            }
            match reader.next_item().await {
                Ok(Some(kv)) => Some((Ok(kv), reader)),
                Ok(None) => None,
                Err(e) => {
                    reader.done = true;
                    Some((Err(e), reader))
                }
            }
        })
        .boxed())
    }
}

/// Incremental line parser behind [`FsContentStore::read`]
struct ContentReader {
    lines: Lines<BufReader<File>>,
    skip: u64,
    read_timeout: Duration,
    cancel: CancelSignal,
    done: bool,
}

impl ContentReader {
    async fn next_item(&mut self) -> Result<Option<KeyValue>> {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(errors::cancelled("read_content")),
                next = tokio::time::timeout(self.read_timeout, self.lines.next_line()) => match next {
                    Err(_) => return Err(errors::timeout("read_content", self.read_timeout)),
                    Ok(Err(e)) => return Err(io_error("read_content", e)),
                    Ok(Ok(None)) => return Ok(None),
                    Ok(Ok(Some(line))) => line,
                },
            };
            if line.trim().is_empty() {
                continue;
            }
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            return decode_key_value(&line).map(Some);
        }
    }
}

/// Content store for deployments without physical content storage
#[derive(Debug, Default)]
pub struct NullContentStore;

#[async_trait]
impl ContentStore for NullContentStore {
    async fn provision(
        &self,
        _snapshot: &Snapshot,
        _items: &[KeyValue],
        _cancel: &CancelSignal,
    ) -> Result<Option<MediaInfo>> {
        Ok(None)
    }

    async fn read(
        &self,
        _media: &MediaInfo,
        _offset: u64,
        _cancel: &CancelSignal,
    ) -> Result<KeyValueStream> {
        Ok(stream::empty().boxed())
    }
}
