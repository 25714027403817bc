//! Snapshot engine
//!
//! Owns snapshot records and drives the lifecycle:
//!
//! - `create` validates and records a snapshot in `Provisioning`
//! - `provision` composes settings and publishes content, then commits the
//!   terminal status with a compare-and-swap on the record's etag
//! - `archive` / `recover` toggle between `Ready` and `Archived`
//!
//! Provisioning of one snapshot id is serialized by a per-id guard;
//! different snapshots provision in parallel.

use crate::config::{AppConfOptions, SnapshotOptions};
use crate::deadline::run_to_completion;
use crate::errors::{cancelled, domain, snapshot_not_found, snapshot_state, Result};
use crate::settings::KeyValueStore;
use crate::snapshot::content::{ContentStore, FsContentStore, KeyValueStream, NullContentStore};
use crate::snapshot::metadata::SnapshotLog;
use appconf_core::errors::{AppConfError, ExErrorKind};
use appconf_core::etag::{generate_snapshot_etag, snapshot_id};
use appconf_core::model::{
    now, CompositionType, KeyValue, KeyValueSearchOptions, NewSnapshot, Snapshot,
    SnapshotFilter, SnapshotSearchOptions, SnapshotStatus,
};
use appconf_core::paging::{Cursor, Page};
use appconf_core::precondition::{evaluate, EtagCondition, EtagMatch};
use appconf_core::query::tag_filter::{match_all, parse_tag_filters};
use appconf_core::query::StringFilter;
use appconf_core::validation::validate_new_snapshot;
use appconf_core::{log_op_end, log_op_error, log_op_start, CancelSignal, ExError};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

const STATUS_ACCEPTED: u16 = 202;
const STATUS_OK: u16 = 200;
const STATUS_FAILED: u16 = 500;
const STATUS_TIMED_OUT: u16 = 504;

pub struct SnapshotEngine {
    settings: Arc<KeyValueStore>,
    content: Arc<dyn ContentStore>,
    log: SnapshotLog,
    records: RwLock<BTreeMap<String, Snapshot>>,
    provision_guards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    persist_gate: tokio::sync::Mutex<()>,
    options: SnapshotOptions,
    resource_id: String,
}

impl SnapshotEngine {
    /// Open the engine with the content store selected by configuration
    ///
    /// # Errors
    ///
    /// Failures loading the metadata log.
    pub async fn open(options: &AppConfOptions, settings: Arc<KeyValueStore>) -> Result<Self> {
        let content: Arc<dyn ContentStore> = if options.snapshots.content_enabled {
            Arc::new(FsContentStore::new(&options.snapshots))
        } else {
            Arc::new(NullContentStore)
        };
        Self::with_content(options, settings, content).await
    }

    /// Open the engine over an explicit content store
    ///
    /// # Errors
    ///
    /// Failures loading the metadata log.
    pub async fn with_content(
        options: &AppConfOptions,
        settings: Arc<KeyValueStore>,
        content: Arc<dyn ContentStore>,
    ) -> Result<Self> {
        let log = SnapshotLog::new(options.snapshots.metadata_file_path.clone());
        let records = log.load().await?;
        tracing::debug!(snapshots = records.len(), "Loaded snapshot metadata");

        Ok(Self {
            settings,
            content,
            log,
            records: RwLock::new(records),
            provision_guards: Mutex::new(HashMap::new()),
            persist_gate: tokio::sync::Mutex::new(()),
            options: options.snapshots.clone(),
            resource_id: options.resource_id.clone(),
        })
    }

    /// Record a new snapshot in `Provisioning`
    ///
    /// # Errors
    ///
    /// - `InvalidInput` / `SearchQuery` when the request is invalid
    /// - `AlreadyExists` when the name is taken
    /// - `Timeout` / `Cancelled` / `Io` from the metadata write
    pub async fn create(&self, request: NewSnapshot, cancel: &CancelSignal) -> Result<Snapshot> {
        log_op_start!("snapshot_create", snapshot = request.name.as_str());
        let start = Instant::now();

        let result = self.create_impl(request, cancel).await.map_err(|e| {
            log_op_error!("snapshot_create", e.clone(), duration_ms = start.elapsed().as_millis() as u64);
            e
        })?;

        log_op_end!(
            "snapshot_create",
            duration_ms = start.elapsed().as_millis() as u64,
            snapshot_id = result.id.as_str()
        );
        Ok(result)
    }

    async fn create_impl(&self, request: NewSnapshot, cancel: &CancelSignal) -> Result<Snapshot> {
        const OP: &str = "snapshot_create";
        validate_new_snapshot(&request, &self.options.limits()).map_err(|e| domain(OP, e))?;

        let created = now();
        let snapshot = Snapshot {
            id: snapshot_id(&self.resource_id, &request.name),
            name: request.name,
            etag: generate_snapshot_etag(),
            status: SnapshotStatus::Provisioning,
            status_code: STATUS_ACCEPTED,
            status_message: None,
            filters: request.filters,
            composition_type: request.composition_type,
            retention_period_seconds: request
                .retention_period_seconds
                .unwrap_or(self.options.default_retention_secs),
            created,
            last_modified: created,
            expires: None,
            items_count: 0,
            size_bytes: 0,
            tags: request.tags,
            media: None,
        };

        {
            let mut records = self.records.write();
            if records.contains_key(&snapshot.name) {
                return Err(domain(
                    OP,
                    AppConfError::SnapshotAlreadyExists {
                        name: snapshot.name.clone(),
                    },
                ));
            }
            records.insert(snapshot.name.clone(), snapshot.clone());
        }

        let persisted = {
            let _gate = self.persist_gate.lock().await;
            self.log.append(&snapshot, self.options.write_timeout(), cancel).await
        };
        if let Err(e) = persisted {
            self.records.write().remove(&snapshot.name);
            return Err(e);
        }
        Ok(snapshot)
    }

    /// # Errors
    ///
    /// `NotFound` when no snapshot has this name.
    pub fn get(&self, name: &str) -> Result<Snapshot> {
        self.records
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| snapshot_not_found("snapshot_get", name))
    }

    /// Snapshots matching `options`, ordered by name
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty status filter, `Format` for a malformed
    /// continuation token.
    pub fn list(&self, options: &SnapshotSearchOptions) -> Result<Page<Snapshot>> {
        const OP: &str = "snapshot_list";
        if options.status.is_empty() {
            return Err(domain(
                OP,
                AppConfError::InvalidInput {
                    field: "status".to_string(),
                    reason: "at least one status is required".to_string(),
                },
            ));
        }
        let offset = Cursor::offset_of(options.continuation_token.as_deref())
            .map_err(|e| domain(OP, e))?;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let page_size = self.options.output_page_size.max(1);

        let mut window: Vec<Snapshot> = self
            .records
            .read()
            .values()
            .filter(|s| options.name.matches(Some(s.name.as_str())) && options.status.contains(s.status))
            .skip(skip)
            .take(page_size + 1)
            .cloned()
            .collect();
        let token = if window.len() > page_size {
            window.truncate(page_size);
            Some(Cursor::Offset(offset + page_size as u64).encode())
        } else {
            None
        };
        Ok(Page::new(window, token, |s| s.etag.as_str()))
    }

    /// Names of snapshots still waiting for content
    pub fn provisioning(&self) -> Vec<String> {
        self.records
            .read()
            .values()
            .filter(|s| s.status == SnapshotStatus::Provisioning)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Archived snapshots whose retention ended at or before `at`
    pub fn expired(&self, at: DateTime<Utc>) -> Vec<Snapshot> {
        self.records
            .read()
            .values()
            .filter(|s| s.status == SnapshotStatus::Archived && s.expires.is_some_and(|e| e <= at))
            .cloned()
            .collect()
    }

    /// Compose and publish the content of a `Provisioning` snapshot
    ///
    /// Non-transient failures are recorded: the returned snapshot is `Failed`
    /// with a diagnostic. Timeouts and cancellation leave the snapshot in
    /// `Provisioning` and are returned as errors.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown name
    /// - `SnapshotState` when the snapshot is not `Provisioning`
    /// - `Timeout` / `Cancelled` from composition or content I/O
    pub async fn provision(&self, name: &str, cancel: &CancelSignal) -> Result<Snapshot> {
        log_op_start!("snapshot_provision", snapshot = name);
        let start = Instant::now();

        let result = self.provision_impl(name, cancel).await.map_err(|e| {
            log_op_error!(
                "snapshot_provision",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                snapshot = name
            );
            e
        })?;

        log_op_end!(
            "snapshot_provision",
            duration_ms = start.elapsed().as_millis() as u64,
            snapshot = name,
            snapshot_status = result.status.as_str(),
            item_count = result.items_count,
            size_bytes = result.size_bytes
        );
        Ok(result)
    }

    async fn provision_impl(&self, name: &str, cancel: &CancelSignal) -> Result<Snapshot> {
        let id = self.get(name)?.id;
        let gate = self.provision_guard(&id);
        let result = self.provision_guarded(name, &gate, cancel).await;
        self.release_provision_guard(&id, gate);
        result
    }

    async fn provision_guarded(
        &self,
        name: &str,
        gate: &tokio::sync::Mutex<()>,
        cancel: &CancelSignal,
    ) -> Result<Snapshot> {
        const OP: &str = "provision";
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(OP)),
            held = gate.lock() => held,
        };

        let snapshot = self.get(name)?;
        if snapshot.status != SnapshotStatus::Provisioning {
            return Err(snapshot_state(OP, name, snapshot.status.as_str()));
        }

        let outcome = async {
            let items = self.compose(&snapshot, cancel).await?;
            let media = self.content.provision(&snapshot, &items, cancel).await?;
            Ok::<_, ExError>((items.len() as u64, media))
        }
        .await;

        match outcome {
            Ok((items_count, media)) => {
                self.commit(OP, &snapshot, SnapshotStatus::Ready, |s| {
                    s.status_code = STATUS_OK;
                    s.items_count = items_count;
                    s.size_bytes = media.as_ref().map_or(0, |m| m.size);
                    s.media = media;
                })
                .await
            }
            Err(e) if e.kind() == ExErrorKind::Cancelled || e.is_transient() => Err(e),
            Err(e) => {
                tracing::warn!(snapshot = name, error = %e, "Snapshot provisioning failed");
                self.commit(OP, &snapshot, SnapshotStatus::Failed, |s| {
                    s.status_code = STATUS_FAILED;
                    s.status_message = Some(e.to_string());
                })
                .await
            }
        }
    }

    /// Give up on a `Provisioning` snapshot after retries are exhausted
    ///
    /// # Errors
    ///
    /// `NotFound`, or `SnapshotState` when the snapshot already left
    /// `Provisioning`.
    pub async fn mark_failed(&self, name: &str, reason: &ExError) -> Result<Snapshot> {
        const OP: &str = "mark_failed";
        let snapshot = self.get(name)?;
        let status_code = if reason.kind() == ExErrorKind::Timeout {
            STATUS_TIMED_OUT
        } else {
            STATUS_FAILED
        };
        self.commit(OP, &snapshot, SnapshotStatus::Failed, |s| {
            s.status_code = status_code;
            s.status_message = Some(reason.to_string());
        })
        .await
    }

    /// Move a `Ready` snapshot to `Archived`; it expires after its retention
    ///
    /// # Errors
    ///
    /// `SnapshotState` for a missing etag or wrong status, `Concurrency`
    /// when the etag does not match.
    pub async fn archive(&self, name: &str, etag: Option<&str>) -> Result<Snapshot> {
        self.transition("archive", name, etag, SnapshotStatus::Archived).await
    }

    /// Move an `Archived` snapshot back to `Ready`
    ///
    /// # Errors
    ///
    /// Same as [`SnapshotEngine::archive`].
    pub async fn recover(&self, name: &str, etag: Option<&str>) -> Result<Snapshot> {
        self.transition("recover", name, etag, SnapshotStatus::Ready).await
    }

    async fn transition(
        &self,
        op: &'static str,
        name: &str,
        etag: Option<&str>,
        next: SnapshotStatus,
    ) -> Result<Snapshot> {
        log_op_start!(op, snapshot = name);
        let start = Instant::now();

        let result = self.transition_impl(op, name, etag, next).await.map_err(|e| {
            log_op_error!(op, e.clone(), duration_ms = start.elapsed().as_millis() as u64);
            e
        })?;

        log_op_end!(
            op,
            duration_ms = start.elapsed().as_millis() as u64,
            snapshot_status = result.status.as_str()
        );
        Ok(result)
    }

    async fn transition_impl(
        &self,
        op: &str,
        name: &str,
        etag: Option<&str>,
        next: SnapshotStatus,
    ) -> Result<Snapshot> {
        let snapshot = self.get(name)?;
        let etag = etag.filter(|e| !e.trim().is_empty()).ok_or_else(|| {
            domain(
                op,
                AppConfError::MissingEtag {
                    name: name.to_string(),
                },
            )
        })?;
        let condition = EtagMatch::Match(EtagCondition::parse(etag));
        if !evaluate(&condition, Some(snapshot.etag.as_str())).is_proceed() {
            return Err(domain(
                op,
                AppConfError::SnapshotConflict {
                    name: name.to_string(),
                },
            ));
        }

        let retention = i64::try_from(snapshot.retention_period_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds);
        self.commit(op, &snapshot, next, |s| {
            s.expires = match (next, retention) {
                (SnapshotStatus::Archived, Some(retention)) => now().checked_add_signed(retention),
                _ => None,
            };
        })
        .await
    }

    /// Stream a snapshot's content from `offset`
    ///
    /// Snapshots without readable content yield an empty stream.
    ///
    /// # Errors
    ///
    /// `NotFound`, or content store failures opening the blob.
    pub async fn read_content(
        &self,
        name: &str,
        offset: u64,
        cancel: &CancelSignal,
    ) -> Result<KeyValueStream> {
        let snapshot = self.get(name)?;
        match (&snapshot.media, snapshot.status.has_content()) {
            (Some(media), true) => self.content.read(media, offset, cancel).await,
            _ => Ok(futures::stream::empty().boxed()),
        }
    }

    /// One page of a snapshot's content
    ///
    /// # Errors
    ///
    /// `Format` for a malformed continuation token, plus read failures.
    pub async fn content_page(
        &self,
        name: &str,
        continuation_token: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<Page<KeyValue>> {
        let offset = Cursor::offset_of(continuation_token).map_err(|e| domain("snapshot_content", e))?;
        let page_size = self.options.output_page_size.max(1);

        let mut window: Vec<KeyValue> = self
            .read_content(name, offset, cancel)
            .await?
            .take(page_size + 1)
            .try_collect()
            .await?;
        let token = if window.len() > page_size {
            window.truncate(page_size);
            Some(Cursor::Offset(offset + page_size as u64).encode())
        } else {
            None
        };
        Ok(Page::new(window, token, |kv| kv.etag.as_str()))
    }

    /// Key-value query answered from a snapshot's content
    ///
    /// # Errors
    ///
    /// `InvalidInput` without a snapshot name, `Format` for a malformed
    /// token, `RangeNotSatisfiable`, plus read failures.
    pub async fn query(
        &self,
        options: &KeyValueSearchOptions,
        cancel: &CancelSignal,
    ) -> Result<Page<KeyValue>> {
        const OP: &str = "snapshot_query";
        let name = options.snapshot_name.as_deref().ok_or_else(|| {
            domain(
                OP,
                AppConfError::InvalidInput {
                    field: "snapshot".to_string(),
                    reason: "a snapshot name is required".to_string(),
                },
            )
        })?;
        let offset = Cursor::offset_of(options.continuation_token.as_deref())
            .map_err(|e| domain(OP, e))?;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let page_size = self.options.output_page_size.max(1);

        let mut window: Vec<KeyValue> = self
            .read_content(name, 0, cancel)
            .await?
            .try_filter(|kv| {
                let keep = options.key.matches(Some(kv.key.as_str()))
                    && options.label.matches(kv.label.as_deref())
                    && match_all(&options.tags, &kv.tags);
                futures::future::ready(keep)
            })
            .skip(skip)
            .take(page_size + 1)
            .try_collect()
            .await?;
        let more = window.len() > page_size;
        window.truncate(page_size);

        let fetched = window.len();
        let (items, stopped_short) = match options.range {
            None => (window, false),
            Some(range) => {
                let (slice, short) = range.apply(&window).map_err(|e| domain(OP, e))?;
                (slice.to_vec(), short)
            }
        };
        let token = if more || stopped_short {
            let consumed = options.range.and_then(|r| r.to).unwrap_or(fetched);
            Some(Cursor::Offset(offset + consumed as u64).encode())
        } else {
            None
        };
        Ok(Page::new(items, token, |kv| kv.etag.as_str()).ranged(options.range, fetched))
    }

    /// Settings selected by the snapshot's filters
    ///
    /// Later filters override earlier ones for the same identity: the key for
    /// `key` composition, the key and label for `key_label`.
    async fn compose(&self, snapshot: &Snapshot, cancel: &CancelSignal) -> Result<Vec<KeyValue>> {
        const OP: &str = "compose";
        let mut composed: BTreeMap<(String, Option<String>), KeyValue> = BTreeMap::new();

        for filter in &snapshot.filters {
            let mut options = filter_options(filter).map_err(|e| domain(OP, e))?;
            options.time_gate = Some(snapshot.created);
            loop {
                let page = self.settings.query(&options, cancel).await?;
                for kv in page.items {
                    let identity = match snapshot.composition_type {
                        CompositionType::Key => (kv.key.clone(), None),
                        CompositionType::KeyLabel => (kv.key.clone(), kv.label.clone()),
                    };
                    composed.insert(identity, kv);
                }
                match page.continuation_token {
                    Some(token) => options.continuation_token = Some(token),
                    None => break,
                }
            }
        }
        Ok(composed.into_values().collect())
    }

    fn provision_guard(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.provision_guards
            .lock()
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the guard of `id` once no other caller holds it
    ///
    /// Guards are cloned and dropped only under the map lock, so a count of
    /// one means the map holds the last reference.
    fn release_provision_guard(&self, id: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut guards = self.provision_guards.lock();
        drop(gate);
        if guards.get(id).is_some_and(|g| Arc::strong_count(g) == 1) {
            guards.remove(id);
        }
    }

    /// Apply `mutate` if the record is unchanged since `expected` was read
    ///
    /// Assigns a new etag and modification time, then rewrites the metadata
    /// log. The in-memory record is restored if the rewrite fails.
    async fn commit<F>(
        &self,
        op: &str,
        expected: &Snapshot,
        next: SnapshotStatus,
        mutate: F,
    ) -> Result<Snapshot>
    where
        F: FnOnce(&mut Snapshot),
    {
        let (previous, updated) = {
            let mut records = self.records.write();
            let current = records
                .get_mut(&expected.name)
                .ok_or_else(|| snapshot_not_found(op, &expected.name))?;
            if current.status != expected.status || !current.status.can_transition_to(next) {
                return Err(snapshot_state(op, &current.name, current.status.as_str()));
            }
            if current.etag != expected.etag {
                return Err(domain(
                    op,
                    AppConfError::SnapshotConflict {
                        name: current.name.clone(),
                    },
                ));
            }
            let previous = current.clone();
            mutate(current);
            current.status = next;
            current.etag = generate_snapshot_etag();
            current.last_modified = now();
            (previous, current.clone())
        };

        if let Err(e) = self.persist_all(op).await {
            let mut records = self.records.write();
            if let Some(current) = records.get_mut(&updated.name) {
                if current.etag == updated.etag {
                    *current = previous;
                }
            }
            return Err(e);
        }
        Ok(updated)
    }

    /// Rewrite the metadata log from the in-memory records
    ///
    /// The rewrite always runs to completion and its outcome stands; one that
    /// outlives the write deadline is only logged.
    async fn persist_all(&self, op: &str) -> Result<()> {
        let _gate = self.persist_gate.lock().await;
        let snapshots: Vec<Snapshot> = self.records.read().values().cloned().collect();
        let log = self.log.clone();
        let (written, late) = run_to_completion(
            op,
            self.options.write_timeout(),
            &CancelSignal::never(),
            async move { log.rewrite(&snapshots).await },
        )
        .await;
        if let Some(late) = late {
            tracing::warn!(op = op, error = %late, "Snapshot metadata rewrite outlived its deadline");
        }
        written
    }
}

/// Key-value query selecting one filter's members
///
/// A missing or empty label selects the null label.
fn filter_options(filter: &SnapshotFilter) -> appconf_core::Result<KeyValueSearchOptions> {
    let label = match filter.label.as_deref() {
        None | Some("") => StringFilter::null(),
        Some(expr) => StringFilter::parse("label", expr)?,
    };
    Ok(KeyValueSearchOptions {
        key: StringFilter::parse("key", &filter.key)?,
        label,
        tags: parse_tag_filters(filter.tags.iter().map(String::as_str))?,
        ..KeyValueSearchOptions::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryJournal;
    use tempfile::TempDir;

    async fn open_engine(dir: &TempDir) -> SnapshotEngine {
        let options = AppConfOptions::rooted_at(dir.path());
        let settings = KeyValueStore::open(&options.settings, Arc::new(MemoryJournal::new()))
            .await
            .unwrap();
        SnapshotEngine::with_content(&options, Arc::new(settings), Arc::new(NullContentStore))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_provision_guards_are_released() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(open_engine(&dir).await);
        let never = CancelSignal::never();
        for name in ["s1", "s2", "s3"] {
            let request = NewSnapshot::new(name).with_filter(SnapshotFilter::new("*", None));
            engine.create(request, &never).await.unwrap();
        }

        let runs: Vec<_> = ["s1", "s1", "s2", "s3"]
            .into_iter()
            .map(|name| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.provision(name, &CancelSignal::never()).await })
            })
            .collect();
        for run in runs {
            let _ = run.await.unwrap();
        }

        assert_eq!(engine.get("s1").unwrap().status, SnapshotStatus::Ready);
        assert!(engine.provision_guards.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_create_is_not_reloaded() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir).await;
        let source = appconf_core::CancelSource::new();
        source.cancel();

        let request = NewSnapshot::new("s1").with_filter(SnapshotFilter::new("*", None));
        let err = engine.create(request, &source.signal()).await.unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Cancelled);
        assert!(engine.get("s1").is_err());

        let reopened = open_engine(&dir).await;
        assert!(reopened.get("s1").is_err());
    }

    #[test]
    fn test_filter_without_label_selects_null_label() {
        let options = filter_options(&SnapshotFilter::new("app/*", None)).unwrap();
        assert!(options.label.matches(None));
        assert!(!options.label.matches(Some("prod")));
        assert!(options.key.matches(Some("app/color")));
    }

    #[test]
    fn test_filter_label_and_tags_are_parsed() {
        let filter = SnapshotFilter::new("*", Some("prod,dev")).with_tag("team=ui");
        let options = filter_options(&filter).unwrap();
        assert!(options.label.matches(Some("dev")));
        assert!(!options.label.matches(None));
        assert_eq!(options.tags.len(), 1);
    }
}
