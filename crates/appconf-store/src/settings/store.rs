//! Key-value store
//!
//! Each `(key, label)` entry owns a slot holding its revisions, oldest
//! first. Writers to one entry serialize on that slot's gate and compare
//! etags; writers to different entries proceed in parallel.
//!
//! ## Logging Ownership
//!
//! Public operations log `start` / `end` / `end_error` through the op
//! macros. Setting values only reach the log wrapped in `Sensitive`.

use crate::config::SettingsOptions;
use crate::errors::{
    cancelled, conflict, domain, key_locked, key_value_not_found, Result,
};
use crate::settings::journal::{NdjsonJournal, SettingsJournal};
use appconf_core::errors::AppConfError;
use appconf_core::etag::{generate_etag, key_value_id};
use appconf_core::model::{
    now, EntryKey, KeySearchOptions, KeyValue, KeyValueSearchOptions, LabelSearchOptions,
};
use appconf_core::paging::{Cursor, Page};
use appconf_core::precondition::{evaluate, EtagCondition, EtagMatch};
use appconf_core::query::tag_filter::match_all;
use appconf_core::validation::validate_key_value;
use appconf_core::{log_op_end, log_op_error, log_op_start, CancelSignal};
use appconf_core_types::Sensitive;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Revisions of one `(key, label)` entry
#[derive(Default)]
struct Slot {
    write_gate: tokio::sync::Mutex<()>,
    revisions: RwLock<Vec<KeyValue>>,
}

impl Slot {
    fn live(&self) -> Option<KeyValue> {
        self.visible(None)
    }

    /// Newest revision at or before `gate`, unless it is a tombstone
    fn visible(&self, gate: Option<DateTime<Utc>>) -> Option<KeyValue> {
        let revisions = self.revisions.read();
        let newest = match gate {
            None => revisions.last(),
            Some(at) => revisions.iter().rev().find(|r| r.created <= at),
        };
        newest.filter(|r| !r.is_deleted()).cloned()
    }

    fn push(&self, revision: KeyValue) {
        self.revisions.write().push(revision);
    }
}

pub struct KeyValueStore {
    slots: RwLock<BTreeMap<EntryKey, Arc<Slot>>>,
    journal: Arc<dyn SettingsJournal>,
    page_size: usize,
    revision_ttl: Duration,
    write_timeout: Duration,
}

impl KeyValueStore {
    /// Open a store over `journal`, replaying every recorded revision
    ///
    /// # Errors
    ///
    /// Whatever the journal reports while loading.
    pub async fn open(options: &SettingsOptions, journal: Arc<dyn SettingsJournal>) -> Result<Self> {
        let revision_ttl = options.revision_ttl();
        let mut slots: BTreeMap<EntryKey, Arc<Slot>> = BTreeMap::new();
        let mut replayed = 0usize;
        for mut revision in journal.load().await? {
            if revision.revision_ttl.is_zero() {
                revision.revision_ttl = revision_ttl;
            }
            slots
                .entry(revision.entry_key())
                .or_default()
                .push(revision);
            replayed += 1;
        }
        tracing::debug!(entries = slots.len(), revisions = replayed, "Opened key-value store");

        Ok(Self {
            slots: RwLock::new(slots),
            journal,
            page_size: options.output_page_size.max(1),
            revision_ttl,
            write_timeout: options.write_timeout(),
        })
    }

    /// Open the NDJSON journal at `options.file_path`
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Io` or `ExErrorKind::Serialization` from replay.
    pub async fn open_file(options: &SettingsOptions) -> Result<Self> {
        let journal = Arc::new(NdjsonJournal::new(options.file_path.clone()));
        Self::open(options, journal).await
    }

    /// Live revision of `(key, label)`
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Cancelled` if the signal already fired.
    pub async fn get(
        &self,
        key: &str,
        label: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<Option<KeyValue>> {
        if cancel.is_cancelled() {
            return Err(cancelled("kv_get"));
        }
        let entry = EntryKey::new(key, label);
        Ok(self.lookup(&entry).and_then(|slot| slot.live()))
    }

    /// Create or replace the live value of `kv`'s entry
    ///
    /// `expected_etag` follows If-Match rules: a concrete etag must equal the
    /// live one and `*` requires a live value to exist.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when validation fails
    /// - `Concurrency` on etag mismatch
    /// - `KeyLocked` when the live value is locked
    /// - `Timeout` / `Cancelled` / `Io` from the journal write
    pub async fn set(
        &self,
        kv: KeyValue,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<KeyValue> {
        log_op_start!(
            "kv_set",
            key = kv.key.as_str(),
            label = kv.label.as_deref().unwrap_or_default(),
            value = %Sensitive::new(kv.value.clone().unwrap_or_default())
        );
        let start = Instant::now();

        let result = self.set_impl(kv, expected_etag, cancel).await.map_err(|e| {
            log_op_error!("kv_set", e.clone(), duration_ms = start.elapsed().as_millis() as u64);
            e
        })?;

        log_op_end!(
            "kv_set",
            duration_ms = start.elapsed().as_millis() as u64,
            etag = result.etag.as_str()
        );
        Ok(result)
    }

    async fn set_impl(
        &self,
        kv: KeyValue,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<KeyValue> {
        const OP: &str = "kv_set";
        validate_key_value(&kv).map_err(|e| domain(OP, e))?;

        let entry = EntryKey::new(kv.key.as_str(), kv.label.as_deref());
        let slot = match self.lookup(&entry) {
            Some(slot) => slot,
            None => {
                check_etag(OP, &entry, None, expected_etag)?;
                self.slot_or_insert(&entry)
            }
        };
        let written = self.set_in_slot(&slot, entry.clone(), kv, expected_etag, cancel).await;
        if written.is_err() {
            self.prune_if_empty(&entry, slot);
        }
        written
    }

    async fn set_in_slot(
        &self,
        slot: &Slot,
        entry: EntryKey,
        kv: KeyValue,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<KeyValue> {
        const OP: &str = "kv_set";
        let _gate = lock_gate(OP, slot, cancel).await?;

        let current = slot.live();
        check_etag(OP, &entry, current.as_ref(), expected_etag)?;
        if current.as_ref().is_some_and(|c| c.locked) {
            return Err(key_locked(OP, &entry.key, entry.label.as_deref()));
        }

        let revision = KeyValue {
            id: key_value_id(&entry.key, entry.label.as_deref()),
            etag: generate_etag(),
            key: entry.key,
            label: entry.label,
            content_type: kv.content_type,
            value: kv.value,
            tags: kv.tags,
            created: now(),
            locked: false,
            deleted: None,
            revision_ttl: self.revision_ttl,
        };
        self.persist(OP, &revision, cancel).await?;
        slot.push(revision.clone());
        Ok(revision)
    }

    /// Soft-delete the live value of `(key, label)`
    ///
    /// Returns the removed value with its `deleted` time set, or `None` when
    /// there was nothing live to remove.
    ///
    /// # Errors
    ///
    /// `Concurrency` on etag mismatch, `KeyLocked` when locked, plus journal
    /// failures.
    pub async fn remove(
        &self,
        key: &str,
        label: Option<&str>,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<Option<KeyValue>> {
        log_op_start!("kv_remove", key = key, label = label.unwrap_or_default());
        let start = Instant::now();

        let result = self
            .remove_impl(EntryKey::new(key, label), expected_etag, cancel)
            .await
            .map_err(|e| {
                log_op_error!("kv_remove", e.clone(), duration_ms = start.elapsed().as_millis() as u64);
                e
            })?;

        log_op_end!(
            "kv_remove",
            duration_ms = start.elapsed().as_millis() as u64,
            removed = result.is_some()
        );
        Ok(result)
    }

    async fn remove_impl(
        &self,
        entry: EntryKey,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<Option<KeyValue>> {
        const OP: &str = "kv_remove";
        let Some(slot) = self.lookup(&entry) else {
            check_etag(OP, &entry, None, expected_etag)?;
            return Ok(None);
        };
        let _gate = lock_gate(OP, &slot, cancel).await?;

        let current = slot.live();
        check_etag(OP, &entry, current.as_ref(), expected_etag)?;
        let Some(current) = current else {
            return Ok(None);
        };
        if current.locked {
            return Err(key_locked(OP, &entry.key, entry.label.as_deref()));
        }

        let at = now();
        let mut tombstone = current.tombstone(generate_etag(), at);
        tombstone.revision_ttl = self.revision_ttl;
        self.persist(OP, &tombstone, cancel).await?;
        slot.push(tombstone);

        Ok(Some(KeyValue {
            deleted: Some(at),
            ..current
        }))
    }

    /// Set the write guard on the live value
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing is live, `Concurrency` on etag mismatch, plus
    /// journal failures.
    pub async fn lock(
        &self,
        key: &str,
        label: Option<&str>,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<KeyValue> {
        self.toggle_lock("kv_lock", EntryKey::new(key, label), true, expected_etag, cancel)
            .await
    }

    /// Clear the write guard on the live value
    ///
    /// # Errors
    ///
    /// Same as [`KeyValueStore::lock`].
    pub async fn unlock(
        &self,
        key: &str,
        label: Option<&str>,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<KeyValue> {
        self.toggle_lock("kv_unlock", EntryKey::new(key, label), false, expected_etag, cancel)
            .await
    }

    async fn toggle_lock(
        &self,
        op: &'static str,
        entry: EntryKey,
        locked: bool,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<KeyValue> {
        log_op_start!(op, key = entry.key.as_str(), label = entry.label.as_deref().unwrap_or_default());
        let start = Instant::now();

        let result = self
            .toggle_lock_impl(op, entry, locked, expected_etag, cancel)
            .await
            .map_err(|e| {
                log_op_error!(op, e.clone(), duration_ms = start.elapsed().as_millis() as u64);
                e
            })?;

        log_op_end!(
            op,
            duration_ms = start.elapsed().as_millis() as u64,
            etag = result.etag.as_str()
        );
        Ok(result)
    }

    async fn toggle_lock_impl(
        &self,
        op: &str,
        entry: EntryKey,
        locked: bool,
        expected_etag: Option<&str>,
        cancel: &CancelSignal,
    ) -> Result<KeyValue> {
        let not_found = || key_value_not_found(op, &entry.key, entry.label.as_deref());
        let slot = self.lookup(&entry).ok_or_else(not_found)?;
        let _gate = lock_gate(op, &slot, cancel).await?;

        let current = slot.live().ok_or_else(not_found)?;
        check_etag(op, &entry, Some(&current), expected_etag)?;

        let revision = KeyValue {
            etag: generate_etag(),
            created: now(),
            locked,
            revision_ttl: self.revision_ttl,
            ..current
        };
        self.persist(op, &revision, cancel).await?;
        slot.push(revision.clone());
        Ok(revision)
    }

    /// Live settings matching `options`, ordered by `(key, label)`
    ///
    /// The continuation token resumes strictly after the last returned entry.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for snapshot-scoped options
    /// - `Format` for a malformed continuation token
    /// - `RangeNotSatisfiable` when the range falls outside the page
    pub async fn query(
        &self,
        options: &KeyValueSearchOptions,
        cancel: &CancelSignal,
    ) -> Result<Page<KeyValue>> {
        const OP: &str = "kv_query";
        if cancel.is_cancelled() {
            return Err(cancelled(OP));
        }
        if options.snapshot_name.is_some() {
            return Err(domain(
                OP,
                AppConfError::InvalidInput {
                    field: "snapshot".to_string(),
                    reason: "snapshot queries are served from snapshot content".to_string(),
                },
            ));
        }
        let after = Cursor::after_of(options.continuation_token.as_deref())
            .map_err(|e| domain(OP, e))?;
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);

        let mut matched = Vec::new();
        let mut more = false;
        {
            let slots = self.slots.read();
            for (entry, slot) in slots.range((lower, Bound::Unbounded)) {
                if !options.key.matches(Some(entry.key.as_str()))
                    || !options.label.matches(entry.label.as_deref())
                {
                    continue;
                }
                let Some(kv) = slot.visible(options.time_gate) else {
                    continue;
                };
                if !match_all(&options.tags, &kv.tags) {
                    continue;
                }
                if matched.len() == self.page_size {
                    more = true;
                    break;
                }
                matched.push(kv);
            }
        }

        let selected = matched.len();
        let (items, stopped_short) = apply_range(OP, options, matched)?;
        let token = if more || stopped_short {
            items.last().map(|kv| Cursor::After(kv.entry_key()).encode())
        } else {
            None
        };
        Ok(Page::new(items, token, |kv| kv.etag.as_str()).ranged(options.range, selected))
    }

    /// Distinct keys with a live value
    ///
    /// # Errors
    ///
    /// `Format` for a malformed continuation token.
    pub async fn query_keys(
        &self,
        options: &KeySearchOptions,
        cancel: &CancelSignal,
    ) -> Result<Page<String>> {
        const OP: &str = "kv_query_keys";
        if cancel.is_cancelled() {
            return Err(cancelled(OP));
        }
        let offset = Cursor::offset_of(options.continuation_token.as_deref())
            .map_err(|e| domain(OP, e))?;

        let mut keys = BTreeSet::new();
        for (entry, slot) in self.slots.read().iter() {
            if options.name.matches(Some(entry.key.as_str())) && slot.visible(options.time_gate).is_some() {
                keys.insert(entry.key.clone());
            }
        }
        Ok(self.offset_page(keys.into_iter(), offset, String::as_str))
    }

    /// Distinct labels with a live value; `None` is the null label
    ///
    /// # Errors
    ///
    /// `Format` for a malformed continuation token.
    pub async fn query_labels(
        &self,
        options: &LabelSearchOptions,
        cancel: &CancelSignal,
    ) -> Result<Page<Option<String>>> {
        const OP: &str = "kv_query_labels";
        if cancel.is_cancelled() {
            return Err(cancelled(OP));
        }
        let offset = Cursor::offset_of(options.continuation_token.as_deref())
            .map_err(|e| domain(OP, e))?;

        let mut labels = BTreeSet::new();
        for (entry, slot) in self.slots.read().iter() {
            if options.name.matches(entry.label.as_deref())
                && slot.visible(options.time_gate).is_some()
            {
                labels.insert(entry.label.clone());
            }
        }
        Ok(self.offset_page(labels.into_iter(), offset, |label| {
            label.as_deref().unwrap_or_default()
        }))
    }

    /// Every revision matching `options`, tombstones included, newest first
    ///
    /// # Errors
    ///
    /// `Format` for a malformed continuation token, `RangeNotSatisfiable`
    /// when the range falls outside the page.
    pub async fn query_revisions(
        &self,
        options: &KeyValueSearchOptions,
        cancel: &CancelSignal,
    ) -> Result<Page<KeyValue>> {
        const OP: &str = "kv_query_revisions";
        if cancel.is_cancelled() {
            return Err(cancelled(OP));
        }
        let offset = Cursor::offset_of(options.continuation_token.as_deref())
            .map_err(|e| domain(OP, e))?;

        let mut revisions = Vec::new();
        for (entry, slot) in self.slots.read().iter() {
            if !options.key.matches(Some(entry.key.as_str()))
                || !options.label.matches(entry.label.as_deref())
            {
                continue;
            }
            revisions.extend(
                slot.revisions
                    .read()
                    .iter()
                    .rev()
                    .filter(|r| options.time_gate.map_or(true, |at| r.created <= at))
                    .filter(|r| match_all(&options.tags, &r.tags))
                    .cloned(),
            );
        }
        revisions.sort_by(|a, b| b.created.cmp(&a.created));

        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let mut window: Vec<KeyValue> = revisions.into_iter().skip(skip).take(self.page_size + 1).collect();
        let more = window.len() > self.page_size;
        window.truncate(self.page_size);

        let fetched = window.len();
        let (items, stopped_short) = apply_range(OP, options, window)?;
        let token = if more || stopped_short {
            let consumed = match options.range {
                Some(range) => range.to.unwrap_or(fetched),
                None => fetched,
            };
            Some(Cursor::Offset(offset + consumed as u64).encode())
        } else {
            None
        };
        Ok(Page::new(items, token, |kv| kv.etag.as_str()).ranged(options.range, fetched))
    }

    /// Revisions whose retention has elapsed at `at`
    ///
    /// A superseded revision expires `revision_ttl` after its successor was
    /// written; a tombstone expires `revision_ttl` after the delete.
    pub fn purgeable_revisions(&self, at: DateTime<Utc>) -> Vec<KeyValue> {
        let mut purgeable = Vec::new();
        for slot in self.slots.read().values() {
            let revisions = slot.revisions.read();
            for (index, revision) in revisions.iter().enumerate() {
                let since = match revisions.get(index + 1) {
                    Some(successor) => Some(successor.created),
                    None => revision.deleted,
                };
                let expires = since.and_then(|t| {
                    chrono::Duration::from_std(revision.revision_ttl)
                        .ok()
                        .and_then(|ttl| t.checked_add_signed(ttl))
                });
                if expires.is_some_and(|e| e <= at) {
                    purgeable.push(revision.clone());
                }
            }
        }
        purgeable
    }

    fn lookup(&self, entry: &EntryKey) -> Option<Arc<Slot>> {
        self.slots.read().get(entry).cloned()
    }

    fn slot_or_insert(&self, entry: &EntryKey) -> Arc<Slot> {
        if let Some(slot) = self.lookup(entry) {
            return slot;
        }
        self.slots.write().entry(entry.clone()).or_default().clone()
    }

    /// Journal `revision`; on error the journal is unchanged
    async fn persist(&self, op: &str, revision: &KeyValue, cancel: &CancelSignal) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(cancelled(op));
        }
        self.journal.append(revision, self.write_timeout, cancel).await
    }

    /// Drop the slot of `entry` if a failed first write left it empty
    ///
    /// The caller's handle is released under the index lock; a count of one
    /// then means no other writer holds the slot.
    fn prune_if_empty(&self, entry: &EntryKey, slot: Arc<Slot>) {
        let mut slots = self.slots.write();
        drop(slot);
        let unused = slots
            .get(entry)
            .is_some_and(|s| Arc::strong_count(s) == 1 && s.revisions.read().is_empty());
        if unused {
            slots.remove(entry);
        }
    }

    fn offset_page<T, I, F>(&self, items: I, offset: u64, item_etag: F) -> Page<T>
    where
        I: Iterator<Item = T>,
        F: Fn(&T) -> &str,
    {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let mut window: Vec<T> = items.skip(skip).take(self.page_size + 1).collect();
        let token = if window.len() > self.page_size {
            window.truncate(self.page_size);
            Some(Cursor::Offset(offset + self.page_size as u64).encode())
        } else {
            None
        };
        Page::new(window, token, item_etag)
    }
}

async fn lock_gate<'a>(
    op: &str,
    slot: &'a Slot,
    cancel: &CancelSignal,
) -> Result<tokio::sync::MutexGuard<'a, ()>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled(op)),
        guard = slot.write_gate.lock() => Ok(guard),
    }
}

/// If-Match check of a write against the live value
fn check_etag(
    op: &str,
    entry: &EntryKey,
    current: Option<&KeyValue>,
    expected_etag: Option<&str>,
) -> Result<()> {
    let Some(raw) = expected_etag else {
        return Ok(());
    };
    let condition = EtagMatch::Match(EtagCondition::parse(raw));
    if evaluate(&condition, current.map(|kv| kv.etag.as_str())).is_proceed() {
        Ok(())
    } else {
        Err(conflict(op, &entry.key, entry.label.as_deref()))
    }
}

fn apply_range(
    op: &str,
    options: &KeyValueSearchOptions,
    items: Vec<KeyValue>,
) -> Result<(Vec<KeyValue>, bool)> {
    match options.range {
        None => Ok((items, false)),
        Some(range) => {
            let (slice, stopped_short) = range.apply(&items).map_err(|e| domain(op, e))?;
            Ok((slice.to_vec(), stopped_short))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryJournal;
    use appconf_core::errors::ExErrorKind;
    use appconf_core::paging::Range;

    fn options(page_size: usize) -> SettingsOptions {
        SettingsOptions {
            output_page_size: page_size,
            ..SettingsOptions::default()
        }
    }

    async fn store(page_size: usize) -> KeyValueStore {
        KeyValueStore::open(&options(page_size), Arc::new(MemoryJournal::new()))
            .await
            .unwrap()
    }

    fn never() -> CancelSignal {
        CancelSignal::never()
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let store = store(10).await;
        let written = store
            .set(KeyValue::new("k1", Some("prod")).with_value("v"), None, &never())
            .await
            .unwrap();

        let read = store.get("k1", Some("prod"), &never()).await.unwrap().unwrap();
        assert_eq!(read.value.as_deref(), Some("v"));
        assert_eq!(read.etag, written.etag);
        assert!(!read.etag.is_empty());

        let rewritten = store
            .set(KeyValue::new("k1", Some("prod")).with_value("v"), None, &never())
            .await
            .unwrap();
        assert_ne!(rewritten.etag, written.etag);
    }

    #[tokio::test]
    async fn test_set_with_wildcard_requires_presence() {
        let store = store(10).await;
        let err = store
            .set(KeyValue::new("k1", None).with_value("v"), Some("*"), &never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Concurrency);
    }

    #[tokio::test]
    async fn test_failed_first_write_leaves_no_entry() {
        let store = store(10).await;
        let err = store
            .set(KeyValue::new("k1", None).with_value("v"), Some("etag"), &never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Concurrency);

        let source = appconf_core::CancelSource::new();
        source.cancel();
        let err = store
            .set(KeyValue::new("k2", None).with_value("v"), None, &source.signal())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Cancelled);

        assert!(store.slots.read().is_empty());
    }

    #[tokio::test]
    async fn test_locked_value_rejects_set_and_remove() {
        let store = store(10).await;
        let kv = store
            .set(KeyValue::new("k1", None).with_value("v"), None, &never())
            .await
            .unwrap();
        let locked = store.lock("k1", None, Some(kv.etag.as_str()), &never()).await.unwrap();
        assert!(locked.locked);
        assert_ne!(locked.etag, kv.etag);
        assert_eq!(locked.value.as_deref(), Some("v"));

        let err = store
            .set(KeyValue::new("k1", None).with_value("w"), None, &never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::KeyLocked);
        assert!(err.to_string().contains("key=k1,label="));

        let err = store.remove("k1", None, None, &never()).await.unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::KeyLocked);

        let unlocked = store.unlock("k1", None, None, &never()).await.unwrap();
        assert!(!unlocked.locked);
        store
            .set(KeyValue::new("k1", None).with_value("w"), Some(unlocked.etag.as_str()), &never())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_etag_is_checked_before_lock() {
        let store = store(10).await;
        let kv = store
            .set(KeyValue::new("k1", None).with_value("v"), None, &never())
            .await
            .unwrap();
        store.lock("k1", None, None, &never()).await.unwrap();

        let err = store
            .set(KeyValue::new("k1", None), Some(kv.etag.as_str()), &never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Concurrency);
    }

    #[tokio::test]
    async fn test_lock_absent_is_not_found() {
        let store = store(10).await;
        let err = store.lock("nope", None, None, &never()).await.unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_remove_returns_removed_value() {
        let store = store(10).await;
        store
            .set(KeyValue::new("k1", None).with_value("v"), None, &never())
            .await
            .unwrap();

        let removed = store.remove("k1", None, None, &never()).await.unwrap().unwrap();
        assert_eq!(removed.value.as_deref(), Some("v"));
        assert!(removed.is_deleted());
        assert!(store.get("k1", None, &never()).await.unwrap().is_none());
        assert!(store.remove("k1", None, None, &never()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_orders_and_pages_by_entry() {
        let store = store(2).await;
        for (key, label) in [("b", None), ("a", Some("prod")), ("a", None), ("c", None)] {
            store
                .set(KeyValue::new(key, label).with_value("v"), None, &never())
                .await
                .unwrap();
        }

        let first = store
            .query(&KeyValueSearchOptions::default(), &never())
            .await
            .unwrap();
        let entries: Vec<String> = first.items.iter().map(|kv| kv.entry_key().to_string()).collect();
        assert_eq!(entries, ["key=a,label=", "key=a,label=prod"]);
        assert!(!first.is_last());

        let second = store
            .query(
                &KeyValueSearchOptions::default().with_continuation(first.continuation_token.clone()),
                &never(),
            )
            .await
            .unwrap();
        let keys: Vec<&str> = second.items.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, ["b", "c"]);
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn test_query_filters_are_anded() {
        let store = store(10).await;
        store
            .set(
                KeyValue::new("app/color", Some("prod")).with_value("red").with_tag("team", Some("ui")),
                None,
                &never(),
            )
            .await
            .unwrap();
        store
            .set(KeyValue::new("app/size", Some("prod")).with_value("xl"), None, &never())
            .await
            .unwrap();
        store
            .set(KeyValue::new("db/host", Some("prod")).with_tag("team", Some("ui")), None, &never())
            .await
            .unwrap();

        let options = KeyValueSearchOptions::parse(Some("app/*"), Some("prod"), &["team=ui"]).unwrap();
        let page = store.query(&options, &never()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].key, "app/color");
    }

    #[tokio::test]
    async fn test_query_null_label_filter() {
        let store = store(10).await;
        store.set(KeyValue::new("k", None), None, &never()).await.unwrap();
        store.set(KeyValue::new("k", Some("x")), None, &never()).await.unwrap();

        let options = KeyValueSearchOptions::parse(None, Some("\0"), &[]).unwrap();
        let page = store.query(&options, &never()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].label, None);
    }

    #[tokio::test]
    async fn test_range_outside_results_is_not_satisfiable() {
        let store = store(10).await;
        store.set(KeyValue::new("k", None), None, &never()).await.unwrap();

        let options = KeyValueSearchOptions::default().with_range(Range::new(5, None));
        let err = store.query(&options, &never()).await.unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::RangeNotSatisfiable);
    }

    #[tokio::test]
    async fn test_snapshot_scoped_query_is_rejected() {
        let store = store(10).await;
        let err = store
            .query(&KeyValueSearchOptions::default().in_snapshot("s1"), &never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_time_gate_reads_past_state() {
        let t0 = now() - chrono::Duration::hours(2);
        let t1 = now() - chrono::Duration::hours(1);
        let old = KeyValue {
            etag: "old".into(),
            created: t0,
            ..KeyValue::new("k", None).with_value("before")
        };
        let gone = old.tombstone("gone".into(), t1);
        let journal = Arc::new(MemoryJournal::with_revisions(vec![old, gone]));
        let store = KeyValueStore::open(&options(10), journal).await.unwrap();

        assert!(store.get("k", None, &never()).await.unwrap().is_none());

        let gate = t0 + chrono::Duration::minutes(30);
        let page = store
            .query(&KeyValueSearchOptions::default().with_time_gate(gate), &never())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].value.as_deref(), Some("before"));
    }

    #[tokio::test]
    async fn test_keys_and_labels_are_distinct() {
        let store = store(10).await;
        for (key, label) in [("a", None), ("a", Some("x")), ("b", Some("x"))] {
            store.set(KeyValue::new(key, label), None, &never()).await.unwrap();
        }
        store.remove("b", Some("x"), None, &never()).await.unwrap();

        let keys = store
            .query_keys(&KeySearchOptions::default(), &never())
            .await
            .unwrap();
        assert_eq!(keys.items, ["a"]);

        let labels = store
            .query_labels(&LabelSearchOptions::default(), &never())
            .await
            .unwrap();
        assert_eq!(labels.items, [None, Some("x".to_string())]);
    }

    #[tokio::test]
    async fn test_revisions_newest_first_with_offset_paging() {
        let store = store(2).await;
        for value in ["1", "2", "3"] {
            store
                .set(KeyValue::new("k", None).with_value(value), None, &never())
                .await
                .unwrap();
        }

        let first = store
            .query_revisions(&KeyValueSearchOptions::default(), &never())
            .await
            .unwrap();
        let values: Vec<&str> = first.items.iter().filter_map(|kv| kv.value.as_deref()).collect();
        assert_eq!(values, ["3", "2"]);

        let second = store
            .query_revisions(
                &KeyValueSearchOptions::default().with_continuation(first.continuation_token.clone()),
                &never(),
            )
            .await
            .unwrap();
        assert_eq!(second.items[0].value.as_deref(), Some("1"));
        assert!(second.is_last());
    }

    #[tokio::test]
    async fn test_purgeable_revisions_respect_ttl() {
        let store = KeyValueStore::open(
            &SettingsOptions {
                revision_retention_secs: 60,
                ..SettingsOptions::default()
            },
            Arc::new(MemoryJournal::new()),
        )
        .await
        .unwrap();
        store.set(KeyValue::new("k", None).with_value("1"), None, &never()).await.unwrap();
        store.set(KeyValue::new("k", None).with_value("2"), None, &never()).await.unwrap();

        assert!(store.purgeable_revisions(now()).is_empty());

        let later = now() + chrono::Duration::seconds(61);
        let purgeable = store.purgeable_revisions(later);
        assert_eq!(purgeable.len(), 1);
        assert_eq!(purgeable[0].value.as_deref(), Some("1"));

        store.remove("k", None, None, &never()).await.unwrap();
        assert_eq!(store.purgeable_revisions(later).len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_key_fails_before_io() {
        let journal = Arc::new(MemoryJournal::new());
        let store = KeyValueStore::open(&options(10), journal.clone()).await.unwrap();
        let err = store.set(KeyValue::new("", None), None, &never()).await.unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
        assert!(journal.revisions().is_empty());
    }
}
