//! NDJSON record formats
//!
//! Settings, snapshot metadata and snapshot content are stored one JSON
//! object per line. Timestamps are unix seconds and null fields are omitted.

use crate::errors::{serialization, Result};
use appconf_core::errors::{ExError, ExErrorKind};
use appconf_core::etag::key_value_id;
use appconf_core::model::{
    CompositionType, KeyValue, MediaInfo, Snapshot, SnapshotFilter, SnapshotStatus, Tags,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Separator between records
pub const RECORD_DELIMITER: &[u8] = b"\n";

/// On-disk form of one setting revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvRecord {
    pub etag: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "is_false")]
    pub locked: bool,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<i64>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub rev_ttl: u64,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl From<&KeyValue> for KvRecord {
    fn from(kv: &KeyValue) -> Self {
        Self {
            etag: kv.etag.clone(),
            key: kv.key.clone(),
            label: kv.label.clone(),
            content_type: kv.content_type.clone(),
            value: kv.value.clone(),
            tags: kv.tags.clone(),
            locked: kv.locked,
            ts: kv.created.timestamp(),
            deleted: kv.deleted.map(|d| d.timestamp()),
            rev_ttl: kv.revision_ttl.as_secs(),
        }
    }
}

impl KvRecord {
    /// # Errors
    ///
    /// `ExErrorKind::Serialization` when a timestamp is out of range.
    pub fn into_key_value(self) -> Result<KeyValue> {
        let label = self.label.filter(|l| !l.is_empty());
        Ok(KeyValue {
            id: key_value_id(&self.key, label.as_deref()),
            etag: self.etag,
            key: self.key,
            label,
            content_type: self.content_type,
            value: self.value,
            tags: self.tags,
            created: from_unix(self.ts)?,
            locked: self.locked,
            deleted: self.deleted.map(from_unix).transpose()?,
            revision_ttl: Duration::from_secs(self.rev_ttl),
        })
    }
}

/// On-disk form of a snapshot's metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub name: String,
    pub etag: String,
    pub status: SnapshotStatus,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub composition_type: CompositionType,
    pub retention_period_seconds: u64,
    pub created: i64,
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    pub items_count: u64,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    pub filters: Vec<SnapshotFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,
}

impl From<&Snapshot> for SnapshotRecord {
    fn from(s: &Snapshot) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            etag: s.etag.clone(),
            status: s.status,
            status_code: s.status_code,
            status_message: s.status_message.clone(),
            composition_type: s.composition_type,
            retention_period_seconds: s.retention_period_seconds,
            created: s.created.timestamp(),
            last_modified: s.last_modified.timestamp(),
            expires: s.expires.map(|e| e.timestamp()),
            items_count: s.items_count,
            size_bytes: s.size_bytes,
            tags: s.tags.clone(),
            filters: s.filters.clone(),
            media: s.media.clone(),
        }
    }
}

impl SnapshotRecord {
    /// # Errors
    ///
    /// `ExErrorKind::Serialization` when a timestamp is out of range.
    pub fn into_snapshot(self) -> Result<Snapshot> {
        Ok(Snapshot {
            id: self.id,
            name: self.name,
            etag: self.etag,
            status: self.status,
            status_code: self.status_code,
            status_message: self.status_message,
            filters: self.filters,
            composition_type: self.composition_type,
            retention_period_seconds: self.retention_period_seconds,
            created: from_unix(self.created)?,
            last_modified: from_unix(self.last_modified)?,
            expires: self.expires.map(from_unix).transpose()?,
            items_count: self.items_count,
            size_bytes: self.size_bytes,
            tags: self.tags,
            media: self.media,
        })
    }
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        ExError::new(ExErrorKind::Serialization)
            .with_op("decode_record")
            .with_message(format!("Timestamp out of range: {}", secs))
    })
}

/// # Errors
///
/// `ExErrorKind::Serialization` if the setting cannot be encoded.
pub fn encode_key_value(kv: &KeyValue) -> Result<Vec<u8>> {
    serde_json::to_vec(&KvRecord::from(kv)).map_err(|e| serialization("encode_key_value", e))
}

/// # Errors
///
/// `ExErrorKind::Serialization` for malformed JSON or timestamps.
pub fn decode_key_value(line: &str) -> Result<KeyValue> {
    serde_json::from_str::<KvRecord>(line)
        .map_err(|e| serialization("decode_key_value", e))?
        .into_key_value()
}

/// # Errors
///
/// `ExErrorKind::Serialization` if the snapshot cannot be encoded.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>> {
    serde_json::to_vec(&SnapshotRecord::from(snapshot))
        .map_err(|e| serialization("encode_snapshot", e))
}

/// # Errors
///
/// `ExErrorKind::Serialization` for malformed JSON or timestamps.
pub fn decode_snapshot(line: &str) -> Result<Snapshot> {
    serde_json::from_str::<SnapshotRecord>(line)
        .map_err(|e| serialization("decode_snapshot", e))?
        .into_snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use appconf_core::model::now;

    #[test]
    fn test_null_fields_are_omitted() {
        let kv = KeyValue {
            etag: "e1".into(),
            ..KeyValue::new("k1", None)
        };
        let json: serde_json::Value =
            serde_json::from_slice(&encode_key_value(&kv).unwrap()).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.get("key").and_then(|v| v.as_str()), Some("k1"));
        for absent in ["label", "value", "content_type", "tags", "locked", "deleted", "rev_ttl"] {
            assert!(!obj.contains_key(absent), "{} should be omitted", absent);
        }
        assert_eq!(
            obj.get("ts").and_then(|v| v.as_i64()),
            Some(kv.created.timestamp())
        );
    }

    #[test]
    fn test_tombstone_and_ttl_survive_decode() {
        let at = now();
        let mut kv = KeyValue::new("k1", Some("prod"))
            .with_value("v")
            .with_tag("env", None);
        kv.revision_ttl = Duration::from_secs(60);
        let tomb = kv.tombstone("e2".into(), at);

        let line = String::from_utf8(encode_key_value(&tomb).unwrap()).unwrap();
        let back = decode_key_value(&line).unwrap();

        assert_eq!(back, tomb);
        assert!(line.contains("\"rev_ttl\":60"));
    }

    #[test]
    fn test_legacy_line_without_optional_fields() {
        let kv = decode_key_value(r#"{"etag":"x","key":"a","label":"","ts":1700000000}"#).unwrap();
        assert_eq!(kv.label, None);
        assert!(!kv.locked);
        assert_eq!(kv.id, key_value_id("a", None));
    }

    #[test]
    fn test_snapshot_status_is_lowercase() {
        let t = now();
        let snapshot = Snapshot {
            id: "id".into(),
            name: "s1".into(),
            etag: "e".into(),
            status: SnapshotStatus::Provisioning,
            status_code: 202,
            status_message: None,
            filters: vec![SnapshotFilter::new("app/*", None)],
            composition_type: CompositionType::KeyLabel,
            retention_period_seconds: 3600,
            created: t,
            last_modified: t,
            expires: None,
            items_count: 0,
            size_bytes: 0,
            tags: Tags::new(),
            media: None,
        };
        let line = String::from_utf8(encode_snapshot(&snapshot).unwrap()).unwrap();
        assert!(line.contains("\"status\":\"provisioning\""));
        assert!(line.contains("\"composition_type\":\"key_label\""));
        assert_eq!(decode_snapshot(&line).unwrap(), snapshot);
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let err = decode_key_value("{not json").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Serialization);
    }
}
