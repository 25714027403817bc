//! Configuration settings

use crate::etag::key_value_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Tag map; a tag may carry a null value
pub type Tags = BTreeMap<String, Option<String>>;

/// Natural key of a setting, ordered by key then label (null label first)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub key: String,
    pub label: Option<String>,
}

impl EntryKey {
    pub fn new(key: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            key: key.into(),
            label: normalize_label(label),
        }
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key={},label={}", self.key, self.label.as_deref().unwrap_or_default())
    }
}

/// One revision of a configuration setting
///
/// The store assigns `etag` and `created` on every mutation. A revision with
/// `deleted` set is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub id: String,
    pub etag: String,
    pub key: String,
    pub label: Option<String>,
    pub content_type: Option<String>,
    pub value: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(rename = "last_modified")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub revision_ttl: Duration,
}

impl KeyValue {
    /// Draft setting for `Set`; an empty label is the null label
    pub fn new(key: impl Into<String>, label: Option<&str>) -> Self {
        let key = key.into();
        let label = normalize_label(label);
        Self {
            id: key_value_id(&key, label.as_deref()),
            etag: String::new(),
            key,
            label,
            content_type: None,
            value: None,
            tags: Tags::new(),
            created: super::now(),
            locked: false,
            deleted: None,
            revision_ttl: Duration::ZERO,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.tags.insert(name.into(), value.map(str::to_string));
        self
    }

    pub fn entry_key(&self) -> EntryKey {
        EntryKey {
            key: self.key.clone(),
            label: self.label.clone(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// Tombstone revision recording the removal of this value
    pub fn tombstone(&self, etag: String, at: DateTime<Utc>) -> Self {
        Self {
            id: self.id.clone(),
            etag,
            key: self.key.clone(),
            label: self.label.clone(),
            content_type: None,
            value: None,
            tags: Tags::new(),
            created: at,
            locked: false,
            deleted: Some(at),
            revision_ttl: self.revision_ttl,
        }
    }
}

fn normalize_label(label: Option<&str>) -> Option<String> {
    label.filter(|l| !l.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_key_orders_null_label_first() {
        let mut keys = vec![
            EntryKey::new("b", None),
            EntryKey::new("a", Some("prod")),
            EntryKey::new("a", None),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                EntryKey::new("a", None),
                EntryKey::new("a", Some("prod")),
                EntryKey::new("b", None),
            ]
        );
    }

    #[test]
    fn test_empty_label_is_null() {
        let kv = KeyValue::new("k", Some(""));
        assert_eq!(kv.label, None);
        assert_eq!(kv.id, KeyValue::new("k", None).id);
    }

    #[test]
    fn test_tombstone_keeps_identity() {
        let kv = KeyValue::new("k", Some("l")).with_value("v").with_tag("t", None);
        let at = crate::model::now();
        let tomb = kv.tombstone("e2".into(), at);
        assert!(tomb.is_deleted());
        assert_eq!(tomb.entry_key(), kv.entry_key());
        assert_eq!(tomb.value, None);
        assert_eq!(tomb.deleted, Some(at));
    }

    #[test]
    fn test_display_of_entry_key() {
        assert_eq!(EntryKey::new("k", None).to_string(), "key=k,label=");
    }
}
