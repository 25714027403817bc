//! Snapshot records and their lifecycle
//!
//! ```text
//! Provisioning --success--> Ready
//! Provisioning --error----> Failed
//! Ready        --archive--> Archived
//! Archived     --recover--> Ready
//! ```

use crate::errors::{AppConfError, Result};
use crate::query::StringFilter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Provisioning,
    Ready,
    Archived,
    Failed,
}

impl SnapshotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Archived => "archived",
            Self::Failed => "failed",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SnapshotStatus) -> bool {
        matches!(
            (self, next),
            (Self::Provisioning, Self::Ready)
                | (Self::Provisioning, Self::Failed)
                | (Self::Ready, Self::Archived)
                | (Self::Archived, Self::Ready)
        )
    }

    /// Whether content may be read
    pub fn has_content(self) -> bool {
        matches!(self, Self::Ready | Self::Archived)
    }

    fn bit(self) -> u8 {
        match self {
            Self::Provisioning => 1,
            Self::Ready => 2,
            Self::Archived => 4,
            Self::Failed => 8,
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SnapshotStatus {
    type Err = AppConfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provisioning" => Ok(Self::Provisioning),
            "ready" => Ok(Self::Ready),
            "archived" => Ok(Self::Archived),
            "failed" => Ok(Self::Failed),
            other => Err(AppConfError::InvalidInput {
                field: "status".to_string(),
                reason: format!("unknown snapshot status '{}'", other),
            }),
        }
    }
}

/// Set of statuses a listing accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFilter(u8);

impl StatusFilter {
    pub const NONE: StatusFilter = StatusFilter(0);
    pub const ALL: StatusFilter = StatusFilter(0xF);

    pub fn only(status: SnapshotStatus) -> Self {
        Self(status.bit())
    }

    pub fn with(self, status: SnapshotStatus) -> Self {
        Self(self.0 | status.bit())
    }

    pub fn contains(self, status: SnapshotStatus) -> bool {
        self.0 & status.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse a comma separated status list; blank selects all
    ///
    /// # Errors
    ///
    /// `AppConfError::InvalidInput` for an unknown status name.
    pub fn parse(list: &str) -> Result<Self> {
        let mut filter = Self::NONE;
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            filter = filter.with(name.parse()?);
        }
        Ok(if filter.is_empty() { Self::ALL } else { filter })
    }
}

impl Default for StatusFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// How composed settings are de-duplicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionType {
    /// One setting per key; labels are a selection dimension only
    #[default]
    Key,
    /// One setting per key and label
    KeyLabel,
}

impl CompositionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::KeyLabel => "key_label",
        }
    }
}

impl std::str::FromStr for CompositionType {
    type Err = AppConfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "key" => Ok(Self::Key),
            "key_label" => Ok(Self::KeyLabel),
            other => Err(AppConfError::InvalidInput {
                field: "composition_type".to_string(),
                reason: format!("unknown composition type '{}'", other),
            }),
        }
    }
}

/// One membership predicate of a snapshot
///
/// `key` and `label` are search expressions; `tags` are `name=value` tag
/// filter expressions. A missing label selects the null label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFilter {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl SnapshotFilter {
    pub fn new(key: impl Into<String>, label: Option<&str>) -> Self {
        Self {
            key: key.into(),
            label: label.map(str::to_string),
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, expr: impl Into<String>) -> Self {
        self.tags.push(expr.into());
        self
    }
}

/// Provisioned content blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub category: String,
    pub name: String,
    pub size: u64,
    pub etag: String,
    pub content_type: String,
    /// base64url SHA-256 of the whole file
    pub sha256: String,
}

/// A named point-in-time export and its lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub etag: String,
    pub status: SnapshotStatus,
    pub status_code: u16,
    /// Diagnostic recorded when provisioning fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub filters: Vec<SnapshotFilter>,
    pub composition_type: CompositionType,
    pub retention_period_seconds: u64,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    pub items_count: u64,
    pub size_bytes: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaInfo>,
}

/// Request to create a snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSnapshot {
    pub name: String,
    pub filters: Vec<SnapshotFilter>,
    pub composition_type: CompositionType,
    /// Seconds; the configured default applies when absent
    pub retention_period_seconds: Option<u64>,
    pub tags: BTreeMap<String, Option<String>>,
}

impl NewSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: SnapshotFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_composition(mut self, composition_type: CompositionType) -> Self {
        self.composition_type = composition_type;
        self
    }

    pub fn with_retention(mut self, seconds: u64) -> Self {
        self.retention_period_seconds = Some(seconds);
        self
    }
}

/// Snapshot listing descriptor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotSearchOptions {
    pub name: StringFilter,
    pub status: StatusFilter,
    pub continuation_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use SnapshotStatus::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(Provisioning.can_transition_to(Ready));
        assert!(Provisioning.can_transition_to(Failed));
        assert!(Ready.can_transition_to(Archived));
        assert!(Archived.can_transition_to(Ready));

        assert!(!Failed.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Provisioning));
        assert!(!Archived.can_transition_to(Provisioning));
        assert!(!Ready.can_transition_to(Failed));
    }

    #[test]
    fn test_status_filter() {
        let filter = StatusFilter::parse("ready, archived").unwrap();
        assert!(filter.contains(Ready));
        assert!(filter.contains(Archived));
        assert!(!filter.contains(Failed));
        assert_eq!(StatusFilter::parse("").unwrap(), StatusFilter::ALL);
        assert!(StatusFilter::parse("bogus").is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Provisioning).unwrap(), "\"provisioning\"");
        assert_eq!(
            serde_json::to_string(&CompositionType::KeyLabel).unwrap(),
            "\"key_label\""
        );
    }
}
