//! Parsed query descriptors handed to the store
//!
//! The transport layer fills these from request parameters; the store never
//! sees raw query strings.

use crate::errors::Result;
use crate::paging::Range;
use crate::query::{tag_filter::parse_tag_filters, StringFilter, TagFilter};
use chrono::{DateTime, Utc};

/// Which settings a key-value listing returns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValueSearchOptions {
    pub key: StringFilter,
    pub label: StringFilter,
    /// All must match
    pub tags: Vec<TagFilter>,
    pub range: Option<Range>,
    pub continuation_token: Option<String>,
    /// Answer from this snapshot's content instead of the live store
    pub snapshot_name: Option<String>,
    /// Return state as of this instant
    pub time_gate: Option<DateTime<Utc>>,
}

impl KeyValueSearchOptions {
    /// Build options from raw `key`, `label` and `tags` expressions
    ///
    /// # Errors
    ///
    /// `AppConfError::SearchQuery` for any malformed expression.
    pub fn parse(key: Option<&str>, label: Option<&str>, tags: &[&str]) -> Result<Self> {
        Ok(Self {
            key: StringFilter::parse("key", key.unwrap_or_default())?,
            label: StringFilter::parse("label", label.unwrap_or_default())?,
            tags: parse_tag_filters(tags.iter().copied())?,
            ..Self::default()
        })
    }

    pub fn with_continuation(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_time_gate(mut self, at: DateTime<Utc>) -> Self {
        self.time_gate = Some(at);
        self
    }

    pub fn in_snapshot(mut self, name: impl Into<String>) -> Self {
        self.snapshot_name = Some(name.into());
        self
    }
}

/// Distinct key listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeySearchOptions {
    pub name: StringFilter,
    pub continuation_token: Option<String>,
    pub time_gate: Option<DateTime<Utc>>,
}

/// Distinct label listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSearchOptions {
    pub name: StringFilter,
    pub continuation_token: Option<String>,
    pub time_gate: Option<DateTime<Utc>>,
}
