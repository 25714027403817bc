//! Input validation driven by rule tables
//!
//! Each validated type lists `(field, accessor, checks)` rows; one generic
//! routine evaluates them. Validation runs before any I/O.

use crate::errors::{AppConfError, Result};
use crate::model::{CompositionType, KeyValue, NewSnapshot, Tags};
use crate::query::{contains_wildcard, is_list_search, tag_filter::parse_tag_filter, NULL_MARKER};

pub const MAX_KEY_LENGTH: usize = 256;
pub const MAX_LABEL_LENGTH: usize = 256;
pub const MAX_TAG_NAME_LENGTH: usize = 256;
pub const MAX_TAG_VALUE_LENGTH: usize = 256;
pub const MAX_NAME_LENGTH: usize = 256;
/// `name=value` at maximum name and value length
pub const MAX_TAG_FILTER_LENGTH: usize = MAX_TAG_NAME_LENGTH + MAX_TAG_VALUE_LENGTH + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Present and non-empty
    Required,
    /// At most this many characters
    MaxLength(usize),
    NoControlChars,
}

impl Check {
    fn apply(self, field: &str, value: Option<&str>) -> Result<()> {
        let fail = |reason: String| {
            Err(AppConfError::InvalidInput {
                field: field.to_string(),
                reason,
            })
        };
        match (self, value) {
            (Check::Required, None) => fail("is required".to_string()),
            (Check::Required, Some(v)) if v.is_empty() => fail("is required".to_string()),
            (Check::MaxLength(max), Some(v)) if v.chars().count() > max => {
                fail(format!("exceeds {} characters", max))
            }
            (Check::NoControlChars, Some(v)) if v.chars().any(char::is_control) => {
                fail("contains control characters".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// One row of a rule table
pub struct Rule<T: ?Sized> {
    pub field: &'static str,
    pub value: fn(&T) -> Option<&str>,
    pub checks: &'static [Check],
}

/// Evaluate every row, failing on the first violated check
///
/// # Errors
///
/// `AppConfError::InvalidInput` naming the offending field.
pub fn validate<T: ?Sized>(target: &T, rules: &[Rule<T>]) -> Result<()> {
    for rule in rules {
        let value = (rule.value)(target);
        for check in rule.checks {
            check.apply(rule.field, value)?;
        }
    }
    Ok(())
}

const KEY_CHECKS: &[Check] = &[
    Check::Required,
    Check::MaxLength(MAX_KEY_LENGTH),
    Check::NoControlChars,
];
const LABEL_CHECKS: &[Check] = &[Check::MaxLength(MAX_LABEL_LENGTH), Check::NoControlChars];

fn kv_key(kv: &KeyValue) -> Option<&str> {
    Some(&kv.key)
}

fn kv_label(kv: &KeyValue) -> Option<&str> {
    kv.label.as_deref()
}

/// Rules for a setting written through `Set`
pub const KEY_VALUE_RULES: &[Rule<KeyValue>] = &[
    Rule {
        field: "key",
        value: kv_key,
        checks: KEY_CHECKS,
    },
    Rule {
        field: "label",
        value: kv_label,
        checks: LABEL_CHECKS,
    },
];

fn snapshot_name(req: &NewSnapshot) -> Option<&str> {
    Some(&req.name)
}

/// Rules for the scalar fields of a snapshot request
pub const NEW_SNAPSHOT_RULES: &[Rule<NewSnapshot>] = &[Rule {
    field: "name",
    value: snapshot_name,
    checks: &[
        Check::Required,
        Check::MaxLength(MAX_NAME_LENGTH),
        Check::NoControlChars,
    ],
}];

/// Configured bounds for snapshot requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotLimits {
    pub min_filter_count: usize,
    pub max_filter_count: usize,
    pub min_retention_secs: u64,
    pub max_retention_secs: u64,
}

/// Validate a setting before it is written
///
/// # Errors
///
/// `AppConfError::InvalidInput` naming the offending field.
pub fn validate_key_value(kv: &KeyValue) -> Result<()> {
    validate(kv, KEY_VALUE_RULES)?;
    validate_tags("tags", &kv.tags)
}

/// Validate a snapshot request against configured limits
///
/// # Errors
///
/// `AppConfError::InvalidInput` naming the offending field, or
/// `AppConfError::SearchQuery` for a malformed filter expression.
pub fn validate_new_snapshot(req: &NewSnapshot, limits: &SnapshotLimits) -> Result<()> {
    validate(req, NEW_SNAPSHOT_RULES)?;

    let count = req.filters.len();
    if count < limits.min_filter_count || count > limits.max_filter_count {
        return Err(AppConfError::InvalidInput {
            field: "filters".to_string(),
            reason: format!(
                "expected between {} and {} filters, got {}",
                limits.min_filter_count, limits.max_filter_count, count
            ),
        });
    }

    for (index, filter) in req.filters.iter().enumerate() {
        let key_field = format!("filters[{}].key", index);
        for check in KEY_CHECKS {
            check.apply(&key_field, Some(&filter.key))?;
        }

        let label = filter.label.as_deref().filter(|l| *l != NULL_MARKER);
        let label_field = format!("filters[{}].label", index);
        for check in LABEL_CHECKS {
            check.apply(&label_field, label)?;
        }
        if req.composition_type == CompositionType::Key
            && label.is_some_and(|l| contains_wildcard(l) || is_list_search(l))
        {
            return Err(AppConfError::InvalidInput {
                field: label_field,
                reason: "must be an exact label for key composition".to_string(),
            });
        }

        for expr in &filter.tags {
            Check::MaxLength(MAX_TAG_FILTER_LENGTH).apply(&format!("filters[{}].tags", index), Some(expr))?;
            parse_tag_filter(expr)?;
        }
    }

    validate_tags("tags", &req.tags)?;

    if let Some(retention) = req.retention_period_seconds {
        if retention < limits.min_retention_secs || retention > limits.max_retention_secs {
            return Err(AppConfError::InvalidInput {
                field: "retention_period".to_string(),
                reason: format!(
                    "must be between {} and {} seconds",
                    limits.min_retention_secs, limits.max_retention_secs
                ),
            });
        }
    }
    Ok(())
}

fn validate_tags(field: &str, tags: &Tags) -> Result<()> {
    for (name, value) in tags {
        let name_field = format!("{}[{}].key", field, name);
        for check in [
            Check::Required,
            Check::MaxLength(MAX_TAG_NAME_LENGTH),
            Check::NoControlChars,
        ] {
            check.apply(&name_field, Some(name))?;
        }
        let value_field = format!("{}[{}].value", field, name);
        for check in [Check::MaxLength(MAX_TAG_VALUE_LENGTH), Check::NoControlChars] {
            check.apply(&value_field, value.as_deref())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SnapshotFilter;

    const LIMITS: SnapshotLimits = SnapshotLimits {
        min_filter_count: 1,
        max_filter_count: 3,
        min_retention_secs: 3600,
        max_retention_secs: 7 * 24 * 3600,
    };

    fn field_of(err: AppConfError) -> String {
        match err {
            AppConfError::InvalidInput { field, .. } => field,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_key_required() {
        let err = validate_key_value(&KeyValue::new("", None)).unwrap_err();
        assert_eq!(field_of(err), "key");
    }

    #[test]
    fn test_key_length_and_control_chars() {
        let long = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(validate_key_value(&KeyValue::new(long, None)).is_err());
        assert!(validate_key_value(&KeyValue::new("a\u{7}b", None)).is_err());
        assert!(validate_key_value(&KeyValue::new("k".repeat(MAX_KEY_LENGTH), None)).is_ok());
    }

    #[test]
    fn test_tag_value_too_long() {
        let kv = KeyValue::new("k", None).with_tag("t", Some(&"v".repeat(300)));
        assert_eq!(field_of(validate_key_value(&kv).unwrap_err()), "tags[t].value");
    }

    #[test]
    fn test_snapshot_filter_count() {
        let req = NewSnapshot::new("s");
        assert_eq!(field_of(validate_new_snapshot(&req, &LIMITS).unwrap_err()), "filters");

        let req = (0..4).fold(NewSnapshot::new("s"), |r, i| {
            r.with_filter(SnapshotFilter::new(format!("k{i}"), None))
        });
        assert!(validate_new_snapshot(&req, &LIMITS).is_err());
    }

    #[test]
    fn test_key_composition_rejects_label_patterns() {
        let req = NewSnapshot::new("s").with_filter(SnapshotFilter::new("app/*", Some("prod*")));
        assert_eq!(
            field_of(validate_new_snapshot(&req, &LIMITS).unwrap_err()),
            "filters[0].label"
        );

        let req = req.with_composition(CompositionType::KeyLabel);
        assert!(validate_new_snapshot(&req, &LIMITS).is_ok());
    }

    #[test]
    fn test_snapshot_retention_bounds() {
        let req = NewSnapshot::new("s")
            .with_filter(SnapshotFilter::new("*", None))
            .with_retention(60);
        assert_eq!(
            field_of(validate_new_snapshot(&req, &LIMITS).unwrap_err()),
            "retention_period"
        );
    }

    #[test]
    fn test_snapshot_tag_filter_must_parse() {
        let req = NewSnapshot::new("s")
            .with_filter(SnapshotFilter::new("*", None).with_tag("a=b=c"));
        assert!(matches!(
            validate_new_snapshot(&req, &LIMITS),
            Err(AppConfError::SearchQuery { .. })
        ));
    }
}
