//! `name=value` tag filters

use super::escape::{split_unescaped, unescape};
use crate::errors::{AppConfError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Query parameter name reported in tag filter errors
pub const TAGS_PARAM: &str = "tags";

/// Requires tag `name` to be present with exactly `value` (`None` = null value)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    pub name: String,
    pub value: Option<String>,
}

impl TagFilter {
    pub fn new(name: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value: value.map(str::to_string),
        }
    }

    pub fn matches(&self, tags: &BTreeMap<String, Option<String>>) -> bool {
        tags.get(&self.name)
            .is_some_and(|actual| actual.as_deref() == self.value.as_deref())
    }
}

/// Parse one tag filter expression
///
/// The expression splits on the first unescaped `=`; `\=` is a literal
/// equals sign inside the name or value. A value of `"\0"` selects tags whose
/// value is null.
///
/// # Errors
///
/// `AppConfError::SearchQuery` carrying the `tags` parameter and the
/// character offset when the expression is blank, has no separator, has an
/// empty or null name, has a second separator, or contains an unescaped
/// reserved character.
pub fn parse_tag_filter(expr: &str) -> Result<TagFilter> {
    if expr.trim().is_empty() {
        return Err(tag_error("Invalid tag filter", 0));
    }

    let chars: Vec<char> = expr.chars().collect();
    let segments = split_unescaped(&chars, '=');

    match segments.as_slice() {
        [_] => Err(tag_error("Invalid tag filter", chars.len())),
        [name, value] => {
            if name.is_null_marker() || name.is_blank() {
                return Err(tag_error(
                    "Invalid tag filter with null or empty tag name.",
                    name.offset,
                ));
            }
            let name_text = unescape(TAGS_PARAM, name.chars, name.offset)?;
            let value_text = if value.is_null_marker() {
                None
            } else {
                Some(unescape(TAGS_PARAM, value.chars, value.offset)?)
            };
            Ok(TagFilter {
                name: name_text,
                value: value_text,
            })
        }
        [_, _, third, ..] => Err(tag_error(
            "Invalid tag filter with multiple '=' separators.",
            third.offset - 1,
        )),
        [] => Err(tag_error("Invalid tag filter", 0)),
    }
}

/// Parse every filter, failing on the first malformed one
///
/// # Errors
///
/// See [`parse_tag_filter`].
pub fn parse_tag_filters<'a>(exprs: impl IntoIterator<Item = &'a str>) -> Result<Vec<TagFilter>> {
    exprs.into_iter().map(parse_tag_filter).collect()
}

/// Whether every filter matches the tag map
pub fn match_all(filters: &[TagFilter], tags: &BTreeMap<String, Option<String>>) -> bool {
    filters.iter().all(|f| f.matches(tags))
}

fn tag_error(message: &str, position: usize) -> AppConfError {
    AppConfError::SearchQuery {
        param: TAGS_PARAM.to_string(),
        message: message.to_string(),
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_pair() {
        assert_eq!(
            parse_tag_filter("env=prod").unwrap(),
            TagFilter::new("env", Some("prod"))
        );
    }

    #[test]
    fn test_escaped_separator_in_name() {
        assert_eq!(
            parse_tag_filter(r"a\=b=c").unwrap(),
            TagFilter::new("a=b", Some("c"))
        );
    }

    #[test]
    fn test_null_value() {
        assert_eq!(parse_tag_filter("x=\0").unwrap(), TagFilter::new("x", None));
    }

    #[test]
    fn test_empty_value_is_not_null() {
        assert_eq!(parse_tag_filter("x=").unwrap(), TagFilter::new("x", Some("")));
    }

    #[test]
    fn test_failures_are_positioned() {
        let cases = [
            ("=x", 0),
            ("a=b=c", 3),
            ("abc", 3),
            ("\0=v", 0),
            ("  =v", 0),
            ("ab=c*d", 4),
        ];
        for (expr, expected) in cases {
            match parse_tag_filter(expr) {
                Err(AppConfError::SearchQuery {
                    param, position, ..
                }) => {
                    assert_eq!(param, "tags");
                    assert_eq!(position, expected, "wrong position for {expr:?}");
                }
                other => panic!("expected failure for {expr:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_blank_is_rejected() {
        assert!(parse_tag_filter("   ").is_err());
    }

    #[test]
    fn test_match_requires_equal_value() {
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), Some("prod".to_string()));
        tags.insert("owner".to_string(), None);

        assert!(TagFilter::new("env", Some("prod")).matches(&tags));
        assert!(!TagFilter::new("env", Some("dev")).matches(&tags));
        assert!(TagFilter::new("owner", None).matches(&tags));
        assert!(!TagFilter::new("missing", None).matches(&tags));
        assert!(match_all(
            &[TagFilter::new("env", Some("prod")), TagFilter::new("owner", None)],
            &tags
        ));
    }
}
