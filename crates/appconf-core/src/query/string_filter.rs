//! Key and label match expressions

use super::escape::{split_unescaped, unescape, ESCAPE_CHAR, LIST_SEPARATOR, NULL_MARKER, WILDCARD};
use crate::errors::{AppConfError, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on comma separated alternatives in one expression
pub const MAX_LIST_ITEMS: usize = 5;

/// Predicate over a nullable string (a key or a label)
///
/// At most one criterion is set. An all-empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringFilter {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_null: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_of: Option<Vec<Option<String>>>,
}

impl StringFilter {
    /// Filter matching every value
    pub fn any() -> Self {
        Self::default()
    }

    pub fn null() -> Self {
        Self {
            is_null: true,
            ..Self::default()
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            equals_to: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn starts_with(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    /// Exact match on a nullable value; `None` selects null
    pub fn exact_or_null(value: Option<&str>) -> Self {
        match value {
            Some(v) => Self::exact(v),
            None => Self::null(),
        }
    }

    /// Parse a search expression
    ///
    /// - empty, or starting with `*`: match anything
    /// - `"\0"`: match null
    /// - unescaped `,`: any of up to [`MAX_LIST_ITEMS`] values (`\0` items mean null)
    /// - trailing unescaped `*`: prefix match
    /// - anything else: exact match on the unescaped text
    ///
    /// # Errors
    ///
    /// `AppConfError::SearchQuery` for unescaped reserved characters or too
    /// many list items; `param` names the query parameter in the message.
    pub fn parse(param: &str, expr: &str) -> Result<Self> {
        if expr.is_empty() || expr.starts_with(WILDCARD) {
            return Ok(Self::any());
        }
        if expr == NULL_MARKER {
            return Ok(Self::null());
        }

        let chars: Vec<char> = expr.chars().collect();

        let segments = split_unescaped(&chars, LIST_SEPARATOR);
        if segments.len() > 1 {
            if segments.len() > MAX_LIST_ITEMS {
                return Err(AppConfError::SearchQuery {
                    param: param.to_string(),
                    message: format!(
                        "Too many values. Maximum supported is {}",
                        MAX_LIST_ITEMS
                    ),
                    position: segments[MAX_LIST_ITEMS].offset,
                });
            }
            let values = segments
                .iter()
                .map(|s| {
                    if s.is_null_marker() {
                        Ok(None)
                    } else {
                        unescape(param, s.chars, s.offset).map(Some)
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(Self {
                any_of: Some(values),
                ..Self::default()
            });
        }

        let last = chars.len() - 1;
        if chars[last] == WILDCARD && !trailing_escape_run_is_odd(&chars[..last]) {
            let prefix = unescape(param, &chars[..last], 0)?;
            if !prefix.is_empty() {
                return Ok(Self::starts_with(prefix));
            }
        }

        Ok(Self::exact(unescape(param, &chars, 0)?))
    }

    pub fn is_any(&self) -> bool {
        !self.is_null && self.equals_to.is_none() && self.prefix.is_none() && self.any_of.is_none()
    }

    /// Whether at most one value can match (exact or null)
    pub fn is_single_value(&self) -> bool {
        self.is_null || self.equals_to.is_some()
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        if self.is_null {
            return value.is_none();
        }
        if let Some(expected) = &self.equals_to {
            return value == Some(expected.as_str());
        }
        if let Some(prefix) = &self.prefix {
            return value.is_some_and(|v| v.starts_with(prefix.as_str()));
        }
        if let Some(values) = &self.any_of {
            return values.iter().any(|candidate| candidate.as_deref() == value);
        }
        true
    }
}

fn trailing_escape_run_is_odd(chars: &[char]) -> bool {
    chars.iter().rev().take_while(|c| **c == ESCAPE_CHAR).count() % 2 == 1
}
