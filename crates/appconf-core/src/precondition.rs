//! Conditional request evaluation (If-Match / If-None-Match)
//!
//! Pure function of the request's match mode and the resource's current
//! etag. Callers pass `None` for a missing or soft-deleted resource.

use crate::errors::{ExError, ExErrorKind};

/// The `*` token
pub const WILDCARD_ETAG: &str = "*";

/// Etag the request is conditioned on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtagCondition {
    /// `*`: any existing version
    Any,
    Etag(String),
}

impl EtagCondition {
    /// Parse a header value, unquoting `"etag"` forms
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == WILDCARD_ETAG {
            return Self::Any;
        }
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed);
        Self::Etag(unquoted.to_string())
    }

    fn matches(&self, current: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Etag(expected) => expected == current,
        }
    }
}

/// Match semantics of a request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EtagMatch {
    #[default]
    Ignore,
    /// If-Match
    Match(EtagCondition),
    /// If-None-Match
    NoneMatch(EtagCondition),
}

/// Result of evaluating a precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Proceed,
    /// HTTP 412
    Failed,
    /// HTTP 304
    NotModified,
}

impl Precondition {
    pub fn is_proceed(self) -> bool {
        self == Self::Proceed
    }

    /// Short-circuit outcomes as errors so callers can use `?`
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` or `NotModified` unless the outcome is `Proceed`.
    pub fn into_result(self, op: &str) -> Result<(), ExError> {
        match self {
            Self::Proceed => Ok(()),
            Self::Failed => Err(ExError::new(ExErrorKind::PreconditionFailed)
                .with_op(op)
                .with_message("Precondition failed")),
            Self::NotModified => Err(ExError::new(ExErrorKind::NotModified)
                .with_op(op)
                .with_message("Not modified")),
        }
    }
}

/// Evaluate `condition` against the resource's current etag
pub fn evaluate(condition: &EtagMatch, current: Option<&str>) -> Precondition {
    match (condition, current) {
        (EtagMatch::Ignore, _) => Precondition::Proceed,
        (EtagMatch::Match(_), None) => Precondition::Failed,
        (EtagMatch::Match(expected), Some(etag)) if !expected.matches(etag) => {
            Precondition::Failed
        }
        (EtagMatch::NoneMatch(expected), Some(etag)) if expected.matches(etag) => {
            Precondition::NotModified
        }
        _ => Precondition::Proceed,
    }
}
