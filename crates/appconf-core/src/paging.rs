//! Range slicing, result pages and continuation tokens

use crate::errors::{AppConfError, Result};
use crate::etag::page_etag;
use crate::model::EntryKey;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Item indices `[from, to)`; `to = None` is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    pub from: usize,
    pub to: Option<usize>,
}

impl Range {
    pub fn new(from: usize, to: Option<usize>) -> Self {
        Self { from, to }
    }

    /// Slice `items` to this range
    ///
    /// Returns the slice and whether the range stopped before the end.
    ///
    /// # Errors
    ///
    /// `AppConfError::RangeNotSatisfiable` when `from` is past the last item
    /// or `to` lies beyond the item count.
    pub fn apply<'a, T>(&self, items: &'a [T]) -> Result<(&'a [T], bool)> {
        let total = items.len();
        let not_satisfiable = || AppConfError::RangeNotSatisfiable {
            offset: self.from,
            total,
        };
        if self.from >= total {
            return Err(not_satisfiable());
        }
        let end = match self.to {
            Some(to) if to > total || to <= self.from => return Err(not_satisfiable()),
            Some(to) => to,
            None => total,
        };
        Ok((&items[self.from..end], end < total))
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Consistency marker over the page contents
    pub etag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    /// Items selected before a range was applied
    pub total_items_count: usize,
    /// Index of the first returned item within those selected
    #[serde(default, skip_serializing_if = "is_zero")]
    pub offset: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl<T> Page<T> {
    /// Build a page, deriving its etag from per-item etags
    pub fn new<F>(items: Vec<T>, continuation_token: Option<String>, item_etag: F) -> Self
    where
        F: Fn(&T) -> &str,
    {
        let etag = page_etag(items.iter().map(item_etag), continuation_token.as_deref());
        let total_items_count = items.len();
        Self {
            items,
            etag,
            continuation_token,
            total_items_count,
            offset: 0,
        }
    }

    /// Record the selection this page was sliced from by `range`
    pub fn ranged(mut self, range: Option<Range>, total_items_count: usize) -> Self {
        self.offset = range.map_or(0, |r| r.from);
        self.total_items_count = total_items_count;
        self
    }

    /// `items <first>-<last>/<total>` with inclusive indices, `None` when empty
    pub fn content_range(&self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.offset + self.items.len() - 1;
        Some(format!("items {}-{}/{}", self.offset, last, self.total_items_count))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), None, |_| "")
    }

    pub fn is_last(&self) -> bool {
        self.continuation_token.is_none()
    }
}

/// Where a listing resumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Strictly after this entry in `(key, label)` order
    After(EntryKey),
    /// At this item offset
    Offset(u64),
}

const AFTER_TAG: &str = "k";
const OFFSET_TAG: &str = "o";
const NULL_LABEL: &str = "\0";

impl Cursor {
    /// Opaque token form
    pub fn encode(&self) -> String {
        let raw = match self {
            Cursor::After(entry) => format!(
                "{}\n{}\n{}",
                AFTER_TAG,
                entry.key,
                entry.label.as_deref().unwrap_or(NULL_LABEL)
            ),
            Cursor::Offset(offset) => format!("{}\n{}", OFFSET_TAG, offset),
        };
        STANDARD.encode(raw)
    }

    /// Decode a token produced by [`Cursor::encode`]
    ///
    /// # Errors
    ///
    /// `AppConfError::InvalidContinuationToken` for anything else.
    pub fn decode(token: &str) -> Result<Self> {
        let invalid = |reason: &str| AppConfError::InvalidContinuationToken {
            reason: reason.to_string(),
        };
        let bytes = STANDARD.decode(token).map_err(|_| invalid("not base64"))?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid("not utf-8"))?;
        let mut parts = raw.splitn(3, '\n');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(AFTER_TAG), Some(key), Some(label)) => Ok(Cursor::After(EntryKey {
                key: key.to_string(),
                label: (label != NULL_LABEL).then(|| label.to_string()),
            })),
            (Some(OFFSET_TAG), Some(offset), None) => offset
                .parse()
                .map(Cursor::Offset)
                .map_err(|_| invalid("bad offset")),
            _ => Err(invalid("unknown cursor")),
        }
    }

    /// Decode, treating a malformed token as no token
    ///
    /// For request parsing layers, which restart from the first page.
    pub fn decode_lenient(token: Option<&str>) -> Option<Self> {
        token.and_then(|t| match Self::decode(t) {
            Ok(cursor) => Some(cursor),
            Err(err) => {
                tracing::debug!(error = %err, "Ignoring malformed continuation token");
                None
            }
        })
    }

    /// Offset carried by a token; absent token starts at zero
    ///
    /// # Errors
    ///
    /// `AppConfError::InvalidContinuationToken` if the token is malformed or
    /// is not an offset cursor.
    pub fn offset_of(token: Option<&str>) -> Result<u64> {
        match token.map(Self::decode).transpose()? {
            None => Ok(0),
            Some(Cursor::Offset(offset)) => Ok(offset),
            Some(Cursor::After(_)) => Err(AppConfError::InvalidContinuationToken {
                reason: "expected an offset cursor".to_string(),
            }),
        }
    }

    /// Entry a key-order listing resumes after
    ///
    /// # Errors
    ///
    /// `AppConfError::InvalidContinuationToken` if the token is malformed or
    /// is not a key cursor.
    pub fn after_of(token: Option<&str>) -> Result<Option<EntryKey>> {
        match token.map(Self::decode).transpose()? {
            None => Ok(None),
            Some(Cursor::After(entry)) => Ok(Some(entry)),
            Some(Cursor::Offset(_)) => Err(AppConfError::InvalidContinuationToken {
                reason: "expected a key cursor".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_slices() {
        let items = [1, 2, 3, 4, 5];
        assert_eq!(Range::default().apply(&items).unwrap(), (&items[..], false));
        assert_eq!(Range::new(1, Some(3)).apply(&items).unwrap(), (&items[1..3], true));
        assert_eq!(Range::new(3, None).apply(&items).unwrap(), (&items[3..], false));
    }

    #[test]
    fn test_range_not_satisfiable() {
        let items = [1, 2, 3];
        assert!(Range::new(3, None).apply(&items).is_err());
        assert!(Range::new(0, Some(4)).apply(&items).is_err());
        assert!(Range::new(2, Some(2)).apply(&items).is_err());
        assert!(Range::default().apply::<i32>(&[]).is_err());
    }

    #[test]
    fn test_cursor_tokens_decode_back() {
        let after = Cursor::After(EntryKey::new("app/color", None));
        assert_eq!(Cursor::decode(&after.encode()).unwrap(), after);

        let labelled = Cursor::After(EntryKey::new("k", Some("prod")));
        assert_eq!(Cursor::decode(&labelled.encode()).unwrap(), labelled);

        assert_eq!(Cursor::decode(&Cursor::Offset(7).encode()).unwrap(), Cursor::Offset(7));
    }

    #[test]
    fn test_garbage_fails_loudly_but_lenient_restarts() {
        assert!(matches!(
            Cursor::decode("%%%"),
            Err(AppConfError::InvalidContinuationToken { .. })
        ));
        assert!(Cursor::decode(&STANDARD.encode("x\ny")).is_err());
        assert_eq!(Cursor::decode_lenient(Some("%%%")), None);
        assert_eq!(Cursor::decode_lenient(None), None);
    }

    #[test]
    fn test_cursor_kind_mismatch() {
        let token = Cursor::Offset(3).encode();
        assert!(Cursor::after_of(Some(&token)).is_err());
        assert_eq!(Cursor::offset_of(Some(&token)).unwrap(), 3);
        assert_eq!(Cursor::offset_of(None).unwrap(), 0);
    }

    #[test]
    fn test_page_etag_tracks_items() {
        let a = Page::new(vec!["e1".to_string()], None, |s| s.as_str());
        let b = Page::new(vec!["e2".to_string()], None, |s| s.as_str());
        assert_ne!(a.etag, b.etag);
        assert_eq!(a.total_items_count, 1);
        assert!(a.is_last());
    }

    #[test]
    fn test_ranged_page_keeps_selection_count() {
        let selected: Vec<String> = (0..5).map(|i| format!("e{}", i)).collect();
        let range = Range::new(1, Some(3));
        let (slice, _) = range.apply(&selected).unwrap();

        let page = Page::new(slice.to_vec(), None, |s| s.as_str()).ranged(Some(range), selected.len());
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total_items_count, 5);
        assert_eq!(page.offset, 1);
        assert_eq!(page.content_range().as_deref(), Some("items 1-2/5"));

        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["total_items_count"], 5);
        assert_eq!(json["offset"], 1);
    }

    #[test]
    fn test_unranged_page_has_no_offset() {
        let page = Page::new(vec!["e1".to_string()], None, |s| s.as_str()).ranged(None, 1);
        assert_eq!(page.offset, 0);
        assert_eq!(page.content_range().as_deref(), Some("items 0-0/1"));
        assert!(serde_json::to_value(&page).unwrap().get("offset").is_none());
        assert_eq!(Page::<String>::empty().content_range(), None);
    }
}
