//! Escape-aware scanning primitives shared by the filter parsers
//!
//! All offsets are character offsets into the original expression.

use crate::errors::{AppConfError, Result};

/// One-character marker that stands for null
pub const NULL_MARKER: &str = "\0";
pub const ESCAPE_CHAR: char = '\\';
pub const WILDCARD: char = '*';
pub const LIST_SEPARATOR: char = ',';

const RESERVED: [char; 3] = [WILDCARD, LIST_SEPARATOR, ESCAPE_CHAR];

pub fn is_reserved(c: char) -> bool {
    RESERVED.contains(&c)
}

/// Whether `chars[index]` is part of an escape sequence
pub fn is_escaped(chars: &[char], index: usize) -> bool {
    if chars[index] == ESCAPE_CHAR {
        return true;
    }
    let run = chars[..index]
        .iter()
        .rev()
        .take_while(|c| **c == ESCAPE_CHAR)
        .count();
    run % 2 == 1
}

/// A piece of an expression cut at an unescaped separator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub offset: usize,
    pub chars: &'a [char],
}

impl Segment<'_> {
    pub fn is_null_marker(&self) -> bool {
        self.chars == ['\0']
    }

    pub fn is_blank(&self) -> bool {
        self.chars.iter().all(|c| c.is_whitespace())
    }
}

/// Split on every unescaped `separator`
///
/// Always yields at least one segment; an expression without separators
/// comes back whole.
pub fn split_unescaped(chars: &[char], separator: char) -> Vec<Segment<'_>> {
    debug_assert_ne!(separator, ESCAPE_CHAR);

    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ESCAPE_CHAR {
            i += 2;
            continue;
        }
        if c == separator {
            segments.push(Segment {
                offset: start,
                chars: &chars[start..i],
            });
            start = i + 1;
        }
        i += 1;
    }
    segments.push(Segment {
        offset: start,
        chars: &chars[start.min(chars.len())..],
    });
    segments
}

/// Resolve escape sequences, rejecting unescaped reserved characters
///
/// `offset` is the position of `chars` inside the full expression and is
/// added to the reported error position.
pub fn unescape(param: &str, chars: &[char], offset: usize) -> Result<String> {
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ESCAPE_CHAR {
            match chars.get(i + 1) {
                Some(next) => out.push(*next),
                None => return Err(invalid_character(param, offset + i)),
            }
            i += 2;
            continue;
        }
        if is_reserved(c) {
            return Err(invalid_character(param, offset + i));
        }
        out.push(c);
        i += 1;
    }
    Ok(out)
}

/// Escape reserved characters so `value` matches literally
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if is_reserved(c) {
            out.push(ESCAPE_CHAR);
        }
        out.push(c);
    }
    out
}

/// Whether the expression holds an unescaped `*`
pub fn contains_wildcard(expr: &str) -> bool {
    let chars: Vec<char> = expr.chars().collect();
    (0..chars.len()).any(|i| chars[i] == WILDCARD && !is_escaped(&chars, i))
}

/// Whether the expression holds an unescaped `,`
pub fn is_list_search(expr: &str) -> bool {
    let chars: Vec<char> = expr.chars().collect();
    (0..chars.len()).any(|i| chars[i] == LIST_SEPARATOR && !is_escaped(&chars, i))
}

fn invalid_character(param: &str, position: usize) -> AppConfError {
    AppConfError::SearchQuery {
        param: param.to_string(),
        message: "Invalid character".to_string(),
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_is_escaped_counts_runs() {
        let c = chars(r"a\*b\\*");
        assert!(is_escaped(&c, 2));
        assert!(!is_escaped(&c, 6));
    }

    #[test]
    fn test_split_skips_escaped_separator() {
        let c = chars(r"a\,b,c");
        let parts: Vec<String> = split_unescaped(&c, ',')
            .iter()
            .map(|s| s.chars.iter().collect())
            .collect();
        assert_eq!(parts, vec![r"a\,b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_split_reports_offsets() {
        let c = chars("ab=cd=e");
        let offsets: Vec<usize> = split_unescaped(&c, '=').iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 3, 6]);
    }

    #[test]
    fn test_unescape_rejects_bare_reserved() {
        let err = unescape("key", &chars("ab*c"), 10).unwrap_err();
        assert_eq!(
            err,
            AppConfError::SearchQuery {
                param: "key".into(),
                message: "Invalid character".into(),
                position: 12,
            }
        );
    }

    #[test]
    fn test_unescape_rejects_trailing_escape() {
        assert!(unescape("key", &chars(r"abc\"), 0).is_err());
    }

    #[test]
    fn test_escape_then_unescape_is_identity() {
        let raw = r"a*b,c\d=e";
        let escaped = escape(raw);
        assert_eq!(escaped, r"a\*b\,c\\d=e");
        assert_eq!(unescape("key", &chars(&escaped), 0).unwrap(), raw);
    }

    #[test]
    fn test_wildcard_and_list_detection() {
        assert!(contains_wildcard("app/*"));
        assert!(!contains_wildcard(r"app/\*"));
        assert!(is_list_search("a,b"));
        assert!(!is_list_search(r"a\,b"));
    }
}
