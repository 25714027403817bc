//! Search expression language
//!
//! Clients filter settings with compact text expressions:
//!
//! - key / label filters (`app/*`, `a,b,c`, `\0`) parsed into [`StringFilter`]
//! - tag filters (`env=prod`) parsed into [`TagFilter`]
//! - `$select` field lists parsed into [`FieldSelector`]
//!
//! `\` escapes the reserved characters `*`, `,` and `\`. The one-character
//! string `"\0"` stands for null.

pub mod escape;
pub mod fields;
pub mod string_filter;
pub mod tag_filter;

pub use escape::{contains_wildcard, escape, is_list_search, NULL_MARKER};
pub use fields::FieldSelector;
pub use string_filter::StringFilter;
pub use tag_filter::{parse_tag_filter, TagFilter};
