//! `$select` field lists

use crate::errors::{AppConfError, Result};
use std::collections::BTreeSet;

const ID_FIELD: &str = "id";
const ALL_FIELDS: &str = "*";

/// Set of requested field names, always including `id`
///
/// Dotted entries (`filters.key`) select inside a nested object; see
/// [`FieldSelector::filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelector {
    fields: BTreeSet<String>,
    all: bool,
}

impl Default for FieldSelector {
    fn default() -> Self {
        Self::all()
    }
}

impl FieldSelector {
    /// Selector returning every field
    pub fn all() -> Self {
        Self {
            fields: BTreeSet::from([ID_FIELD.to_string()]),
            all: true,
        }
    }

    /// Parse a comma separated list; blank or `*` selects everything
    pub fn parse(list: &str) -> Self {
        Self::from_names(list.split(','))
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut fields = BTreeSet::from([ID_FIELD.to_string()]);
        let mut all = false;
        let mut any = false;
        for name in names.into_iter().map(str::trim).filter(|n| !n.is_empty()) {
            any = true;
            if name == ALL_FIELDS {
                all = true;
            }
            fields.insert(name.to_string());
        }
        Self {
            fields,
            all: all || !any,
        }
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    /// Whether `name` or any of its sub-fields was requested (case-insensitive)
    pub fn exists(&self, name: &str) -> bool {
        if self.all {
            return true;
        }
        self.fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(name) || strip_parent(f, name).is_some())
    }

    /// Selector for the nested object under `prefix`, prefix stripped
    ///
    /// Selecting the parent itself (`filters`) selects all of its fields.
    ///
    /// # Errors
    ///
    /// `AppConfError::InvalidInput` if `prefix` is empty.
    pub fn filter(&self, prefix: &str) -> Result<Self> {
        if prefix.is_empty() {
            return Err(AppConfError::InvalidInput {
                field: "prefix".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.all || self.fields.iter().any(|f| f.eq_ignore_ascii_case(prefix)) {
            return Ok(Self::all());
        }
        let nested: Vec<&str> = self
            .fields
            .iter()
            .filter_map(|f| strip_parent(f, prefix))
            .collect();
        let mut selector = Self::from_names(nested);
        selector.all = false;
        Ok(selector)
    }

    /// Requested names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// Drop unselected top-level members of a JSON object
    pub fn project(&self, value: &mut serde_json::Value) {
        if self.all {
            return;
        }
        if let serde_json::Value::Object(map) = value {
            map.retain(|name, _| self.exists(name));
        }
    }
}

/// `filters.key` under parent `filters` yields `key`
fn strip_parent<'a>(field: &'a str, parent: &str) -> Option<&'a str> {
    let head = field.get(..parent.len())?;
    if !head.eq_ignore_ascii_case(parent) {
        return None;
    }
    field.get(parent.len()..)?.strip_prefix('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_always_present() {
        let selector = FieldSelector::parse("key, value");
        assert_eq!(selector.names().collect::<Vec<_>>(), vec!["id", "key", "value"]);
        assert!(!selector.is_all());
    }

    #[test]
    fn test_blank_and_star_select_all() {
        assert!(FieldSelector::parse("").is_all());
        assert!(FieldSelector::parse(" , ").is_all());
        assert!(FieldSelector::parse("key,*").is_all());
    }

    #[test]
    fn test_exists_is_case_insensitive_and_sees_sub_paths() {
        let selector = FieldSelector::parse("Key,filters.label");
        assert!(selector.exists("key"));
        assert!(selector.exists("filters"));
        assert!(selector.exists("ID"));
        assert!(!selector.exists("value"));
        assert!(!selector.exists("filter"));
    }

    #[test]
    fn test_filter_strips_prefix() {
        let selector = FieldSelector::parse("name,filters.key,media.size");
        let nested = selector.filter("filters").unwrap();
        assert!(nested.exists("key"));
        assert!(!nested.exists("size"));
        assert!(!nested.exists("name"));
    }

    #[test]
    fn test_filter_of_whole_object() {
        let selector = FieldSelector::parse("name,filters");
        assert!(selector.filter("filters").unwrap().is_all());
        assert!(selector.filter("").is_err());
    }

    #[test]
    fn test_project_json() {
        let mut value = serde_json::json!({"id": "1", "key": "k", "value": "v"});
        FieldSelector::parse("key").project(&mut value);
        assert_eq!(value, serde_json::json!({"id": "1", "key": "k"}));
    }
}
