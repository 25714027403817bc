pub mod kv;
pub mod snapshot;

use appconf_core::access::{Permissions, Principal};
use appconf_core::query::FieldSelector;
use appconf_core::{CancelSignal, CancelSource, Page};
use serde::Serialize;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// The local user may do everything
pub fn local_permissions() -> Permissions {
    Permissions::full(Principal::new("local"))
}

/// Signal fired by Ctrl-C
pub fn interrupt_signal() -> CancelSignal {
    let source = CancelSource::new();
    let signal = source.signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            source.cancel();
        }
    });
    signal
}

/// Print one item as pretty JSON, keeping only `select`ed fields
pub fn print_item<T: Serialize>(item: &T, select: Option<&str>) -> CliResult {
    let mut value = serde_json::to_value(item)?;
    if let Some(list) = select {
        FieldSelector::parse(list).project(&mut value);
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Print a page; `select` applies to each item
pub fn print_page<T: Serialize>(page: &Page<T>, select: Option<&str>) -> CliResult {
    let mut value = serde_json::to_value(page)?;
    if let (Some(list), Some(items)) = (select, value.get_mut("items")) {
        let selector = FieldSelector::parse(list);
        if let serde_json::Value::Array(items) = items {
            items.iter_mut().for_each(|item| selector.project(item));
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Print one item per line
pub fn print_line<T: Serialize>(item: &T, select: Option<&str>) -> CliResult {
    let mut value = serde_json::to_value(item)?;
    if let Some(list) = select {
        FieldSelector::parse(list).project(&mut value);
    }
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

/// `name=value` or a bare `name` (null value)
pub fn split_tag(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (raw, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tag() {
        assert_eq!(split_tag("team=ui"), ("team", Some("ui")));
        assert_eq!(split_tag("a=b=c"), ("a", Some("b=c")));
        assert_eq!(split_tag("flag"), ("flag", None));
        assert_eq!(split_tag("empty="), ("empty", Some("")));
    }
}
