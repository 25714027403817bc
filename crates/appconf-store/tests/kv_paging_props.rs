// Property tests for key-value listing
// Walking every page visits each live entry exactly once, in (key, label) order

use appconf_core::model::{KeyValue, KeyValueSearchOptions};
use appconf_core::CancelSignal;
use appconf_store::{KeyValueStore, MemoryJournal, SettingsOptions};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

async fn walk(entries: &[(String, Option<String>)], page_size: usize) -> Vec<(String, Option<String>)> {
    let options = SettingsOptions {
        output_page_size: page_size,
        ..SettingsOptions::default()
    };
    let store = KeyValueStore::open(&options, Arc::new(MemoryJournal::new()))
        .await
        .unwrap();
    let never = CancelSignal::never();
    for (key, label) in entries {
        store
            .set(KeyValue::new(key.as_str(), label.as_deref()).with_value("v"), None, &never)
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut search = KeyValueSearchOptions::default();
    loop {
        let page = store.query(&search, &never).await.unwrap();
        assert!(page.items.len() <= page_size);
        seen.extend(page.items.into_iter().map(|kv| (kv.key, kv.label)));
        match page.continuation_token {
            Some(token) => search.continuation_token = Some(token),
            None => break,
        }
    }
    seen
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn pages_cover_live_entries_once(
        entries in prop::collection::vec(("[a-d]{1,2}", prop::option::of("[xy]")), 0..20),
        page_size in 1usize..6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let seen = runtime.block_on(walk(&entries, page_size));

        let expected: BTreeSet<(String, Option<String>)> = entries.into_iter().collect();
        let expected: Vec<_> = expected.into_iter().collect();
        prop_assert_eq!(seen, expected);
    }
}
