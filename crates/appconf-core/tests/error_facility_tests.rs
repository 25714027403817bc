use appconf_core::errors::{AppConfError, ExError, ExErrorKind};

#[test]
fn test_not_found_carries_key_and_label() {
    let ex_err: ExError = AppConfError::KeyValueNotFound {
        key: "app/color".to_string(),
        label: Some("prod".to_string()),
    }
    .into();

    assert_eq!(ex_err.kind(), ExErrorKind::NotFound);
    assert_eq!(ex_err.code(), "ERR_NOT_FOUND");
    assert_eq!(ex_err.key(), Some("app/color"));
    assert_eq!(ex_err.label(), Some("prod"));
    assert_eq!(ex_err.http_status(), 404);
}

#[test]
fn test_snapshot_state_errors_name_the_operation() {
    let ex_err: ExError = AppConfError::InvalidSnapshotState {
        name: "nightly".to_string(),
        status: "archived".to_string(),
        operation: "provision".to_string(),
    }
    .into();

    assert_eq!(ex_err.kind(), ExErrorKind::SnapshotState);
    assert_eq!(ex_err.op(), Some("provision"));
    assert_eq!(ex_err.entity_id(), Some("nightly"));
    assert_eq!(ex_err.message(), "Snapshot nightly is archived, cannot provision");
}

#[test]
fn test_missing_etag_is_a_state_conflict() {
    let ex_err: ExError = AppConfError::MissingEtag {
        name: "nightly".to_string(),
    }
    .into();
    assert_eq!(ex_err.kind(), ExErrorKind::SnapshotState);
    assert_eq!(ex_err.http_status(), 409);
}

#[test]
fn test_codes_are_unique() {
    let kinds = [
        ExErrorKind::InvalidInput,
        ExErrorKind::SearchQuery,
        ExErrorKind::Format,
        ExErrorKind::NotFound,
        ExErrorKind::AlreadyExists,
        ExErrorKind::Concurrency,
        ExErrorKind::KeyLocked,
        ExErrorKind::SnapshotState,
        ExErrorKind::PreconditionFailed,
        ExErrorKind::NotModified,
        ExErrorKind::RangeNotSatisfiable,
        ExErrorKind::Forbidden,
        ExErrorKind::Timeout,
        ExErrorKind::Cancelled,
        ExErrorKind::Io,
        ExErrorKind::Serialization,
        ExErrorKind::Internal,
    ];
    let mut codes: Vec<&str> = kinds.iter().map(|k| k.code()).collect();
    codes.sort_unstable();
    codes.dedup();
    assert_eq!(codes.len(), kinds.len());
}

#[test]
fn test_display_includes_context() {
    let err = ExError::new(ExErrorKind::Concurrency)
        .with_op("kv_set")
        .with_key("k1", Some("prod".to_string()))
        .with_message("Etag mismatch");

    assert_eq!(
        err.to_string(),
        "[ERR_CONCURRENCY] in operation 'kv_set': Etag mismatch (key=k1,label=prod)"
    );
}

#[test]
fn test_serde_errors_become_serialization() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let ex_err: ExError = AppConfError::from(json_err).into();
    assert_eq!(ex_err.kind(), ExErrorKind::Serialization);
}
