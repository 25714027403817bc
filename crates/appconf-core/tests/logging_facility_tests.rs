#![allow(clippy::unwrap_used, clippy::expect_used)]

use appconf_core::errors::{AppConfError, ExError, ExErrorKind};
use appconf_core::logging_facility::init_test_capture;
use appconf_core::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};
use appconf_core::{log_op_end, log_op_error, log_op_start};

#[test]
fn test_start_and_end_are_captured_once() {
    let capture = init_test_capture();
    let op_name = "kv_set_boundary_1";

    log_op_start!(op_name, key = "app/color");
    log_op_end!(op_name, duration_ms = 7);

    let events = capture.events_for(op_name);
    let starts = events.iter().filter(|e| e.event.as_deref() == Some(EVENT_START)).count();
    let ends = events.iter().filter(|e| e.event.as_deref() == Some(EVENT_END)).count();

    assert_eq!(starts, 1);
    assert_eq!(ends, 1);

    let start = events
        .iter()
        .find(|e| e.event.as_deref() == Some(EVENT_START))
        .unwrap();
    assert_eq!(start.field("key"), Some("app/color"));

    let end = events
        .iter()
        .find(|e| e.event.as_deref() == Some(EVENT_END))
        .unwrap();
    assert_eq!(end.field("duration_ms"), Some("7"));
}

#[test]
fn test_error_event_carries_classification() {
    let capture = init_test_capture();
    let op_name = "kv_set_locked_2";

    let err = AppConfError::KeyLocked {
        key: "app/color".to_string(),
        label: None,
    };
    log_op_error!(op_name, err, duration_ms = 2);

    capture.assert_event_exists(op_name, EVENT_END_ERROR);
    let event = capture
        .events_for(op_name)
        .into_iter()
        .find(|e| e.event.as_deref() == Some(EVENT_END_ERROR))
        .expect("error event");
    assert_eq!(event.field("err_code"), Some("ERR_KEY_LOCKED"));
    assert_eq!(event.field("err_kind"), Some("KeyLocked"));
}

#[test]
fn test_error_macro_accepts_structured_errors() {
    let capture = init_test_capture();
    let op_name = "content_write_timeout_3";

    let err = ExError::new(ExErrorKind::Timeout)
        .with_op("provision_content")
        .with_message("write deadline elapsed");
    log_op_error!(op_name, err, duration_ms = 120_000, snapshot = "nightly");

    let event = capture
        .events_for(op_name)
        .into_iter()
        .next()
        .expect("error event");
    assert_eq!(event.field("err_code"), Some("ERR_TIMEOUT"));
    assert_eq!(event.field("err_message"), Some("write deadline elapsed"));
    assert_eq!(event.field("snapshot"), Some("nightly"));
}

#[test]
fn test_clear_drops_events() {
    let capture = init_test_capture();
    let op_name = "clear_check_4";
    log_op_start!(op_name);
    assert!(!capture.events_for(op_name).is_empty());

    capture.clear();
    assert!(capture.events_for(op_name).is_empty());
}
