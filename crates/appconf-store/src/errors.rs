//! Error handling for appconf-store
//!
//! Wraps appconf-core ExError with store-specific helpers

use appconf_core::errors::{AppConfError, ExError, ExErrorKind};
use std::time::Duration;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create an IO error
pub fn io_error(operation: &str, err: std::io::Error) -> ExError {
    ExError::new(ExErrorKind::Io)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}

/// Create a serialization error for a malformed or unencodable record
pub fn serialization(operation: &str, err: serde_json::Error) -> ExError {
    ExError::new(ExErrorKind::Serialization)
        .with_op(operation.to_string())
        .with_message(err.to_string())
}

/// Deadline elapsed without the caller asking to stop
pub fn timeout(operation: &str, limit: Duration) -> ExError {
    ExError::new(ExErrorKind::Timeout)
        .with_op(operation.to_string())
        .with_message(format!(
            "Operation did not complete within {} ms",
            limit.as_millis()
        ))
}

/// The caller's cancellation signal fired
pub fn cancelled(operation: &str) -> ExError {
    ExError::new(ExErrorKind::Cancelled)
        .with_op(operation.to_string())
        .with_message("Operation cancelled by caller")
}

/// Etag mismatch on a key-value write
pub fn conflict(operation: &str, key: &str, label: Option<&str>) -> ExError {
    ExError::from(AppConfError::Conflict {
        key: key.to_string(),
        label: label.map(str::to_string),
    })
    .with_op(operation.to_string())
}

/// Write attempted on a locked key-value
pub fn key_locked(operation: &str, key: &str, label: Option<&str>) -> ExError {
    ExError::from(AppConfError::KeyLocked {
        key: key.to_string(),
        label: label.map(str::to_string),
    })
    .with_op(operation.to_string())
}

pub fn key_value_not_found(operation: &str, key: &str, label: Option<&str>) -> ExError {
    ExError::from(AppConfError::KeyValueNotFound {
        key: key.to_string(),
        label: label.map(str::to_string),
    })
    .with_op(operation.to_string())
}

pub fn snapshot_not_found(operation: &str, name: &str) -> ExError {
    ExError::from(AppConfError::SnapshotNotFound {
        name: name.to_string(),
    })
    .with_op(operation.to_string())
}

/// Snapshot is not in a status the operation accepts
pub fn snapshot_state(operation: &str, name: &str, status: &str) -> ExError {
    ExError::from(AppConfError::InvalidSnapshotState {
        name: name.to_string(),
        status: status.to_string(),
        operation: operation.to_string(),
    })
}

/// Domain error raised inside a store operation
pub fn domain(operation: &str, err: AppConfError) -> ExError {
    let ex_err = ExError::from(err);
    if ex_err.op().is_some() {
        ex_err
    } else {
        ex_err.with_op(operation.to_string())
    }
}

/// Invalid store configuration
pub fn config_error(reason: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::InvalidInput)
        .with_op("load_config")
        .with_message(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_and_cancel_are_distinct() {
        let t = timeout("read_content", Duration::from_millis(5));
        let c = cancelled("read_content");
        assert_eq!(t.kind(), ExErrorKind::Timeout);
        assert_eq!(c.kind(), ExErrorKind::Cancelled);
        assert!(t.is_transient());
        assert!(!c.is_transient());
    }

    #[test]
    fn test_domain_keeps_existing_op() {
        let err = domain(
            "snapshot_archive",
            AppConfError::InvalidSnapshotState {
                name: "s".into(),
                status: "failed".into(),
                operation: "archive".into(),
            },
        );
        assert_eq!(err.op(), Some("archive"));

        let err = domain(
            "snapshot_archive",
            AppConfError::MissingEtag { name: "s".into() },
        );
        assert_eq!(err.op(), Some("snapshot_archive"));
    }

    #[test]
    fn test_locked_names_key() {
        let err = key_locked("kv_set", "app/color", Some("prod"));
        assert_eq!(err.kind(), ExErrorKind::KeyLocked);
        assert!(err.to_string().contains("key=app/color,label=prod"));
    }
}
