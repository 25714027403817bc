//! Canonical schema constants for structured logging
//!
//! Every operation boundary log line carries `component`, `op` and `event`.

pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";
pub const FIELD_TRACE_ID: &str = "trace_id";

// Entity identifiers
pub const FIELD_KEY: &str = "key";
pub const FIELD_LABEL: &str = "label";
pub const FIELD_ETAG: &str = "etag";
pub const FIELD_SNAPSHOT: &str = "snapshot";
pub const FIELD_SNAPSHOT_STATUS: &str = "snapshot_status";

// Sizes
pub const FIELD_ITEM_COUNT: &str = "item_count";
pub const FIELD_SIZE_BYTES: &str = "size_bytes";

// Error fields
pub const FIELD_ERR_KIND: &str = "err_kind";
pub const FIELD_ERR_CODE: &str = "err_code";

// Event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
