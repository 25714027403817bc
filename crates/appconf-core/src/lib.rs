//! appconf core: the pure parts of the configuration store engine
//!
//! - error and logging facilities shared by every crate
//! - the setting and snapshot data model
//! - the search expression language (key/label/tag filters, `$select`)
//! - conditional request evaluation, pagination, etag generation
//! - backoff, cancellation and input validation
//!
//! Nothing in here performs I/O; storage lives in `appconf-store`.

pub mod access;
pub mod backoff;
pub mod cancel;
pub mod errors;
pub mod etag;
pub mod logging_facility;
pub mod model;
pub mod paging;
pub mod precondition;
pub mod query;
pub mod validation;

pub use appconf_core_types::schema;

// Re-export commonly used types
pub use cancel::{CancelSignal, CancelSource};
pub use errors::{AppConfError, ExError, ExErrorKind, Result};
pub use model::{EntryKey, KeyValue, MediaInfo, Snapshot, SnapshotStatus};
pub use paging::{Cursor, Page, Range};
pub use precondition::{evaluate, EtagCondition, EtagMatch, Precondition};
