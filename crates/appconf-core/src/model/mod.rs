//! Data model shared by the store and the snapshot engine

pub mod key_value;
pub mod search;
pub mod snapshot;

pub use key_value::{EntryKey, KeyValue, Tags};
pub use search::{KeySearchOptions, KeyValueSearchOptions, LabelSearchOptions};
pub use snapshot::{
    CompositionType, MediaInfo, NewSnapshot, Snapshot, SnapshotFilter, SnapshotSearchOptions,
    SnapshotStatus, StatusFilter,
};

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the whole-second precision timestamps are persisted with
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}
