//! Snapshot subsystem
//!
//! - `metadata`: the NDJSON log of snapshot records
//! - `content`: where provisioned content lives (file-backed or discarded)
//! - `engine`: lifecycle, composition and content reads
//! - `worker`: background provisioning with retry

pub mod content;
pub mod engine;
pub mod metadata;
pub mod worker;

pub use content::{ContentStore, FsContentStore, KeyValueStream, NullContentStore};
pub use engine::SnapshotEngine;
pub use metadata::SnapshotLog;
pub use worker::ProvisioningWorker;
