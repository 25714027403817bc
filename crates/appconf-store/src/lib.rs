//! appconf store: durable settings and snapshots
//!
//! Provides:
//! - NDJSON journal and key-value store with per-entry optimistic concurrency
//! - Snapshot metadata log, content stores and the snapshot engine
//! - Background provisioning worker
//! - Atomic file replacement and deadline helpers
//! - TOML configuration

pub mod atomic;
pub mod codec;
pub mod config;
pub mod deadline;
pub mod errors;
pub mod settings;
pub mod snapshot;

// Re-export key types
pub use config::{AppConfOptions, SettingsOptions, SnapshotOptions};
pub use errors::Result;
pub use settings::{KeyValueStore, MemoryJournal, NdjsonJournal, SettingsJournal};
pub use snapshot::{
    ContentStore, FsContentStore, NullContentStore, ProvisioningWorker, SnapshotEngine,
};
