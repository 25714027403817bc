//! Live settings: revision arena, optimistic concurrency and journals

mod journal;
mod store;

pub use journal::{MemoryJournal, NdjsonJournal, SettingsJournal};
pub use store::KeyValueStore;
