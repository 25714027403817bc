//! Store configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! resource_id = "dev"
//!
//! [settings]
//! file_path = "/var/lib/appconf/kv.ndjson"
//!
//! [snapshots]
//! content_directory = "/var/lib/appconf/snapshots"
//! write_timeout_ms = 30000
//! ```

use crate::errors::{config_error, io_error, Result};
use appconf_core::validation::SnapshotLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfOptions {
    /// Seeds snapshot id generation
    #[serde(default = "default_resource_id")]
    pub resource_id: String,
    #[serde(default)]
    pub settings: SettingsOptions,
    #[serde(default)]
    pub snapshots: SnapshotOptions,
}

impl Default for AppConfOptions {
    fn default() -> Self {
        Self {
            resource_id: default_resource_id(),
            settings: SettingsOptions::default(),
            snapshots: SnapshotOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsOptions {
    #[serde(default = "default_kv_file")]
    pub file_path: PathBuf,
    #[serde(default = "default_page_size")]
    pub output_page_size: usize,
    /// How long superseded and deleted revisions are kept
    #[serde(default = "default_revision_retention_secs")]
    pub revision_retention_secs: u64,
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for SettingsOptions {
    fn default() -> Self {
        Self {
            file_path: default_kv_file(),
            output_page_size: default_page_size(),
            revision_retention_secs: default_revision_retention_secs(),
            write_timeout_ms: default_timeout_ms(),
        }
    }
}

impl SettingsOptions {
    pub fn revision_ttl(&self) -> Duration {
        Duration::from_secs(self.revision_retention_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotOptions {
    #[serde(default = "default_metadata_file")]
    pub metadata_file_path: PathBuf,
    #[serde(default = "default_content_directory")]
    pub content_directory: PathBuf,
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_page_size")]
    pub output_page_size: usize,
    #[serde(default = "default_min_filter_count")]
    pub min_filter_count: usize,
    #[serde(default = "default_max_filter_count")]
    pub max_filter_count: usize,
    #[serde(default = "default_retention_secs")]
    pub default_retention_secs: u64,
    #[serde(default = "default_max_retention_secs")]
    pub max_retention_secs: u64,
    #[serde(default = "default_min_retention_secs")]
    pub min_retention_secs: u64,
    #[serde(default = "default_retry_min_ms")]
    pub retry_min_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// `false` selects the content-less store
    #[serde(default = "default_true")]
    pub content_enabled: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            metadata_file_path: default_metadata_file(),
            content_directory: default_content_directory(),
            write_buffer_size: default_write_buffer_size(),
            read_buffer_size: default_read_buffer_size(),
            write_timeout_ms: default_timeout_ms(),
            read_timeout_ms: default_timeout_ms(),
            output_page_size: default_page_size(),
            min_filter_count: default_min_filter_count(),
            max_filter_count: default_max_filter_count(),
            default_retention_secs: default_retention_secs(),
            max_retention_secs: default_max_retention_secs(),
            min_retention_secs: default_min_retention_secs(),
            retry_min_ms: default_retry_min_ms(),
            retry_max_ms: default_retry_max_ms(),
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            content_enabled: true,
        }
    }
}

impl SnapshotOptions {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_min(&self) -> Duration {
        Duration::from_millis(self.retry_min_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn limits(&self) -> SnapshotLimits {
        SnapshotLimits {
            min_filter_count: self.min_filter_count,
            max_filter_count: self.max_filter_count,
            min_retention_secs: self.min_retention_secs,
            max_retention_secs: self.max_retention_secs,
        }
    }
}

impl AppConfOptions {
    /// Parse options from TOML text
    ///
    /// # Errors
    ///
    /// `ExErrorKind::InvalidInput` for malformed TOML or values rejected by
    /// [`AppConfOptions::validate`].
    pub fn from_toml(text: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(text).map_err(|e| config_error(format!("Invalid config: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    ///
    /// `ExErrorKind::Io` if the file cannot be read, otherwise as
    /// [`AppConfOptions::from_toml`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| io_error("load_config", e))?;
        let options = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(options)
    }

    /// Defaults with every path placed under `root`
    pub fn rooted_at(root: &Path) -> Self {
        let mut options = Self::default();
        options.settings.file_path = root.join("kv.ndjson");
        options.snapshots.metadata_file_path = root.join("snapshot.ndjson");
        options.snapshots.content_directory = root.join("snapshots");
        options
    }

    /// # Errors
    ///
    /// `ExErrorKind::InvalidInput` naming the first inconsistent value.
    pub fn validate(&self) -> Result<()> {
        let s = &self.snapshots;
        if self.resource_id.is_empty() {
            return Err(config_error("resource_id must not be empty"));
        }
        if self.settings.output_page_size == 0 || s.output_page_size == 0 {
            return Err(config_error("output_page_size must be positive"));
        }
        if self.settings.write_timeout_ms == 0 || s.write_timeout_ms == 0 || s.read_timeout_ms == 0 {
            return Err(config_error("timeouts must be positive"));
        }
        if s.write_buffer_size == 0 || s.read_buffer_size == 0 {
            return Err(config_error("buffer sizes must be positive"));
        }
        if s.min_filter_count > s.max_filter_count {
            return Err(config_error("min_filter_count exceeds max_filter_count"));
        }
        if s.min_retention_secs > s.max_retention_secs
            || s.default_retention_secs < s.min_retention_secs
            || s.default_retention_secs > s.max_retention_secs
        {
            return Err(config_error("retention bounds are inconsistent"));
        }
        if s.retry_min_ms > s.retry_max_ms {
            return Err(config_error("retry_min_ms exceeds retry_max_ms"));
        }
        if s.max_attempts == 0 {
            return Err(config_error("max_attempts must be positive"));
        }
        Ok(())
    }
}

fn default_resource_id() -> String {
    "local".to_string()
}

fn default_kv_file() -> PathBuf {
    PathBuf::from(".appconf/kv.ndjson")
}

fn default_metadata_file() -> PathBuf {
    PathBuf::from(".appconf/snapshot.ndjson")
}

fn default_content_directory() -> PathBuf {
    PathBuf::from(".appconf/snapshots")
}

fn default_page_size() -> usize {
    100
}

fn default_revision_retention_secs() -> u64 {
    7 * DAY_SECS
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_write_buffer_size() -> usize {
    1024 * 1024
}

fn default_read_buffer_size() -> usize {
    32 * 1024
}

fn default_min_filter_count() -> usize {
    1
}

fn default_max_filter_count() -> usize {
    3
}

fn default_retention_secs() -> u64 {
    2 * DAY_SECS
}

fn default_max_retention_secs() -> u64 {
    7 * DAY_SECS
}

fn default_min_retention_secs() -> u64 {
    60 * 60
}

fn default_retry_min_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    8_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}
