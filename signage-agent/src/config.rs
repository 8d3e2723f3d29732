//! Configuration management for signage-agent
//!
//! Two layers:
//! 1. **TOML bootstrap** (`config.toml`): root folder, logging, `[agent]` settings
//! 2. **Built-in defaults** for every setting missing from the file
//!
//! The CMS may retune the collect interval at runtime through registration;
//! that value lives in the agent context, not here.

use serde::{Deserialize, Serialize};
use signage_common::config::LoggingConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whole bootstrap file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Root folder for persisted state and the content library
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub agent: AgentSettings,
}

/// Agent runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    /// CMS base URL
    pub cms_url: String,
    pub server_key: String,
    pub hardware_key: String,
    pub display_name: String,

    /// Schedule and required-files poll interval (CMS may override)
    pub collect_interval_secs: u64,
    /// Resolver re-evaluation interval
    pub resolver_tick_secs: u64,
    /// Widget data refresh check interval
    pub widget_poll_secs: u64,
    /// Fault/log/stat submission interval
    pub report_interval_secs: u64,

    pub max_concurrent_downloads: usize,
    pub chunk_size_bytes: u64,
    /// Partial files older than this are restarted rather than resumed
    pub resume_window_hours: i64,

    /// Recently hashed files are trusted without a disk check for this long
    pub cache_grace_secs: i64,
    pub cache_checkpoint_secs: u64,

    /// Wait applied on a rate-limited response with no Retry-After
    pub default_retry_after_secs: u64,
    pub command_lookahead_secs: i64,
    pub fault_ttl_secs: i64,
    pub log_queue_capacity: usize,
    pub http_timeout_secs: u64,

    /// Last known display location, for geo-aware schedules
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            cms_url: "http://localhost".to_string(),
            server_key: String::new(),
            hardware_key: String::new(),
            display_name: "signage-display".to_string(),
            collect_interval_secs: 900,
            resolver_tick_secs: 10,
            widget_poll_secs: 60,
            report_interval_secs: 300,
            max_concurrent_downloads: 2,
            chunk_size_bytes: 512 * 1024,
            resume_window_hours: 24,
            cache_grace_secs: 60,
            cache_checkpoint_secs: 300,
            default_retry_after_secs: 120,
            command_lookahead_secs: 10,
            fault_ttl_secs: 300,
            log_queue_capacity: 500,
            http_timeout_secs: 30,
            latitude: None,
            longitude: None,
        }
    }
}

impl AgentSettings {
    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs.max(1))
    }

    pub fn resolver_tick(&self) -> Duration {
        Duration::from_secs(self.resolver_tick_secs.max(1))
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    /// Configured location as (latitude, longitude)
    pub fn location(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Fixed layout of persisted state beneath the root folder
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Downloaded content
    pub fn library(&self) -> PathBuf {
        self.root.join("library")
    }

    pub fn cache_index(&self) -> PathBuf {
        self.root.join("cache_index.json")
    }

    pub fn required_files_manifest(&self) -> PathBuf {
        self.root.join("required_files.xml")
    }

    pub fn schedule_manifest(&self) -> PathBuf {
        self.root.join("schedule.xml")
    }

    pub fn interrupt_state(&self) -> PathBuf {
        self.root.join("interrupt_state.json")
    }

    /// Create the root and library directories
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.library())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
