//! Persisted hourly interrupt accounting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptState {
    pub seconds_interrupted_this_hour: u64,
    pub target_hourly_seconds: u64,
    /// Last call to record played seconds
    pub last_interruption_at: Option<DateTime<Utc>>,
    /// Last time the set of interrupt items changed
    pub last_schedule_change_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub per_schedule_seconds_played: HashMap<i64, u64>,
    /// Identity of the interrupt set seen on the previous tick
    #[serde(default)]
    pub interrupt_set: Vec<(i64, i64, u32)>,
    /// Start of the hour the accounting was last cleared for
    #[serde(default)]
    pub hour_reset_for: Option<DateTime<Utc>>,
}

impl InterruptState {
    /// Missing or corrupt state yields a fresh one
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Interrupt state corrupt, starting fresh");
                Self::default()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Interrupt state unreadable, starting fresh");
                }
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Interrupt state saved");
        Ok(())
    }

    /// Clear hourly accounting
    pub fn reset_hour(&mut self) {
        self.seconds_interrupted_this_hour = 0;
        self.target_hourly_seconds = 0;
        self.per_schedule_seconds_played.clear();
    }
}
