//! Schedule manifest collection

use async_trait::async_trait;
use chrono::Utc;
use signage_common::events::AgentEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::poll_loop::SyncAgent;
use crate::context::AgentContext;
use crate::error::{Error, Result};
use crate::schedule::{ScheduleHandle, ScheduleManifest};
use crate::upstream::Upstream;

pub struct ScheduleAgent {
    ctx: AgentContext,
    upstream: Arc<dyn Upstream>,
    schedule: ScheduleHandle,
    last_checksum: Option<String>,
    force: Arc<AtomicBool>,
}

impl ScheduleAgent {
    pub fn new(ctx: AgentContext, upstream: Arc<dyn Upstream>, schedule: ScheduleHandle) -> Self {
        Self {
            ctx,
            upstream,
            schedule,
            last_checksum: None,
            force: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that makes the next run re-apply the manifest even if unchanged
    pub fn force_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.force)
    }

    /// Apply the manifest persisted by a previous run so playback can start
    /// offline. Missing or unparsable files are ignored.
    pub fn load_persisted(&mut self) {
        let path = self.ctx.paths.schedule_manifest();
        let Ok(body) = std::fs::read_to_string(&path) else {
            debug!(path = %path.display(), "No persisted schedule");
            return;
        };
        match ScheduleManifest::parse(&body) {
            Ok(manifest) => {
                info!(layouts = manifest.layouts.len(), "Loaded persisted schedule");
                self.schedule.set_manifest(manifest);
            }
            Err(e) => warn!(error = %e, "Persisted schedule unusable"),
        }
    }
}

#[async_trait]
impl SyncAgent for ScheduleAgent {
    fn name(&self) -> &'static str {
        "schedule"
    }

    fn interval(&self) -> Duration {
        self.ctx.display.collect_interval()
    }

    async fn run_once(&mut self) -> Result<()> {
        if !self.ctx.display.is_ready() {
            debug!("Display not ready, skipping schedule collection");
            return Ok(());
        }

        let fetched = self.upstream.fetch_schedule().await?;
        let forced = self.force.swap(false, Ordering::SeqCst);
        if !forced && self.last_checksum.as_deref() == Some(fetched.checksum.as_str()) {
            debug!(checksum = %fetched.checksum, "Schedule unchanged");
            self.ctx.display.schedule_succeeded(Utc::now());
            return Ok(());
        }

        // A bad manifest leaves the previous schedule in force
        let manifest = ScheduleManifest::parse(&fetched.body)?;

        let path = self.ctx.paths.schedule_manifest();
        tokio::fs::write(&path, &fetched.body)
            .await
            .map_err(|e| Error::from_write(&path.display().to_string(), e))?;

        info!(
            checksum = %fetched.checksum,
            layouts = manifest.layouts.len(),
            overlays = manifest.overlays.len(),
            commands = manifest.commands.len(),
            "Schedule updated"
        );
        self.schedule.set_manifest(manifest);
        self.last_checksum = Some(fetched.checksum.clone());
        self.ctx.display.schedule_succeeded(Utc::now());
        self.ctx.events.emit_lossy(AgentEvent::ScheduleManifestUpdated {
            checksum: fetched.checksum,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
