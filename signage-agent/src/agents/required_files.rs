//! Required-files collection and download fan-out

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use signage_common::events::{AgentEvent, NeededFile};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::poll_loop::SyncAgent;
use super::widget_data::WidgetRegistry;
use crate::context::AgentContext;
use crate::error::{Error, Result};
use crate::files::{DiffOptions, DownloadOutcome, Downloader, RequiredFileSet, RequiredFilesManifest};
use crate::upstream::Upstream;

/// Files requested outside the manifest, waiting for the next run
#[derive(Debug, Clone, Default)]
pub struct NeededFiles {
    inner: Arc<Mutex<Vec<NeededFile>>>,
}

impl NeededFiles {
    pub fn push(&self, file: NeededFile) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(file);
    }

    pub fn drain(&self) -> Vec<NeededFile> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub struct RequiredFilesAgent {
    ctx: AgentContext,
    upstream: Arc<dyn Upstream>,
    downloader: Downloader,
    widgets: WidgetRegistry,
    needed: NeededFiles,
    set: RequiredFileSet,
    last_checksum: Option<String>,
    force: Arc<AtomicBool>,
}

impl RequiredFilesAgent {
    pub fn new(
        ctx: AgentContext,
        upstream: Arc<dyn Upstream>,
        widgets: WidgetRegistry,
        needed: NeededFiles,
    ) -> Self {
        let downloader = Downloader::new(
            Arc::clone(&upstream),
            Arc::clone(&ctx.cache),
            ctx.events.clone(),
            ctx.settings.max_concurrent_downloads,
            ctx.cancel.clone(),
        );
        Self {
            ctx,
            upstream,
            downloader,
            widgets,
            needed,
            set: RequiredFileSet::default(),
            last_checksum: None,
            force: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn force_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.force)
    }

    pub fn required_files(&self) -> &RequiredFileSet {
        &self.set
    }

    fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            chunk_size: self.ctx.settings.chunk_size_bytes,
            resume_window: ChronoDuration::hours(self.ctx.settings.resume_window_hours),
        }
    }

    /// Rebuild the set from the manifest persisted by a previous run, so
    /// known widgets and files are tracked before the first fetch
    pub fn load_persisted(&mut self) {
        let path = self.ctx.paths.required_files_manifest();
        let Ok(body) = std::fs::read_to_string(&path) else {
            return;
        };
        match RequiredFilesManifest::parse(&body) {
            Ok(manifest) => {
                self.set = RequiredFileSet::diff(&manifest, &self.ctx.cache, self.diff_options(), Utc::now());
                self.widgets.sync(self.set.widgets());
            }
            Err(e) => warn!(error = %e, "Persisted required-files manifest unusable"),
        }
    }

    async fn apply_manifest(&mut self, checksum: &str, body: &str) -> Result<()> {
        let manifest = RequiredFilesManifest::parse(body)?;
        self.set = RequiredFileSet::diff(&manifest, &self.ctx.cache, self.diff_options(), Utc::now());
        self.widgets.sync(self.set.widgets());

        // Only a manifest that has been applied is replayed on the next start
        let path = self.ctx.paths.required_files_manifest();
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| Error::from_write(&path.display().to_string(), e))?;
        self.last_checksum = Some(checksum.to_string());

        self.ctx.events.emit_lossy(AgentEvent::RequiredFilesUpdated {
            checksum: checksum.to_string(),
            queued: self.set.pending_count(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Download every pending file, one worker each, bounded by the
    /// downloader's semaphore. Individual failures stay with their file.
    async fn download_pending(&mut self) {
        let pending = self.set.pending();
        if pending.is_empty() {
            return;
        }
        info!(files = pending.len(), "Starting downloads");

        let mut workers = JoinSet::new();
        for file in pending {
            self.set.mark_downloading(file.kind, &file.id);
            let downloader = self.downloader.clone();
            workers.spawn(async move { downloader.download(file).await });
        }

        while let Some(joined) = workers.join_next().await {
            let (mut file, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Download worker panicked");
                    continue;
                }
            };

            let completed = matches!(result, Ok(DownloadOutcome::Completed));
            match result {
                // Whole file is retried from the start
                Ok(DownloadOutcome::IntegrityMismatch { .. }) => file.chunk_offset = 0,
                Err(Error::DiskExhausted(ref name)) => {
                    warn!(file = %name, "Library volume full, skipping until next cycle");
                }
                _ => {}
            }
            self.set.update(file);

            if completed && self.set.check_provisioned() {
                info!(total = self.set.files().len(), "All required files provisioned");
                self.ctx.events.emit_lossy(AgentEvent::FilesProvisioned {
                    total: self.set.files().len(),
                    timestamp: Utc::now(),
                });
            }
        }

        self.set.clear_downloading();
    }
}

#[async_trait]
impl SyncAgent for RequiredFilesAgent {
    fn name(&self) -> &'static str {
        "required_files"
    }

    fn interval(&self) -> Duration {
        self.ctx.display.collect_interval()
    }

    async fn run_once(&mut self) -> Result<()> {
        if !self.ctx.display.is_ready() {
            debug!("Display not ready, skipping required files");
            return Ok(());
        }

        let fetched = self.upstream.fetch_required_files().await?;
        let forced = self.force.swap(false, Ordering::SeqCst);
        if forced || self.last_checksum.as_deref() != Some(fetched.checksum.as_str()) {
            self.apply_manifest(&fetched.checksum, &fetched.body).await?;
        } else {
            debug!(checksum = %fetched.checksum, "Required files unchanged, retrying incomplete");
        }

        for needed in self.needed.drain() {
            if self
                .set
                .insert_needed(&needed, &self.ctx.cache, self.ctx.settings.chunk_size_bytes)
            {
                debug!(file_id = %needed.id, kind = %needed.kind, "Queued file needed by widget");
            }
        }

        self.download_pending().await;

        let now = Utc::now();
        self.ctx
            .display
            .set_file_counts(self.set.files().len(), self.set.complete_count());

        // A set whose files were all valid on diff never saw a completion
        if self.set.check_provisioned() {
            self.ctx.events.emit_lossy(AgentEvent::FilesProvisioned {
                total: self.set.files().len(),
                timestamp: now,
            });
        }

        self.upstream.media_inventory(&self.set.inventory(now)).await?;
        self.ctx.display.files_succeeded(now);
        Ok(())
    }
}
