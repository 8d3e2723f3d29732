//! Widget data refresh
//!
//! Data widgets are not hash-tracked files. Each has its own update interval
//! and is refreshed when due, or immediately when forced by a push message.
//! Payloads land in the library as `{widget_id}.json`.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use signage_common::events::AgentEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::poll_loop::SyncAgent;
use crate::context::AgentContext;
use crate::error::{Error, Result};
use crate::files::WidgetEntry;
use crate::upstream::Upstream;

#[derive(Debug, Clone)]
struct TrackedWidget {
    update_interval: ChronoDuration,
    last_refreshed: Option<DateTime<Utc>>,
    force: bool,
}

/// Widgets known from the required-files manifest, shared between the
/// required-files agent, the widget agent and push dispatch
#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    inner: Arc<Mutex<HashMap<String, TrackedWidget>>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track exactly `widgets`, keeping refresh state of ones already known
    pub fn sync(&self, widgets: &[WidgetEntry]) {
        let mut inner = self.inner();
        inner.retain(|id, _| widgets.iter().any(|w| &w.id == id));
        for widget in widgets {
            let interval = update_interval(widget.update_interval_secs);
            inner
                .entry(widget.id.clone())
                .and_modify(|t| t.update_interval = interval)
                .or_insert(TrackedWidget {
                    update_interval: interval,
                    last_refreshed: None,
                    force: false,
                });
        }
    }

    /// Force a refresh on the next run. Returns false for unknown widgets.
    pub fn force(&self, widget_id: &str) -> bool {
        match self.inner().get_mut(widget_id) {
            Some(tracked) => {
                tracked.force = true;
                true
            }
            None => false,
        }
    }

    /// Widgets forced, never fetched, or older than their interval
    pub fn due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<String> = self
            .inner()
            .iter()
            .filter(|(_, t)| {
                t.force
                    || t.last_refreshed
                        .map_or(true, |at| now - at >= t.update_interval)
            })
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        due
    }

    pub fn mark_refreshed(&self, widget_id: &str, at: DateTime<Utc>) {
        if let Some(tracked) = self.inner().get_mut(widget_id) {
            tracked.last_refreshed = Some(at);
            tracked.force = false;
        }
    }

    pub fn len(&self) -> usize {
        self.inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn inner(&self) -> MutexGuard<'_, HashMap<String, TrackedWidget>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Intervals too long to represent never come due again after a first fetch
fn update_interval(secs: u64) -> ChronoDuration {
    i64::try_from(secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .unwrap_or(ChronoDuration::MAX)
}

pub struct WidgetDataAgent {
    ctx: AgentContext,
    upstream: Arc<dyn Upstream>,
    widgets: WidgetRegistry,
}

impl WidgetDataAgent {
    pub fn new(ctx: AgentContext, upstream: Arc<dyn Upstream>, widgets: WidgetRegistry) -> Self {
        Self {
            ctx,
            upstream,
            widgets,
        }
    }

    async fn refresh(&self, widget_id: &str) -> Result<()> {
        let data = self.upstream.get_widget_data(widget_id).await?;

        let name = format!("{}.json", widget_id);
        let path = self.ctx.cache.full_path(&name);
        let body = serde_json::to_vec(&data.data)?;
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| Error::from_write(&name, e))?;

        for file in data.files {
            debug!(widget_id, file_id = %file.id, "Widget references new file");
            self.ctx.events.emit_lossy(AgentEvent::FileNeeded { file });
        }

        self.widgets.mark_refreshed(widget_id, Utc::now());
        self.ctx.events.emit_lossy(AgentEvent::WidgetDataUpdated {
            widget_id: widget_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl SyncAgent for WidgetDataAgent {
    fn name(&self) -> &'static str {
        "widget_data"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.ctx.settings.widget_poll_secs.max(1))
    }

    async fn run_once(&mut self) -> Result<()> {
        if !self.ctx.display.is_ready() {
            return Ok(());
        }

        let due = self.widgets.due(Utc::now());
        if due.is_empty() {
            return Ok(());
        }

        // One widget failing leaves the rest to refresh; the loop backs off
        // on the first error seen
        let mut first_error = None;
        let mut refreshed = 0usize;
        for widget_id in &due {
            if self.ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.refresh(widget_id).await {
                Ok(()) => refreshed += 1,
                Err(Error::RateLimited { retry_after }) => {
                    return Err(Error::RateLimited { retry_after });
                }
                Err(e) => {
                    warn!(widget_id = %widget_id, error = %e, "Widget data refresh failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(refreshed, due = due.len(), "Widget data refreshed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
