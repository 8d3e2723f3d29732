//! Fault, log and proof-of-play submission

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::poll_loop::SyncAgent;
use crate::context::AgentContext;
use crate::error::Result;
use crate::upstream::Upstream;

pub struct FaultAgent {
    ctx: AgentContext,
    upstream: Arc<dyn Upstream>,
}

impl FaultAgent {
    pub fn new(ctx: AgentContext, upstream: Arc<dyn Upstream>) -> Self {
        Self { ctx, upstream }
    }
}

#[async_trait]
impl SyncAgent for FaultAgent {
    fn name(&self) -> &'static str {
        "faults"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.ctx.settings.report_interval_secs.max(1))
    }

    async fn run_once(&mut self) -> Result<()> {
        let batch = self.ctx.faults.take();
        if batch.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.upstream.report_faults(&batch).await {
            self.ctx.faults.requeue(batch);
            return Err(e.into());
        }
        debug!(faults = batch.len(), "Faults reported");
        Ok(())
    }
}

/// Flushes the log and stats queues
pub struct ReportAgent {
    ctx: AgentContext,
    upstream: Arc<dyn Upstream>,
}

impl ReportAgent {
    pub fn new(ctx: AgentContext, upstream: Arc<dyn Upstream>) -> Self {
        Self { ctx, upstream }
    }
}

#[async_trait]
impl SyncAgent for ReportAgent {
    fn name(&self) -> &'static str {
        "reports"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.ctx.settings.report_interval_secs.max(1))
    }

    async fn run_once(&mut self) -> Result<()> {
        let logs = self.ctx.logs.take();
        if !logs.is_empty() {
            if let Err(e) = self.upstream.submit_log(&logs).await {
                self.ctx.logs.requeue(logs);
                return Err(e.into());
            }
            debug!(records = logs.len(), "Logs submitted");
        }

        let stats = self.ctx.stats.take();
        if !stats.is_empty() {
            if let Err(e) = self.upstream.submit_stats(&stats).await {
                self.ctx.stats.requeue(stats);
                return Err(e.into());
            }
            debug!(records = stats.len(), "Stats submitted");
        }
        Ok(())
    }
}
