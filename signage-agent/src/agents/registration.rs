//! Display registration and status notification

use async_trait::async_trait;
use chrono::Utc;
use signage_common::events::AgentEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::poll_loop::SyncAgent;
use crate::context::AgentContext;
use crate::error::Result;
use crate::upstream::Upstream;
use crate::wake::Waker;

pub struct RegistrationAgent {
    ctx: AgentContext,
    upstream: Arc<dyn Upstream>,
    /// Collection agents woken when the display becomes ready
    on_ready: Vec<Waker>,
}

impl RegistrationAgent {
    pub fn new(ctx: AgentContext, upstream: Arc<dyn Upstream>, on_ready: Vec<Waker>) -> Self {
        Self {
            ctx,
            upstream,
            on_ready,
        }
    }
}

#[async_trait]
impl SyncAgent for RegistrationAgent {
    fn name(&self) -> &'static str {
        "registration"
    }

    fn interval(&self) -> Duration {
        self.ctx.display.collect_interval()
    }

    async fn run_once(&mut self) -> Result<()> {
        let registration = self.upstream.register_display().await?;

        if let Some(secs) = registration.collect_interval_secs.filter(|s| *s > 0) {
            let interval = Duration::from_secs(secs);
            if interval != self.ctx.display.collect_interval() {
                info!(collect_interval_secs = secs, "Collect interval retuned by CMS");
                self.ctx.display.set_collect_interval(interval);
            }
        }

        let previous = self.ctx.display.set_registration(registration.status);
        if previous != Some(registration.status) {
            if registration.status.is_ready() {
                info!(message = %registration.message, "Display registered and ready");
                for waker in &self.on_ready {
                    waker.wake();
                }
            } else {
                warn!(
                    status = ?registration.status,
                    message = %registration.message,
                    "Display not authorised for collection"
                );
            }
            self.ctx.events.emit_lossy(AgentEvent::RegistrationChanged {
                status: registration.status,
                message: registration.message.clone(),
                timestamp: Utc::now(),
            });
        }

        let report = self.ctx.display.report(Utc::now());
        self.upstream.notify_status(&report).await?;
        Ok(())
    }
}
