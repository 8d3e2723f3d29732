//! Inbound push actions
//!
//! Out-of-band messages from the CMS arrive as JSON tagged by `action`:
//!
//! ```json
//! {"action": "layoutChange", "layoutId": 42, "changeMode": "replace", "duration": 60}
//! {"action": "overlayAdd", "layoutId": 7}
//! {"action": "widgetDataUpdate", "widgetId": "99"}
//! {"action": "collectNow"}
//! {"action": "revertToSchedule"}
//! ```
//!
//! Each becomes an override item for the resolver or a wake for an agent.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::WidgetRegistry;
use crate::context::AgentContext;
use crate::error::{Error, Result};
use crate::schedule::{ChangeMode, ScheduleHandle};
use crate::wake::Waker;

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PushAction {
    #[serde(rename_all = "camelCase")]
    LayoutChange {
        layout_id: i64,
        #[serde(default)]
        change_mode: ChangeMode,
        /// Seconds the override stays in force; until serviced if absent
        #[serde(default)]
        duration: Option<u64>,
        #[serde(default = "one")]
        play_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    OverlayAdd {
        layout_id: i64,
        #[serde(default)]
        duration: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    WidgetDataUpdate { widget_id: String },
    CollectNow,
    RevertToSchedule,
}

impl PushAction {
    pub fn parse(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// An agent that `collectNow` forces past its change detection
#[derive(Clone)]
pub struct ForcedCollect {
    pub force: Arc<AtomicBool>,
    pub waker: Waker,
}

#[derive(Clone)]
pub struct PushDispatcher {
    ctx: AgentContext,
    schedule: ScheduleHandle,
    widgets: WidgetRegistry,
    widget_waker: Waker,
    registration_waker: Waker,
    collectors: Vec<ForcedCollect>,
}

impl PushDispatcher {
    pub fn new(
        ctx: AgentContext,
        schedule: ScheduleHandle,
        widgets: WidgetRegistry,
        widget_waker: Waker,
        registration_waker: Waker,
        collectors: Vec<ForcedCollect>,
    ) -> Self {
        Self {
            ctx,
            schedule,
            widgets,
            widget_waker,
            registration_waker,
            collectors,
        }
    }

    /// Parse and dispatch one raw payload
    pub fn handle(&self, payload: &str) -> Result<()> {
        let action = PushAction::parse(payload).map_err(|e| {
            warn!(error = %e, "Unparsable push message");
            e
        })?;
        self.dispatch(action)
    }

    pub fn dispatch(&self, action: PushAction) -> Result<()> {
        info!(action = ?action, "Push action received");
        match action {
            PushAction::LayoutChange {
                layout_id,
                change_mode,
                duration,
                play_count,
            } => {
                let duration = override_duration(duration)?;
                self.schedule.add_layout_action(
                    layout_id,
                    change_mode,
                    duration,
                    play_count,
                    &self.ctx,
                );
            }
            PushAction::OverlayAdd {
                layout_id,
                duration,
            } => {
                let duration = override_duration(duration)?;
                self.schedule.add_overlay_action(
                    layout_id,
                    duration,
                    &self.ctx,
                );
            }
            PushAction::WidgetDataUpdate { widget_id } => {
                if !self.widgets.force(&widget_id) {
                    warn!(widget_id = %widget_id, "Data update for unknown widget");
                }
                self.widget_waker.wake();
            }
            PushAction::CollectNow => {
                self.registration_waker.wake();
                for collector in &self.collectors {
                    collector.force.store(true, Ordering::SeqCst);
                    collector.waker.wake();
                }
            }
            PushAction::RevertToSchedule => self.schedule.revert_to_schedule(),
        }
        Ok(())
    }
}

fn override_duration(secs: Option<u64>) -> Result<Option<Duration>> {
    let Some(secs) = secs else {
        return Ok(None);
    };
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .map(Some)
        .ok_or_else(|| {
            warn!(duration = secs, "Push duration out of range");
            Error::InvalidMessage(format!("duration {}s out of range", secs))
        })
}
