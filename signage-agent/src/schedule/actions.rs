//! Externally injected override and overlay items

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::item::ScheduleItem;

/// How a pushed layout joins the items already injected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    #[default]
    Replace,
    Append,
}

#[derive(Debug, Default)]
pub struct ActionItems {
    layouts: Vec<TrackedAction>,
    overlays: Vec<ScheduleItem>,
}

#[derive(Debug)]
struct TrackedAction {
    item: ScheduleItem,
    plays: u32,
}

impl ActionItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject an override layout. Returns its action id.
    pub fn add_layout(
        &mut self,
        layout_id: i64,
        mode: ChangeMode,
        duration: Option<Duration>,
        required_plays: u32,
        now: NaiveDateTime,
    ) -> String {
        if mode == ChangeMode::Replace {
            self.layouts.clear();
        }
        let item = action_item(layout_id, duration, now, true, required_plays.max(1));
        let action_id = item.action_id.clone().unwrap_or_default();
        debug!(layout_id, action_id = %action_id, ?mode, "Override layout injected");
        self.layouts.push(TrackedAction { item, plays: 0 });
        action_id
    }

    pub fn add_overlay(
        &mut self,
        layout_id: i64,
        duration: Option<Duration>,
        now: NaiveDateTime,
    ) -> String {
        let item = action_item(layout_id, duration, now, false, 1);
        let action_id = item.action_id.clone().unwrap_or_default();
        self.overlays.push(item);
        action_id
    }

    /// Count one completed play. Returns true when the action was serviced
    /// and removed.
    pub fn record_play(&mut self, action_id: &str) -> bool {
        let Some(pos) = self
            .layouts
            .iter()
            .position(|a| a.item.action_id.as_deref() == Some(action_id))
        else {
            return false;
        };
        let action = &mut self.layouts[pos];
        action.plays += 1;
        if action.plays >= action.item.required_plays {
            self.layouts.remove(pos);
            debug!(action_id, "Override action serviced");
            true
        } else {
            false
        }
    }

    /// Drop items whose window has closed. Returns true if anything was removed.
    pub fn expire(&mut self, now: NaiveDateTime) -> bool {
        let before = self.layouts.len() + self.overlays.len();
        self.layouts.retain(|a| a.item.to_dt >= now);
        self.overlays.retain(|o| o.to_dt >= now);
        before != self.layouts.len() + self.overlays.len()
    }

    pub fn clear(&mut self) {
        self.layouts.clear();
        self.overlays.clear();
    }

    pub fn layouts(&self) -> impl Iterator<Item = &ScheduleItem> {
        self.layouts.iter().map(|a| &a.item)
    }

    pub fn overlays(&self) -> impl Iterator<Item = &ScheduleItem> {
        self.overlays.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty() && self.overlays.is_empty()
    }
}

fn action_item(
    layout_id: i64,
    duration: Option<Duration>,
    now: NaiveDateTime,
    is_override: bool,
    required_plays: u32,
) -> ScheduleItem {
    let mut item = ScheduleItem::new(layout_id, 0);
    item.from_dt = now;
    item.to_dt = duration
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(NaiveDateTime::MAX);
    item.is_override = is_override;
    item.required_plays = required_plays;
    item.action_id = Some(Uuid::new_v4().to_string());
    item
}
