//! Schedule items

use chrono::NaiveDateTime;
use signage_common::events::{LayoutRef, OverlayRef};

use super::geo::GeoFence;

/// Layout id of the built-in splash screen used when nothing else can play
pub const SPLASH_LAYOUT_ID: i64 = 0;

#[derive(Debug, Clone)]
pub struct ScheduleItem {
    /// Layout id
    pub id: i64,
    pub schedule_id: i64,
    pub from_dt: NaiveDateTime,
    pub to_dt: NaiveDateTime,
    pub priority: i32,
    pub is_override: bool,
    pub is_geo_aware: bool,
    pub geo_fence: Option<GeoFence>,
    /// Seconds per hour; non-zero marks an interrupt item
    pub share_of_voice: u32,
    /// Library files the layout needs besides its own definition
    pub dependents: Vec<String>,
    pub cycle_group_key: Option<String>,
    /// Plays of one cycle member before the group rotates
    pub cycle_play_count: u32,
    /// Push action that injected this item
    pub action_id: Option<String>,
    /// Plays required before an action item counts as serviced
    pub required_plays: u32,
}

/// Identity used to decide whether the resolved set actually changed
impl PartialEq for ScheduleItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.schedule_id == other.schedule_id
            && self.from_dt == other.from_dt
            && self.to_dt == other.to_dt
            && self.action_id == other.action_id
    }
}

impl Eq for ScheduleItem {}

impl ScheduleItem {
    /// Item for `layout_id` open over the whole timeline
    pub fn new(layout_id: i64, schedule_id: i64) -> Self {
        Self {
            id: layout_id,
            schedule_id,
            from_dt: NaiveDateTime::MIN,
            to_dt: NaiveDateTime::MAX,
            priority: 0,
            is_override: false,
            is_geo_aware: false,
            geo_fence: None,
            share_of_voice: 0,
            dependents: Vec::new(),
            cycle_group_key: None,
            cycle_play_count: 1,
            action_id: None,
            required_plays: 1,
        }
    }

    pub fn splash() -> Self {
        Self::new(SPLASH_LAYOUT_ID, 0)
    }

    pub fn is_splash(&self) -> bool {
        self.id == SPLASH_LAYOUT_ID
    }

    pub fn is_interrupt(&self) -> bool {
        self.share_of_voice > 0
    }

    /// Library file holding the layout definition
    pub fn layout_file(&self) -> String {
        format!("{}.xlf", self.id)
    }

    pub fn is_current(&self, now: NaiveDateTime) -> bool {
        self.from_dt <= now && now <= self.to_dt
    }

    pub fn to_layout_ref(&self) -> LayoutRef {
        LayoutRef {
            layout_id: self.id,
            schedule_id: self.schedule_id,
            action_id: self.action_id.clone(),
        }
    }

    pub fn to_overlay_ref(&self, refresh: bool) -> OverlayRef {
        OverlayRef {
            layout_id: self.id,
            schedule_id: self.schedule_id,
            refresh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_priority() {
        let a = ScheduleItem::new(10, 5);
        let mut b = ScheduleItem::new(10, 5);
        b.priority = 3;
        b.dependents.push("x.png".to_string());
        assert_eq!(a, b);

        b.action_id = Some("push-1".to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn test_current_window_is_inclusive() {
        let mut item = ScheduleItem::new(10, 5);
        let t = NaiveDateTime::parse_from_str("2026-04-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        item.from_dt = t;
        item.to_dt = t;
        assert!(item.is_current(t));
        assert!(!item.is_current(t + chrono::Duration::seconds(1)));
    }
}
