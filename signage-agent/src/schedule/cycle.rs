//! Cycle-group rotation
//!
//! Items sharing a cycle group key occupy one schedule slot. The slot shows
//! one member at a time and moves to the next once that member has been
//! played its configured number of times.

use std::collections::HashMap;

use super::item::ScheduleItem;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    index: usize,
    plays: u32,
}

#[derive(Debug, Default)]
pub struct CyclePlaybackState {
    cursors: HashMap<String, Cursor>,
}

impl CyclePlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current member of a group. `members` must be non-empty and in
    /// manifest order.
    pub fn select<'a>(&self, key: &str, members: &[&'a ScheduleItem]) -> Option<&'a ScheduleItem> {
        if members.is_empty() {
            return None;
        }
        let index = self.cursors.get(key).map_or(0, |c| c.index);
        Some(members[index % members.len()])
    }

    /// Count one play of the group's current member, rotating when the
    /// member's play count is reached
    pub fn record_play(&mut self, key: &str, required_plays: u32, group_len: usize) {
        let cursor = self.cursors.entry(key.to_string()).or_default();
        cursor.plays += 1;
        if cursor.plays >= required_plays.max(1) {
            cursor.plays = 0;
            cursor.index = if group_len == 0 {
                0
            } else {
                (cursor.index + 1) % group_len
            };
        }
    }

    /// Forget groups that no longer exist in the manifest
    pub fn retain_groups<'k>(&mut self, keys: impl IntoIterator<Item = &'k str>) {
        let keep: std::collections::HashSet<&str> = keys.into_iter().collect();
        self.cursors.retain(|k, _| keep.contains(k.as_str()));
    }
}
