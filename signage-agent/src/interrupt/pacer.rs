//! Hourly share-of-voice pacing
//!
//! Interrupt items each want `share_of_voice` seconds per hour. The pacer
//! spreads that commitment across the hour: at any instant the display should
//! have spent `target * fraction_of_hour_elapsed` seconds on interrupts, and
//! it asks for an interrupt whenever playback falls behind that line.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::state::InterruptState;
use crate::error::Result;
use crate::schedule::ScheduleItem;
use signage_common::time::{fraction_of_hour_elapsed, seconds_remaining_in_hour, top_of_hour};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSignal {
    /// Playback is behind pace; show an interrupt
    InterruptNow,
    /// On pace; let the current interrupt finish and hold further ones
    PausePending,
    /// No interrupt items scheduled
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterruptDecision {
    pub signal: InterruptSignal,
    pub target: u64,
    pub should_have_interrupted: u64,
    /// Highest ranked unfulfilled item, if any
    pub next: Option<ScheduleItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedInterrupt {
    pub item: ScheduleItem,
    pub seconds_played: u64,
    pub score: f64,
    pub fulfilled: bool,
}

pub struct InterruptPacer {
    state: InterruptState,
    path: Option<PathBuf>,
}

impl InterruptPacer {
    /// In-memory pacer with fresh state
    pub fn new() -> Self {
        Self {
            state: InterruptState::default(),
            path: None,
        }
    }

    /// Pacer backed by a state file; missing or corrupt yields fresh state
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            state: InterruptState::load(&path),
            path: Some(path),
        }
    }

    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.state.save(path),
            None => Ok(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> &InterruptState {
        &self.state
    }

    /// Evaluate pacing for the current interrupt bucket
    pub fn tick(&mut self, items: &[ScheduleItem], now: DateTime<Utc>) -> InterruptDecision {
        self.note_set(items, now);

        if items.is_empty() {
            self.state.per_schedule_seconds_played.clear();
            return InterruptDecision {
                signal: InterruptSignal::End,
                target: 0,
                should_have_interrupted: 0,
                next: None,
            };
        }

        self.rollover(now);

        let raw_target: u64 = items.iter().map(|i| u64::from(i.share_of_voice)).sum();
        let hour_start = top_of_hour(now);
        let changed_this_hour = self
            .state
            .last_schedule_change_at
            .map_or(false, |at| at >= hour_start);
        let target = if changed_this_hour {
            raw_target
        } else {
            raw_target.max(self.state.target_hourly_seconds)
        };
        self.state.target_hourly_seconds = target;

        let should_have_interrupted = (target as f64 * fraction_of_hour_elapsed(now)).floor() as u64;
        let signal = if self.state.seconds_interrupted_this_hour < should_have_interrupted {
            InterruptSignal::InterruptNow
        } else {
            InterruptSignal::PausePending
        };

        InterruptDecision {
            signal,
            target,
            should_have_interrupted,
            next: self.next_interrupt(items, now).cloned(),
        }
    }

    /// Account played interrupt time. The only writer of the last playtime
    /// timestamp.
    pub fn record_seconds_played(&mut self, schedule_id: i64, seconds: u64, now: DateTime<Utc>) {
        self.rollover(now);
        self.state.seconds_interrupted_this_hour += seconds;
        *self
            .state
            .per_schedule_seconds_played
            .entry(schedule_id)
            .or_insert(0) += seconds;
        self.state.last_interruption_at = Some(now);
        debug!(
            schedule_id,
            seconds,
            hour_total = self.state.seconds_interrupted_this_hour,
            "Interrupt playtime recorded"
        );
    }

    /// Items ordered by how far behind pace they are, furthest first
    pub fn rank(&self, items: &[ScheduleItem], now: DateTime<Utc>) -> Vec<RankedInterrupt> {
        let remaining = seconds_remaining_in_hour(now).max(1) as f64;
        let mut ranked: Vec<RankedInterrupt> = items
            .iter()
            .map(|item| {
                let seconds_played = self.seconds_played(item.schedule_id);
                RankedInterrupt {
                    item: item.clone(),
                    seconds_played,
                    score: self.score(item, remaining),
                    fulfilled: seconds_played >= u64::from(item.share_of_voice),
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.item.schedule_id.cmp(&b.item.schedule_id))
        });
        ranked
    }

    /// Highest ranked item that still owes time this hour
    pub fn next_interrupt<'a>(
        &self,
        items: &'a [ScheduleItem],
        now: DateTime<Utc>,
    ) -> Option<&'a ScheduleItem> {
        let remaining = seconds_remaining_in_hour(now).max(1) as f64;
        items
            .iter()
            .filter(|i| self.seconds_played(i.schedule_id) < u64::from(i.share_of_voice))
            .max_by(|a, b| {
                self.score(a, remaining)
                    .partial_cmp(&self.score(b, remaining))
                    .unwrap_or(Ordering::Equal)
                    .then(b.schedule_id.cmp(&a.schedule_id))
            })
    }

    pub fn seconds_played(&self, schedule_id: i64) -> u64 {
        self.state
            .per_schedule_seconds_played
            .get(&schedule_id)
            .copied()
            .unwrap_or(0)
    }

    /// Seconds still owed, scaled up as the hour runs out
    fn score(&self, item: &ScheduleItem, remaining_secs: f64) -> f64 {
        let owed = i64::from(item.share_of_voice) - self.seconds_played(item.schedule_id) as i64;
        owed as f64 * 3600.0 / remaining_secs
    }

    fn rollover(&mut self, now: DateTime<Utc>) {
        let hour_start = top_of_hour(now);
        let played_before = self
            .state
            .last_interruption_at
            .map_or(false, |last| last < hour_start);
        let reset_already = self
            .state
            .hour_reset_for
            .map_or(false, |hour| hour >= hour_start);
        if played_before && !reset_already {
            info!(previous_total = self.state.seconds_interrupted_this_hour, "Interrupt hour rolled over");
            self.state.reset_hour();
            self.state.hour_reset_for = Some(hour_start);
        }
    }

    fn note_set(&mut self, items: &[ScheduleItem], now: DateTime<Utc>) {
        let mut set: Vec<(i64, i64, u32)> = items
            .iter()
            .map(|i| (i.id, i.schedule_id, i.share_of_voice))
            .collect();
        set.sort_unstable();
        if set != self.state.interrupt_set {
            debug!(items = set.len(), "Interrupt set changed");
            self.state.interrupt_set = set;
            self.state.last_schedule_change_at = Some(now);
        }
    }
}

impl Default for InterruptPacer {
    fn default() -> Self {
        Self::new()
    }
}
