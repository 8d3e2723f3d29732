//! Scheduled command firing

use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime};

use super::manifest::ScheduleCommand;

#[derive(Debug)]
pub struct CommandTracker {
    lookahead: Duration,
    fired: HashSet<(i64, String, NaiveDateTime)>,
    last_horizon: Option<NaiveDateTime>,
}

impl CommandTracker {
    pub fn new(lookahead: Duration) -> Self {
        Self {
            lookahead,
            fired: HashSet::new(),
            last_horizon: None,
        }
    }

    /// Commands dated from the previous call's horizon (or `now` on the first
    /// call) up to `now + lookahead` that have not fired yet. Each is returned
    /// exactly once, however far apart the calls land.
    pub fn due(&mut self, commands: &[ScheduleCommand], now: NaiveDateTime) -> Vec<ScheduleCommand> {
        let horizon = now + self.lookahead;
        // Keys older than a day can never come due again
        let stale = now - Duration::days(1);
        self.fired.retain(|(_, _, date)| *date >= stale);

        let from = self
            .last_horizon
            .map_or(now, |last| last.min(now))
            .max(stale);
        self.last_horizon = Some(horizon);

        commands
            .iter()
            .filter(|c| c.date >= from && c.date <= horizon)
            .filter(|c| self.fired.insert((c.schedule_id, c.code.clone(), c.date)))
            .cloned()
            .collect()
    }
}
