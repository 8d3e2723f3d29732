//! Display-wide status shared between agents
//!
//! Registration writes it, the schedule and file agents gate on it, and the
//! status notification reads it back out.

use chrono::{DateTime, Utc};
use signage_common::events::DisplayStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::upstream::StatusReport;

#[derive(Debug, Default)]
struct Inner {
    registration: Option<DisplayStatus>,
    current_layout_id: Option<i64>,
    files_total: usize,
    files_complete: usize,
    last_schedule_success: Option<DateTime<Utc>>,
    last_files_success: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct DisplayState {
    collect_interval_secs: AtomicU64,
    inner: Mutex<Inner>,
}

impl DisplayState {
    pub fn new(collect_interval: Duration) -> Self {
        Self {
            collect_interval_secs: AtomicU64::new(collect_interval.as_secs().max(1)),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs.load(Ordering::Relaxed))
    }

    /// Retune the schedule and required-files poll interval
    pub fn set_collect_interval(&self, interval: Duration) {
        self.collect_interval_secs
            .store(interval.as_secs().max(1), Ordering::Relaxed);
    }

    pub fn registration(&self) -> Option<DisplayStatus> {
        self.inner().registration
    }

    /// Returns the previous status
    pub fn set_registration(&self, status: DisplayStatus) -> Option<DisplayStatus> {
        self.inner().registration.replace(status)
    }

    pub fn is_ready(&self) -> bool {
        self.registration().map_or(false, |s| s.is_ready())
    }

    pub fn set_current_layout(&self, layout_id: Option<i64>) {
        self.inner().current_layout_id = layout_id;
    }

    pub fn set_file_counts(&self, total: usize, complete: usize) {
        let mut inner = self.inner();
        inner.files_total = total;
        inner.files_complete = complete;
    }

    pub fn schedule_succeeded(&self, at: DateTime<Utc>) {
        self.inner().last_schedule_success = Some(at);
    }

    pub fn files_succeeded(&self, at: DateTime<Utc>) {
        self.inner().last_files_success = Some(at);
    }

    pub fn report(&self, now: DateTime<Utc>) -> StatusReport {
        let inner = self.inner();
        StatusReport {
            current_layout_id: inner.current_layout_id,
            files_total: inner.files_total,
            files_complete: inner.files_complete,
            last_schedule_success: inner.last_schedule_success,
            last_files_success: inner.last_files_success,
            reported_at: now,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
