//! Outbound report queues
//!
//! Faults, log records and proof-of-play stats accumulate here and are
//! flushed by the reporting agents. A failed submission puts the batch back
//! at the front so nothing is lost across a network outage, up to each
//! queue's capacity.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;
use uuid::Uuid;

use crate::cache::{ContentCache, UnsafeKind};
use crate::upstream::{FaultReport, LogLevel, LogRecord, StatRecord};

/// Bounded FIFO that drops the oldest entry when full
#[derive(Debug)]
struct Bounded<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> Bounded<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(item);
    }

    fn take(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Put a failed batch back ahead of anything queued since
    fn requeue(&mut self, batch: Vec<T>) {
        let newer: Vec<T> = self.items.drain(..).collect();
        for item in batch.into_iter().chain(newer) {
            self.push(item);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ========================================
// Logs
// ========================================

#[derive(Debug)]
pub struct LogQueue {
    inner: Mutex<Bounded<LogRecord>>,
}

impl LogQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Bounded::new(capacity)),
        }
    }

    pub fn push(&self, level: LogLevel, category: &str, message: impl Into<String>) {
        lock(&self.inner).push(LogRecord {
            id: Uuid::new_v4(),
            level,
            category: category.to_string(),
            message: message.into(),
            logged_at: Utc::now(),
        });
    }

    pub fn take(&self) -> Vec<LogRecord> {
        lock(&self.inner).take()
    }

    pub fn requeue(&self, batch: Vec<LogRecord>) {
        lock(&self.inner).requeue(batch);
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        lock(&self.inner).dropped
    }
}

// ========================================
// Stats
// ========================================

#[derive(Debug)]
pub struct StatsQueue {
    inner: Mutex<Bounded<StatRecord>>,
}

impl StatsQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Bounded::new(capacity)),
        }
    }

    /// Record one completed play of a layout
    pub fn record(&self, layout_id: i64, schedule_id: i64, from: DateTime<Utc>, to: DateTime<Utc>) {
        lock(&self.inner).push(StatRecord {
            layout_id,
            schedule_id,
            media_id: None,
            from,
            to,
        });
    }

    pub fn push(&self, record: StatRecord) {
        lock(&self.inner).push(record);
    }

    pub fn take(&self) -> Vec<StatRecord> {
        lock(&self.inner).take()
    }

    pub fn requeue(&self, batch: Vec<StatRecord>) {
        lock(&self.inner).requeue(batch);
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ========================================
// Faults
// ========================================

/// Faults raised by the playback layer. Reporting one excludes the content
/// immediately via the cache's unsafe list; the server learns of it on the
/// next flush.
pub struct FaultQueue {
    cache: Arc<ContentCache>,
    ttl_seconds: i64,
    inner: Mutex<Bounded<FaultReport>>,
}

impl FaultQueue {
    pub fn new(cache: Arc<ContentCache>, ttl_seconds: i64, capacity: usize) -> Self {
        Self {
            cache,
            ttl_seconds,
            inner: Mutex::new(Bounded::new(capacity)),
        }
    }

    pub fn report(
        &self,
        kind: UnsafeKind,
        id: &str,
        layout_id: Option<&str>,
        code: i32,
        reason: &str,
    ) {
        warn!(kind = %kind, id = %id, code, reason = %reason, "Content fault reported");
        self.cache
            .mark_unsafe(kind, id, layout_id, code, reason, self.ttl_seconds);
        lock(&self.inner).push(FaultReport {
            kind: kind.to_string(),
            id: id.to_string(),
            layout_id: layout_id.map(str::to_string),
            code,
            reason: reason.to_string(),
            reported_at: Utc::now(),
        });
    }

    pub fn take(&self) -> Vec<FaultReport> {
        lock(&self.inner).take()
    }

    pub fn requeue(&self, batch: Vec<FaultReport>) {
        lock(&self.inner).requeue(batch);
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
