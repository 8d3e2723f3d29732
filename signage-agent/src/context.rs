//! Service context handed to every component

use chrono::{Local, NaiveDateTime};
use signage_common::events::EventBus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::ContentCache;
use crate::config::{AgentSettings, StoragePaths};
use crate::reporting::{FaultQueue, LogQueue, StatsQueue};
use crate::status::DisplayState;

/// Event bus capacity; slow subscribers lag rather than block emitters
pub const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct AgentContext {
    pub settings: Arc<AgentSettings>,
    pub paths: StoragePaths,
    pub cache: Arc<ContentCache>,
    pub events: EventBus,
    pub cancel: CancellationToken,
    pub display: Arc<DisplayState>,
    pub faults: Arc<FaultQueue>,
    pub logs: Arc<LogQueue>,
    pub stats: Arc<StatsQueue>,
}

impl AgentContext {
    /// Build a context over `paths`, loading the persisted cache index
    pub fn new(settings: AgentSettings, paths: StoragePaths) -> Self {
        let cache = Arc::new(ContentCache::load(
            paths.library(),
            settings.cache_grace_secs,
            &paths.cache_index(),
        ));
        Self::with_cache(settings, paths, cache)
    }

    pub fn with_cache(settings: AgentSettings, paths: StoragePaths, cache: Arc<ContentCache>) -> Self {
        let capacity = settings.log_queue_capacity;
        Self {
            display: Arc::new(DisplayState::new(settings.collect_interval())),
            faults: Arc::new(FaultQueue::new(
                Arc::clone(&cache),
                settings.fault_ttl_secs,
                capacity,
            )),
            logs: Arc::new(LogQueue::new(capacity)),
            stats: Arc::new(StatsQueue::new(capacity)),
            events: EventBus::new(EVENT_BUS_CAPACITY),
            cancel: CancellationToken::new(),
            settings: Arc::new(settings),
            paths,
            cache,
        }
    }

    /// Wall-clock time schedules are written in
    pub fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    pub fn location(&self) -> Option<(f64, f64)> {
        self.settings.location()
    }
}
