//! Shared fixtures for integration tests
//!
//! `MockUpstream` serves scripted manifests and file bytes, counts chunk
//! calls and tracks download concurrency.

#![allow(dead_code)]

use async_trait::async_trait;
use md5::{Digest, Md5};
use signage_agent::config::{AgentSettings, StoragePaths};
use signage_agent::upstream::{
    ChunkRequest, FaultReport, Fetched, InventoryItem, LogRecord, Registration, ResourceRequest,
    StatRecord, StatusReport, Upstream, UpstreamError, UpstreamResult, WidgetData,
};
use signage_agent::AgentContext;
use signage_common::events::DisplayStatus;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", Md5::digest(bytes))
}

/// Deterministic file content of `size` bytes
pub fn content(seed: u8, size: usize) -> Vec<u8> {
    (0..size).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Context rooted in a fresh temp dir with the library created
pub fn test_context(settings: AgentSettings) -> (TempDir, AgentContext) {
    let dir = TempDir::new().unwrap();
    let paths = StoragePaths::new(dir.path());
    paths.ensure().unwrap();
    (dir, AgentContext::new(settings, paths))
}

#[derive(Default)]
pub struct MockUpstream {
    pub registration: Mutex<Option<Registration>>,
    pub schedule: Mutex<Option<Fetched>>,
    pub required_files: Mutex<Option<Fetched>>,
    /// Served bytes keyed by file id
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub widget_data: Mutex<HashMap<String, WidgetData>>,
    /// File ids whose chunk requests fail
    pub failing: Mutex<HashSet<String>>,
    /// Next schedule fetch answers 429 with this wait
    pub rate_limit_next: Mutex<Option<Option<Duration>>>,
    pub chunk_delay: Mutex<Option<Duration>>,

    pub chunk_calls: AtomicUsize,
    pub schedule_fetches: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,

    pub faults: Mutex<Vec<FaultReport>>,
    pub logs: Mutex<Vec<LogRecord>>,
    pub stats: Mutex<Vec<StatRecord>>,
    pub statuses: Mutex<Vec<StatusReport>>,
    pub inventories: Mutex<Vec<Vec<InventoryItem>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap()
}

impl MockUpstream {
    pub fn new() -> Self {
        let mock = Self::default();
        *lock(&mock.registration) = Some(Registration {
            status: DisplayStatus::Ready,
            message: "ok".to_string(),
            collect_interval_secs: None,
        });
        mock
    }

    pub fn serve_file(&self, id: &str, bytes: Vec<u8>) {
        lock(&self.files).insert(id.to_string(), bytes);
    }

    pub fn fail_file(&self, id: &str) {
        lock(&self.failing).insert(id.to_string());
    }

    pub fn set_schedule(&self, checksum: &str, body: &str) {
        *lock(&self.schedule) = Some(Fetched {
            checksum: checksum.to_string(),
            body: body.to_string(),
        });
    }

    pub fn set_required_files(&self, checksum: &str, body: &str) {
        *lock(&self.required_files) = Some(Fetched {
            checksum: checksum.to_string(),
            body: body.to_string(),
        });
    }

    pub fn set_chunk_delay(&self, delay: Duration) {
        *lock(&self.chunk_delay) = Some(delay);
    }

    pub fn chunk_calls(&self) -> usize {
        self.chunk_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn register_display(&self) -> UpstreamResult<Registration> {
        lock(&self.registration)
            .clone()
            .ok_or_else(|| UpstreamError::Transport("no registration scripted".into()))
    }

    async fn fetch_schedule(&self) -> UpstreamResult<Fetched> {
        self.schedule_fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(retry_after) = lock(&self.rate_limit_next).take() {
            return Err(UpstreamError::RateLimited { retry_after });
        }
        lock(&self.schedule)
            .clone()
            .ok_or_else(|| UpstreamError::Transport("no schedule scripted".into()))
    }

    async fn fetch_required_files(&self) -> UpstreamResult<Fetched> {
        lock(&self.required_files)
            .clone()
            .ok_or_else(|| UpstreamError::Transport("no required files scripted".into()))
    }

    async fn get_chunk(&self, request: &ChunkRequest) -> UpstreamResult<Vec<u8>> {
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *lock(&self.chunk_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = if lock(&self.failing).contains(&request.id) {
            Err(UpstreamError::Server {
                status: 500,
                message: format!("chunk for {} unavailable", request.id),
            })
        } else {
            match lock(&self.files).get(&request.id) {
                Some(bytes) => {
                    let start = (request.offset as usize).min(bytes.len());
                    let end = (start + request.length as usize).min(bytes.len());
                    Ok(bytes[start..end].to_vec())
                }
                None => Err(UpstreamError::Server {
                    status: 404,
                    message: format!("unknown file {}", request.id),
                }),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn get_resource(&self, request: &ResourceRequest) -> UpstreamResult<Vec<u8>> {
        lock(&self.files)
            .get(&request.media_id)
            .cloned()
            .ok_or_else(|| UpstreamError::Server {
                status: 404,
                message: "unknown resource".into(),
            })
    }

    async fn get_widget_data(&self, widget_id: &str) -> UpstreamResult<WidgetData> {
        lock(&self.widget_data)
            .get(widget_id)
            .cloned()
            .ok_or_else(|| UpstreamError::Server {
                status: 404,
                message: "unknown widget".into(),
            })
    }

    async fn report_faults(&self, faults: &[FaultReport]) -> UpstreamResult<()> {
        lock(&self.faults).extend_from_slice(faults);
        Ok(())
    }

    async fn submit_log(&self, records: &[LogRecord]) -> UpstreamResult<()> {
        lock(&self.logs).extend_from_slice(records);
        Ok(())
    }

    async fn submit_stats(&self, records: &[StatRecord]) -> UpstreamResult<()> {
        lock(&self.stats).extend_from_slice(records);
        Ok(())
    }

    async fn notify_status(&self, status: &StatusReport) -> UpstreamResult<()> {
        lock(&self.statuses).push(status.clone());
        Ok(())
    }

    async fn media_inventory(&self, items: &[InventoryItem]) -> UpstreamResult<()> {
        lock(&self.inventories).push(items.to_vec());
        Ok(())
    }
}
