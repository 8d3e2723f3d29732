//! Upstream CMS abstraction
//!
//! The sync agents and downloader only see the [`Upstream`] trait; the wire
//! encoding lives in the implementation ([`HttpUpstream`]) or in test doubles.

mod http;
mod types;

pub use http::HttpUpstream;
pub use types::{
    ChunkRequest, FaultReport, Fetched, InventoryItem, LogLevel, LogRecord, Registration,
    ResourceRequest, StatRecord, StatusReport, WidgetData,
};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Upstream call failures
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// HTTP 429 (or equivalent); `retry_after` from the response if present
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn register_display(&self) -> UpstreamResult<Registration>;

    async fn fetch_schedule(&self) -> UpstreamResult<Fetched>;

    async fn fetch_required_files(&self) -> UpstreamResult<Fetched>;

    /// Bytes `[offset, offset + length)` of a file or dependency
    async fn get_chunk(&self, request: &ChunkRequest) -> UpstreamResult<Vec<u8>>;

    /// Whole rendered resource in one response
    async fn get_resource(&self, request: &ResourceRequest) -> UpstreamResult<Vec<u8>>;

    async fn get_widget_data(&self, widget_id: &str) -> UpstreamResult<WidgetData>;

    async fn report_faults(&self, faults: &[FaultReport]) -> UpstreamResult<()>;

    async fn submit_log(&self, records: &[LogRecord]) -> UpstreamResult<()>;

    async fn submit_stats(&self, records: &[StatRecord]) -> UpstreamResult<()>;

    async fn notify_status(&self, status: &StatusReport) -> UpstreamResult<()>;

    async fn media_inventory(&self, items: &[InventoryItem]) -> UpstreamResult<()>;
}

/// Parse a `Retry-After` value given in seconds
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }
}
