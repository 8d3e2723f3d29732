//! Request and response types exchanged with the CMS

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signage_common::events::{DisplayStatus, FileKind, NeededFile};

/// Result of `RegisterDisplay`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub status: DisplayStatus,
    #[serde(default)]
    pub message: String,
    /// Collect interval the CMS wants this display to use
    #[serde(default)]
    pub collect_interval_secs: Option<u64>,
}

/// A manifest body plus the change marker it was served with
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub checksum: String,
    pub body: String,
}

/// One chunk or whole-file request
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRequest {
    pub kind: FileKind,
    pub id: String,
    pub path: String,
    pub offset: u64,
    pub length: u64,
    /// Fetch directly over HTTP rather than through the sync service
    pub http: bool,
}

/// Identifies a rendered widget resource
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub layout_id: String,
    pub region_id: String,
    pub media_id: String,
}

/// Payload of `GetWidgetData`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetData {
    pub data: serde_json::Value,
    /// Media referenced by the payload that must be in the library
    #[serde(default)]
    pub files: Vec<NeededFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultReport {
    pub kind: String,
    pub id: String,
    pub layout_id: Option<String>,
    pub code: i32,
    pub reason: String,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Audit,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub id: uuid::Uuid,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

/// Proof-of-play record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRecord {
    pub layout_id: i64,
    pub schedule_id: i64,
    pub media_id: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub current_layout_id: Option<i64>,
    pub files_total: usize,
    pub files_complete: usize,
    pub last_schedule_success: Option<DateTime<Utc>>,
    pub last_files_success: Option<DateTime<Utc>>,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub kind: FileKind,
    pub id: String,
    pub complete: bool,
    pub md5: String,
    pub last_checked: DateTime<Utc>,
}
