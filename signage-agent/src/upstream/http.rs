//! HTTP implementation of the upstream CMS calls

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RANGE, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{
    parse_retry_after, ChunkRequest, FaultReport, Fetched, InventoryItem, LogRecord, Registration,
    ResourceRequest, StatRecord, StatusReport, Upstream, UpstreamError, UpstreamResult, WidgetData,
};
use crate::cache::hashing::md5_bytes;
use crate::config::AgentSettings;

const USER_AGENT: &str = concat!("signage-agent/", env!("CARGO_PKG_VERSION"));
const CHECKSUM_HEADER: &str = "x-checksum";

/// CMS client speaking JSON over HTTP
pub struct HttpUpstream {
    http_client: reqwest::Client,
    base_url: String,
    server_key: String,
    hardware_key: String,
    display_name: String,
}

impl HttpUpstream {
    pub fn new(settings: &AgentSettings) -> UpstreamResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: settings.cms_url.trim_end_matches('/').to_string(),
            server_key: settings.server_key.clone(),
            hardware_key: settings.hardware_key.clone(),
            display_name: settings.display_name.clone(),
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/api/display/{}", self.base_url, name)
    }

    fn get(&self, name: &str) -> RequestBuilder {
        self.http_client
            .get(self.endpoint(name))
            .query(&[("serverKey", &self.server_key), ("hardwareKey", &self.hardware_key)])
    }

    fn post<T: Serialize + ?Sized>(&self, name: &str, body: &T) -> RequestBuilder {
        self.http_client
            .post(self.endpoint(name))
            .query(&[("serverKey", &self.server_key), ("hardwareKey", &self.hardware_key)])
            .json(body)
    }

    /// Send and classify the response status
    async fn send(&self, request: RequestBuilder) -> UpstreamResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(response.headers());
            debug!(retry_after = ?retry_after, "CMS rate limited request");
            return Err(UpstreamError::RateLimited { retry_after });
        }

        if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
            let message = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn fetch_manifest(&self, name: &str) -> UpstreamResult<Fetched> {
        let response = self.send(self.get(name)).await?;
        let header_checksum = response
            .headers()
            .get(CHECKSUM_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        let checksum = header_checksum.unwrap_or_else(|| md5_bytes(body.as_bytes()));
        Ok(Fetched { checksum, body })
    }

    async fn bytes(&self, request: RequestBuilder) -> UpstreamResult<Vec<u8>> {
        let response = self.send(request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody<'a> {
    display_name: &'a str,
    client_version: &'a str,
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn register_display(&self) -> UpstreamResult<Registration> {
        let body = RegisterBody {
            display_name: &self.display_name,
            client_version: env!("CARGO_PKG_VERSION"),
        };
        let response = self.send(self.post("register", &body)).await?;
        response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }

    async fn fetch_schedule(&self) -> UpstreamResult<Fetched> {
        self.fetch_manifest("schedule").await
    }

    async fn fetch_required_files(&self) -> UpstreamResult<Fetched> {
        self.fetch_manifest("required-files").await
    }

    async fn get_chunk(&self, request: &ChunkRequest) -> UpstreamResult<Vec<u8>> {
        if request.http {
            let last = request.offset + request.length.saturating_sub(1);
            let url = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));
            let builder = self
                .http_client
                .get(url)
                .header(RANGE, format!("bytes={}-{}", request.offset, last));
            return self.bytes(builder).await;
        }

        let builder = self.get("file-chunk").query(&[
            ("fileId", request.id.clone()),
            ("fileType", request.kind.as_str().to_string()),
            ("chunkOffset", request.offset.to_string()),
            ("chunkSize", request.length.to_string()),
        ]);
        self.bytes(builder).await
    }

    async fn get_resource(&self, request: &ResourceRequest) -> UpstreamResult<Vec<u8>> {
        let builder = self.get("resource").query(&[
            ("layoutId", &request.layout_id),
            ("regionId", &request.region_id),
            ("mediaId", &request.media_id),
        ]);
        self.bytes(builder).await
    }

    async fn get_widget_data(&self, widget_id: &str) -> UpstreamResult<WidgetData> {
        let response = self
            .send(self.get("widget-data").query(&[("widgetId", widget_id)]))
            .await?;
        response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))
    }

    async fn report_faults(&self, faults: &[FaultReport]) -> UpstreamResult<()> {
        self.send(self.post("faults", faults)).await.map(|_| ())
    }

    async fn submit_log(&self, records: &[LogRecord]) -> UpstreamResult<()> {
        self.send(self.post("log", records)).await.map(|_| ())
    }

    async fn submit_stats(&self, records: &[StatRecord]) -> UpstreamResult<()> {
        self.send(self.post("stats", records)).await.map(|_| ())
    }

    async fn notify_status(&self, status: &StatusReport) -> UpstreamResult<()> {
        self.send(self.post("status", status)).await.map(|_| ())
    }

    async fn media_inventory(&self, items: &[InventoryItem]) -> UpstreamResult<()> {
        self.send(self.post("inventory", items)).await.map(|_| ())
    }
}
