//! Chunked, resumable, concurrency-bounded file downloader
//!
//! Every download holds a permit from one shared semaphore sized to the
//! configured maximum. A stop request is honoured between chunks, so the
//! chunk in flight always lands on disk before the worker exits.

use chrono::Utc;
use signage_common::events::{AgentEvent, EventBus, FileKind};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::required_set::RequiredFile;
use crate::cache::{hashing, ContentCache};
use crate::error::{Error, Result};
use crate::upstream::{ChunkRequest, Upstream};

/// How a download attempt ended without an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Verified and registered in the cache
    Completed,
    /// All bytes fetched but the hash differs; retried from scratch next cycle
    IntegrityMismatch { actual: String },
    /// Stopped between chunks; resumable from `chunk_offset`
    Cancelled,
    /// Nothing to download for this kind
    Skipped,
}

#[derive(Clone)]
pub struct Downloader {
    upstream: Arc<dyn Upstream>,
    cache: Arc<ContentCache>,
    events: EventBus,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Downloader {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        cache: Arc<ContentCache>,
        events: EventBus,
        max_concurrent: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            upstream,
            cache,
            events,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel,
        }
    }

    /// Permits currently free
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Download one file, returning its updated state alongside the result
    ///
    /// Errors never propagate beyond this file: the caller stores the
    /// returned state and carries on with its siblings.
    pub async fn download(&self, mut file: RequiredFile) -> (RequiredFile, Result<DownloadOutcome>) {
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return (file, Err(Error::Cancelled)),
        };

        if self.cancel.is_cancelled() {
            return (file, Ok(DownloadOutcome::Cancelled));
        }

        file.downloading = true;
        let result = match file.kind {
            FileKind::Widget => Ok(DownloadOutcome::Skipped),
            FileKind::Resource => self.fetch_resource(&mut file).await,
            FileKind::Dependency | FileKind::Media | FileKind::Layout => {
                self.fetch_chunked(&mut file).await
            }
        };
        file.downloading = false;

        match &result {
            Ok(DownloadOutcome::Completed) => {
                info!(kind = %file.kind, id = %file.id, file = %file.save_as, "Download complete");
                self.events.emit_lossy(AgentEvent::FileCompleted {
                    id: file.id.clone(),
                    kind: file.kind,
                    timestamp: Utc::now(),
                });
            }
            Ok(DownloadOutcome::IntegrityMismatch { actual }) => {
                file.retries += 1;
                warn!(
                    kind = %file.kind,
                    id = %file.id,
                    expected = %file.md5,
                    actual = %actual,
                    "Downloaded file failed hash verification"
                );
            }
            Ok(DownloadOutcome::Cancelled) => {
                debug!(id = %file.id, offset = file.chunk_offset, "Download stopped between chunks");
            }
            Ok(DownloadOutcome::Skipped) => {}
            Err(e) => {
                file.retries += 1;
                self.cache.remove(&file.save_as);
                warn!(kind = %file.kind, id = %file.id, error = %e, "Download failed");
            }
        }

        (file, result)
    }

    async fn fetch_chunked(&self, file: &mut RequiredFile) -> Result<DownloadOutcome> {
        let path = self.cache.full_path(&file.save_as);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut out = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| Error::from_write(&file.save_as, e))?;

        // Anything past the resume offset is from an abandoned attempt
        out.set_len(file.chunk_offset)
            .await
            .map_err(|e| Error::from_write(&file.save_as, e))?;
        out.seek(SeekFrom::Start(file.chunk_offset)).await?;

        let chunk_size = file.chunk_size.max(1);
        while file.chunk_offset < file.size {
            if self.cancel.is_cancelled() {
                out.flush().await?;
                return Ok(DownloadOutcome::Cancelled);
            }

            let length = chunk_size.min(file.size - file.chunk_offset);
            let request = ChunkRequest {
                kind: file.kind,
                id: file.id.clone(),
                path: file.path.clone(),
                offset: file.chunk_offset,
                length,
                http: file.http,
            };

            let bytes = self.upstream.get_chunk(&request).await?;
            if bytes.is_empty() {
                return Err(Error::TransientNetwork(format!(
                    "empty chunk for {} at offset {}",
                    file.save_as, file.chunk_offset
                )));
            }

            let take = bytes.len().min(length as usize);
            out.write_all(&bytes[..take])
                .await
                .map_err(|e| Error::from_write(&file.save_as, e))?;
            file.chunk_offset += take as u64;

            debug!(
                id = %file.id,
                offset = file.chunk_offset,
                size = file.size,
                "Chunk written"
            );
        }

        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        let actual = hash_on_blocking_pool(path).await?;
        if actual == file.md5 {
            self.cache.add(&file.save_as, &actual);
            file.complete = true;
            Ok(DownloadOutcome::Completed)
        } else {
            file.complete = false;
            Ok(DownloadOutcome::IntegrityMismatch { actual })
        }
    }

    async fn fetch_resource(&self, file: &mut RequiredFile) -> Result<DownloadOutcome> {
        let request = file.resource.clone().ok_or_else(|| {
            Error::InvalidManifest(format!("resource {} has no layout/region/media", file.id))
        })?;

        let bytes = self.upstream.get_resource(&request).await?;

        let path = self.cache.full_path(&file.save_as);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::from_write(&file.save_as, e))?;
        tokio::fs::rename(&tmp, &path).await?;

        let hash = hashing::md5_bytes(&bytes);
        self.cache.add(&file.save_as, &hash);
        file.md5 = hash;
        file.size = bytes.len() as u64;
        file.chunk_offset = file.size;
        file.complete = true;
        Ok(DownloadOutcome::Completed)
    }
}

async fn hash_on_blocking_pool(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || hashing::md5_file(&path))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
        .map_err(Error::Io)
}
