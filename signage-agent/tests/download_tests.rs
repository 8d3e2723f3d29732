//! Downloader integration tests: chunk accounting, verification,
//! concurrency bound and failure isolation

mod helpers;

use helpers::{content, md5_hex, MockUpstream};
use signage_agent::cache::ContentCache;
use signage_agent::files::{DownloadOutcome, Downloader, RequiredFile};
use signage_common::events::{AgentEvent, EventBus, FileKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

fn media(id: &str, bytes: &[u8], chunk_size: u64) -> RequiredFile {
    RequiredFile {
        kind: FileKind::Media,
        id: id.to_string(),
        path: format!("library/{}.bin", id),
        save_as: format!("{}.bin", id),
        md5: md5_hex(bytes),
        size: bytes.len() as u64,
        chunk_offset: 0,
        chunk_size,
        downloading: false,
        complete: false,
        retries: 0,
        http: false,
        resource: None,
    }
}

struct Harness {
    _dir: TempDir,
    upstream: Arc<MockUpstream>,
    cache: Arc<ContentCache>,
    events: EventBus,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self {
            cache: Arc::new(ContentCache::new(dir.path(), 60)),
            _dir: dir,
            upstream: Arc::new(MockUpstream::new()),
            events: EventBus::new(64),
        }
    }

    fn downloader(&self, max_concurrent: usize) -> Downloader {
        Downloader::new(
            self.upstream.clone(),
            Arc::clone(&self.cache),
            self.events.clone(),
            max_concurrent,
            CancellationToken::new(),
        )
    }
}

// ============================================================================
// Chunk accounting
// ============================================================================

#[tokio::test]
async fn test_resume_issues_exactly_remaining_chunks() {
    let h = Harness::new();
    let bytes = content(7, 1000);
    h.upstream.serve_file("55", bytes.clone());

    // 250 bytes already on disk from an earlier attempt
    let mut file = media("55", &bytes, 100);
    std::fs::write(h.cache.full_path(&file.save_as), &bytes[..250]).unwrap();
    file.chunk_offset = 250;
    assert_eq!(file.remaining_chunks(), 8);

    let mut events = h.events.subscribe();
    let (file, result) = h.downloader(2).download(file).await;

    assert_eq!(result.unwrap(), DownloadOutcome::Completed);
    assert_eq!(h.upstream.chunk_calls(), 8);
    assert!(file.complete);
    assert!(!file.downloading);
    assert_eq!(file.chunk_offset, 1000);
    assert_eq!(h.cache.stored_hash("55.bin"), Some(md5_hex(&bytes)));
    assert_eq!(std::fs::read(h.cache.full_path("55.bin")).unwrap(), bytes);

    match events.try_recv().unwrap() {
        AgentEvent::FileCompleted { id, kind, .. } => {
            assert_eq!(id, "55");
            assert_eq!(kind, FileKind::Media);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_fresh_download_chunk_count() {
    let h = Harness::new();
    let bytes = content(1, 1024);
    h.upstream.serve_file("9", bytes.clone());

    let (_, result) = h.downloader(1).download(media("9", &bytes, 256)).await;

    assert_eq!(result.unwrap(), DownloadOutcome::Completed);
    assert_eq!(h.upstream.chunk_calls(), 4);
}

#[tokio::test]
async fn test_hash_mismatch_leaves_file_incomplete() {
    let h = Harness::new();
    let bytes = content(3, 300);
    h.upstream.serve_file("12", bytes.clone());

    let mut file = media("12", &bytes, 128);
    file.md5 = "00000000000000000000000000000000".to_string();
    let (file, result) = h.downloader(1).download(file).await;

    assert!(matches!(
        result.unwrap(),
        DownloadOutcome::IntegrityMismatch { actual } if actual == md5_hex(&bytes)
    ));
    assert!(!file.complete);
    assert_eq!(file.retries, 1);
    assert!(h.cache.get("12.bin").is_none());
    // Bytes stay on disk; the next manifest cycle decides what to do with them
    assert!(h.cache.full_path("12.bin").exists());
}

// ============================================================================
// Concurrency and isolation
// ============================================================================

#[tokio::test]
async fn test_semaphore_bounds_concurrent_downloads() {
    let h = Harness::new();
    h.upstream.set_chunk_delay(Duration::from_millis(20));
    let downloader = h.downloader(2);

    let mut workers = JoinSet::new();
    for n in 0..6u8 {
        let bytes = content(n, 200);
        let id = format!("f{}", n);
        h.upstream.serve_file(&id, bytes.clone());
        let file = media(&id, &bytes, 100);
        let downloader = downloader.clone();
        workers.spawn(async move { downloader.download(file).await });
    }

    let mut completed = 0;
    while let Some(joined) = workers.join_next().await {
        let (file, result) = joined.unwrap();
        assert_eq!(result.unwrap(), DownloadOutcome::Completed);
        assert!(file.complete);
        completed += 1;
    }

    assert_eq!(completed, 6);
    assert!(h.upstream.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(downloader.available_permits(), 2);
}

#[tokio::test]
async fn test_one_failure_does_not_stop_siblings() {
    let h = Harness::new();
    let downloader = h.downloader(3);

    let good_a = content(10, 150);
    let good_b = content(20, 150);
    h.upstream.serve_file("a", good_a.clone());
    h.upstream.serve_file("b", good_b.clone());
    h.upstream.serve_file("bad", content(30, 150));
    h.upstream.fail_file("bad");

    // A stale entry for the failing file must not survive the failure
    h.cache.add("bad.bin", "stale");

    let mut workers = JoinSet::new();
    for file in [
        media("a", &good_a, 64),
        media("bad", &content(30, 150), 64),
        media("b", &good_b, 64),
    ] {
        let downloader = downloader.clone();
        workers.spawn(async move { downloader.download(file).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = workers.join_next().await {
        let (file, result) = joined.unwrap();
        outcomes.push((file.id.clone(), file.downloading, result.is_ok()));
    }
    outcomes.sort();

    assert_eq!(
        outcomes,
        vec![
            ("a".to_string(), false, true),
            ("b".to_string(), false, true),
            ("bad".to_string(), false, false),
        ]
    );
    assert!(h.cache.get("bad.bin").is_none());
    assert!(h.cache.get("a.bin").is_some());
}

#[tokio::test]
async fn test_stop_between_chunks_keeps_offset() {
    let h = Harness::new();
    let bytes = content(5, 500);
    h.upstream.serve_file("s", bytes.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let downloader = Downloader::new(
        h.upstream.clone(),
        Arc::clone(&h.cache),
        h.events.clone(),
        1,
        cancel,
    );

    let (file, result) = downloader.download(media("s", &bytes, 100)).await;
    assert_eq!(result.unwrap(), DownloadOutcome::Cancelled);
    assert_eq!(file.chunk_offset, 0);
    assert!(!file.complete);
    assert_eq!(h.upstream.chunk_calls(), 0);
}
