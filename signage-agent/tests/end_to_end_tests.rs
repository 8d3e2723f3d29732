//! Manifest to screen: required files diffed, downloaded, verified, and the
//! layout picked up by the resolver

mod helpers;

use chrono::{Duration as ChronoDuration, Local, Utc};
use helpers::{content, md5_hex, test_context, MockUpstream};
use signage_agent::config::AgentSettings;
use signage_agent::files::{DiffOptions, Downloader, RequiredFileSet, RequiredFilesManifest};
use signage_agent::schedule::{ResolveContext, ScheduleManifest, ScheduleResolver};
use signage_agent::AgentRuntime;
use signage_common::events::{AgentEvent, FileKind};
use std::sync::Arc;
use std::time::Duration;

fn required_files_xml(md5: &str, size: usize) -> String {
    format!(
        r#"<files>
  <file type="layout" id="10" path="10.xlf" saveAs="10.xlf" md5="{}" size="{}" download="xmds"/>
</files>"#,
        md5, size
    )
}

fn schedule_xml() -> String {
    let now = Local::now().naive_local();
    let fmt = "%Y-%m-%d %H:%M:%S";
    format!(
        r#"<schedule>
  <default file="1"/>
  <layout file="10" scheduleid="3" priority="0" fromdt="{}" todt="{}"/>
</schedule>"#,
        (now - ChronoDuration::hours(1)).format(fmt),
        (now + ChronoDuration::hours(1)).format(fmt)
    )
}

#[tokio::test]
async fn test_layout_downloaded_verified_and_resolved() {
    let (_dir, ctx) = test_context(AgentSettings {
        chunk_size_bytes: 256,
        ..AgentSettings::default()
    });
    let layout = content(42, 1000);
    let md5 = md5_hex(&layout);
    let upstream = Arc::new(MockUpstream::new());
    upstream.serve_file("10", layout.clone());

    // Diff: absent locally, so exactly one incomplete file is queued
    let manifest = RequiredFilesManifest::parse(&required_files_xml(&md5, 1000)).unwrap();
    let mut set = RequiredFileSet::diff(
        &manifest,
        &ctx.cache,
        DiffOptions {
            chunk_size: 256,
            ..DiffOptions::default()
        },
        Utc::now(),
    );
    assert_eq!(set.files().len(), 1);
    let queued = set.pending();
    assert_eq!(queued.len(), 1);
    assert!(!queued[0].complete);
    assert_eq!(queued[0].kind, FileKind::Layout);

    // Before download the resolver can only fall back
    let mut resolver = ScheduleResolver::new(ChronoDuration::seconds(10));
    resolver.set_manifest(ScheduleManifest::parse(&schedule_xml()).unwrap());
    let resolve_ctx = ResolveContext {
        cache: &ctx.cache,
        location: None,
        now: Local::now().naive_local(),
    };
    assert!(resolver.resolve(&resolve_ctx).layouts[0].is_splash());

    let downloader = Downloader::new(
        upstream.clone(),
        Arc::clone(&ctx.cache),
        ctx.events.clone(),
        2,
        ctx.cancel.clone(),
    );
    let (file, result) = downloader.download(queued[0].clone()).await;
    result.unwrap();
    set.update(file);

    assert!(set.all_complete());
    assert!(set.check_provisioned());
    assert_eq!(upstream.chunk_calls(), 4);
    assert_eq!(ctx.cache.stored_hash("10.xlf"), Some(md5.clone()));

    let resolution = resolver.resolve(&resolve_ctx);
    let ids: Vec<i64> = resolution.layouts.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![10]);
}

#[tokio::test]
async fn test_runtime_switches_to_layout_once_provisioned() {
    let (_dir, ctx) = test_context(AgentSettings {
        chunk_size_bytes: 300,
        resolver_tick_secs: 1,
        ..AgentSettings::default()
    });
    let layout = content(9, 1000);
    let upstream = Arc::new(MockUpstream::new());
    upstream.serve_file("10", layout.clone());
    upstream.set_required_files("rf-1", &required_files_xml(&md5_hex(&layout), 1000));
    upstream.set_schedule("s-1", &schedule_xml());

    let mut events = ctx.events.subscribe();
    let runtime = AgentRuntime::start(ctx.clone(), upstream.clone()).unwrap();

    let shown = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(AgentEvent::ScheduleChanged { layouts, .. })
                    if layouts.iter().any(|l| l.layout_id == 10) =>
                {
                    return layouts;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .expect("layout 10 reaches the screen");

    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].schedule_id, 3);
    assert_eq!(runtime.schedule().current_layouts()[0].id, 10);

    runtime.shutdown().await;

    // Shutdown persists the cache and both manifests
    assert!(ctx.paths.cache_index().exists());
    assert!(ctx.paths.schedule_manifest().exists());
    assert!(ctx.paths.required_files_manifest().exists());
    assert!(ctx.paths.interrupt_state().exists());
    assert!(!upstream.inventories.lock().unwrap().is_empty());
    assert!(!upstream.statuses.lock().unwrap().is_empty());
}
