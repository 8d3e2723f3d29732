//! Shared poll loop driving every sync agent
//!
//! Each iteration: check stop, clear any pending wake, run the agent once,
//! then sleep for the interval (or backoff) unless woken or stopped first.
//! Errors are absorbed here; an agent never takes its loop down.

use async_trait::async_trait;
use chrono::Utc;
use signage_common::events::{AgentEvent, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use crate::context::AgentContext;
use crate::error::{Error, Result};
use crate::reporting::LogQueue;
use crate::upstream::LogLevel;
use crate::wake::WakeReceiver;

#[async_trait]
pub trait SyncAgent: Send {
    fn name(&self) -> &'static str;

    /// Wait between successful runs
    fn interval(&self) -> Duration;

    async fn run_once(&mut self) -> Result<()>;
}

pub struct PollLoop<A> {
    agent: A,
    wake: WakeReceiver,
    cancel: CancellationToken,
    events: EventBus,
    logs: Arc<LogQueue>,
    default_retry_after: Duration,
    backoff: Backoff,
}

impl<A: SyncAgent> PollLoop<A> {
    pub fn new(agent: A, wake: WakeReceiver, ctx: &AgentContext) -> Self {
        Self {
            agent,
            wake,
            cancel: ctx.cancel.clone(),
            events: ctx.events.clone(),
            logs: Arc::clone(&ctx.logs),
            default_retry_after: ctx.settings.default_retry_after(),
            backoff: Backoff::new(),
        }
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run until the stop signal fires. Hands the agent back for inspection.
    pub async fn run(mut self) -> A {
        let name = self.agent.name();
        info!(agent = name, "Agent started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.wake.reset();

            let result = self.agent.run_once().await;
            self.backoff = self.next_backoff(result);

            let sleep = self.backoff.next_sleep(self.agent.interval());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.wake.wait() => {
                    debug!(agent = name, "Agent woken early");
                }
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        info!(agent = name, "Agent stopped");
        self.agent
    }

    fn next_backoff(&self, result: Result<()>) -> Backoff {
        let name = self.agent.name();
        match result {
            Ok(()) => self.backoff.on_success(),
            Err(e) if !e.counts_as_failure() => match e {
                Error::RateLimited { retry_after } => {
                    let wait = retry_after.unwrap_or(self.default_retry_after);
                    warn!(agent = name, wait_secs = wait.as_secs(), "Rate limited by CMS");
                    self.backoff.on_rate_limited(wait)
                }
                _ => self.backoff,
            },
            Err(e) => {
                let next = self.backoff.on_failure();
                warn!(
                    agent = name,
                    error = %e,
                    consecutive_failures = next.failures(),
                    "Agent cycle failed"
                );
                self.logs
                    .push(LogLevel::Error, name, format!("{} failed: {}", name, e));
                self.events.emit_lossy(AgentEvent::AgentFailure {
                    agent: name.to_string(),
                    error: e.to_string(),
                    consecutive_failures: next.failures(),
                    timestamp: Utc::now(),
                });
                next
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentSettings, StoragePaths};
    use crate::wake::wake_channel;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Scripted {
        runs: Arc<AtomicUsize>,
        script: VecDeque<Result<()>>,
        interval: Duration,
    }

    #[async_trait]
    impl SyncAgent for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn run_once(&mut self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.script.pop_front().unwrap_or(Ok(()))
        }
    }

    fn context(dir: &TempDir) -> AgentContext {
        AgentContext::new(AgentSettings::default(), StoragePaths::new(dir.path()))
    }

    fn scripted(script: Vec<Result<()>>) -> (Scripted, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Scripted {
                runs: Arc::clone(&runs),
                script: script.into(),
                interval: Duration::from_secs(3600),
            },
            runs,
        )
    }

    #[tokio::test]
    async fn test_stop_unblocks_sleep() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let (agent, runs) = scripted(vec![]);
        let (_waker, wake) = wake_channel();

        let handle = tokio::spawn(PollLoop::new(agent, wake, &ctx).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits promptly")
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wakes_coalesce_into_one_run() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let (agent, runs) = scripted(vec![]);
        let (waker, wake) = wake_channel();

        let handle = tokio::spawn(PollLoop::new(agent, wake, &ctx).run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        for _ in 0..5 {
            waker.wake();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        ctx.cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_emit_events_and_back_off() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let mut events = ctx.events.subscribe();
        let (agent, _runs) = scripted(vec![Err(Error::TransientNetwork("down".into()))]);
        let (_waker, wake) = wake_channel();

        let mut poll = PollLoop::new(agent, wake, &ctx);
        let result = poll.agent.run_once().await;
        poll.backoff = poll.next_backoff(result);
        assert_eq!(poll.backoff().failures(), 1);
        assert_eq!(ctx.logs.len(), 1);

        match events.try_recv().unwrap() {
            AgentEvent::AgentFailure {
                agent,
                consecutive_failures,
                ..
            } => {
                assert_eq!(agent, "scripted");
                assert_eq!(consecutive_failures, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_uses_retry_after() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let (agent, _runs) = scripted(vec![]);
        let (_waker, wake) = wake_channel();
        let poll = PollLoop::new(agent, wake, &ctx);

        let explicit = poll.next_backoff(Err(Error::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        }));
        assert_eq!(explicit.failures(), 0);
        assert_eq!(
            explicit.next_sleep(Duration::from_secs(900)),
            Duration::from_secs(30)
        );

        let defaulted = poll.next_backoff(Err(Error::RateLimited { retry_after: None }));
        assert_eq!(
            defaulted.next_sleep(Duration::from_secs(900)),
            Duration::from_secs(120)
        );
    }

    #[tokio::test]
    async fn test_cancelled_leaves_backoff_untouched() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let mut events = ctx.events.subscribe();
        let (agent, _runs) = scripted(vec![]);
        let (_waker, wake) = wake_channel();
        let mut poll = PollLoop::new(agent, wake, &ctx);
        poll.backoff = poll.next_backoff(Err(Error::TransientNetwork("down".into())));
        let _ = events.try_recv();

        let after = poll.next_backoff(Err(Error::Cancelled));
        assert_eq!(after, poll.backoff);
        assert_eq!(ctx.logs.len(), 1);
        assert!(events.try_recv().is_err());
    }
}
