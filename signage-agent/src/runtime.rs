//! Agent runtime: wires the context, agents, resolver and background tasks
//! together and owns their lifetimes

use futures::future::join_all;
use signage_common::events::AgentEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agents::{
    FaultAgent, NeededFiles, PollLoop, RegistrationAgent, ReportAgent, RequiredFilesAgent,
    ScheduleAgent, SyncAgent, WidgetDataAgent, WidgetRegistry,
};
use crate::context::AgentContext;
use crate::error::Result;
use crate::push::{ForcedCollect, PushDispatcher};
use crate::schedule::{run_resolver, ScheduleHandle};
use crate::upstream::Upstream;
use crate::wake::{wake_channel, WakeReceiver, Waker};

pub struct AgentRuntime {
    ctx: AgentContext,
    schedule: ScheduleHandle,
    push: PushDispatcher,
    report_wakers: Vec<Waker>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentRuntime {
    /// Load persisted state and spawn every loop
    pub fn start(ctx: AgentContext, upstream: Arc<dyn Upstream>) -> Result<Self> {
        ctx.paths.ensure()?;

        let (registration_waker, registration_rx) = wake_channel();
        let (schedule_waker, schedule_rx) = wake_channel();
        let (files_waker, files_rx) = wake_channel();
        let (widget_waker, widget_rx) = wake_channel();
        let (fault_waker, fault_rx) = wake_channel();
        let (report_waker, report_rx) = wake_channel();
        let (resolver_waker, resolver_rx) = wake_channel();

        let schedule = ScheduleHandle::from_context(&ctx, resolver_waker);
        let widgets = WidgetRegistry::new();
        let needed = NeededFiles::default();

        let registration = RegistrationAgent::new(
            ctx.clone(),
            Arc::clone(&upstream),
            vec![schedule_waker.clone(), files_waker.clone(), widget_waker.clone()],
        );

        let mut schedule_agent =
            ScheduleAgent::new(ctx.clone(), Arc::clone(&upstream), schedule.clone());
        schedule_agent.load_persisted();

        let mut files_agent = RequiredFilesAgent::new(
            ctx.clone(),
            Arc::clone(&upstream),
            widgets.clone(),
            needed.clone(),
        );
        files_agent.load_persisted();

        let push = PushDispatcher::new(
            ctx.clone(),
            schedule.clone(),
            widgets.clone(),
            widget_waker,
            registration_waker,
            vec![
                ForcedCollect {
                    force: schedule_agent.force_flag(),
                    waker: schedule_waker,
                },
                ForcedCollect {
                    force: files_agent.force_flag(),
                    waker: files_waker.clone(),
                },
            ],
        );

        // Subscribe before any agent runs so no request is missed
        let needed_rx = ctx.events.subscribe();

        let mut tasks = vec![
            spawn_loop(registration, registration_rx, &ctx),
            spawn_loop(schedule_agent, schedule_rx, &ctx),
            spawn_loop(files_agent, files_rx, &ctx),
            spawn_loop(
                WidgetDataAgent::new(ctx.clone(), Arc::clone(&upstream), widgets),
                widget_rx,
                &ctx,
            ),
            spawn_loop(FaultAgent::new(ctx.clone(), Arc::clone(&upstream)), fault_rx, &ctx),
            spawn_loop(ReportAgent::new(ctx.clone(), upstream), report_rx, &ctx),
        ];
        tasks.push(tokio::spawn(run_resolver(
            schedule.clone(),
            ctx.clone(),
            resolver_rx,
        )));
        tasks.push(tokio::spawn(run_checkpoint(ctx.clone())));
        tasks.push(tokio::spawn(run_needed_bridge(
            ctx.clone(),
            needed_rx,
            needed,
            files_waker,
        )));

        info!(root = %ctx.paths.root().display(), tasks = tasks.len(), "Agent runtime started");
        Ok(Self {
            ctx,
            schedule,
            push,
            report_wakers: vec![fault_waker, report_waker],
            tasks,
        })
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn schedule(&self) -> &ScheduleHandle {
        &self.schedule
    }

    pub fn push(&self) -> &PushDispatcher {
        &self.push
    }

    /// Submit queued faults, logs and stats without waiting for the interval
    pub fn flush_reports(&self) {
        for waker in &self.report_wakers {
            waker.wake();
        }
    }

    /// Stop every loop, wait for them, then persist cache and interrupt state
    pub async fn shutdown(self) {
        info!("Agent runtime stopping");
        self.ctx.cancel.cancel();

        for joined in join_all(self.tasks).await {
            if let Err(e) = joined {
                warn!(error = %e, "Task ended abnormally");
            }
        }

        if let Err(e) = self.ctx.cache.save(&self.ctx.paths.cache_index()) {
            warn!(error = %e, "Failed to persist content cache");
        }
        if let Err(e) = self.schedule.save_interrupt_state() {
            warn!(error = %e, "Failed to persist interrupt state");
        }
        info!("Agent runtime stopped");
    }
}

fn spawn_loop<A>(agent: A, wake: WakeReceiver, ctx: &AgentContext) -> JoinHandle<()>
where
    A: SyncAgent + 'static,
{
    let poll = PollLoop::new(agent, wake, ctx);
    tokio::spawn(async move {
        poll.run().await;
    })
}

/// Periodically write the cache index so a crash loses little
async fn run_checkpoint(ctx: AgentContext) {
    let every = Duration::from_secs(ctx.settings.cache_checkpoint_secs.max(1));
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = interval.tick() => {
                let cache = Arc::clone(&ctx.cache);
                let index = ctx.paths.cache_index();
                match tokio::task::spawn_blocking(move || cache.save(&index)).await {
                    Ok(Ok(())) => debug!("Cache checkpoint written"),
                    Ok(Err(e)) => warn!(error = %e, "Cache checkpoint failed"),
                    Err(e) => warn!(error = %e, "Cache checkpoint task failed"),
                }
            }
        }
    }
}

/// Route `FileNeeded` events into the required-files agent's inbox
async fn run_needed_bridge(
    ctx: AgentContext,
    mut events: broadcast::Receiver<AgentEvent>,
    needed: NeededFiles,
    files_waker: Waker,
) {
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            received = events.recv() => match received {
                Ok(AgentEvent::FileNeeded { file }) => {
                    needed.push(file);
                    files_waker.wake();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Needed-file bridge lagged behind event bus");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
