//! Resolver service: the locked schedule engine plus its tick loop
//!
//! The resolver and the interrupt pacer share one mutex, so a full
//! filter, partition, compare and pace pass never interleaves with another
//! tick or with an action injected from outside.

use chrono::{Duration as ChronoDuration, Utc};
use signage_common::events::{AgentEvent, EventBus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::actions::ChangeMode;
use super::item::ScheduleItem;
use super::manifest::ScheduleManifest;
use super::resolver::{Resolution, ResolveContext, ScheduleChange, ScheduleResolver};
use crate::context::AgentContext;
use crate::error::Result;
use crate::interrupt::{InterruptDecision, InterruptPacer, InterruptSignal};
use crate::wake::{WakeReceiver, Waker};

struct Engine {
    resolver: ScheduleResolver,
    pacer: InterruptPacer,
    interrupts: Vec<ScheduleItem>,
    /// Last interrupt signal emitted, with the layout it named
    last_signal: Option<(InterruptSignal, Option<i64>)>,
}

/// Cloneable handle to the schedule engine
#[derive(Clone)]
pub struct ScheduleHandle {
    engine: Arc<Mutex<Engine>>,
    waker: Waker,
}

impl ScheduleHandle {
    pub fn new(resolver: ScheduleResolver, pacer: InterruptPacer, waker: Waker) -> Self {
        Self {
            engine: Arc::new(Mutex::new(Engine {
                resolver,
                pacer,
                interrupts: Vec::new(),
                last_signal: None,
            })),
            waker,
        }
    }

    /// Engine for `ctx`, with interrupt state loaded from the root folder
    pub fn from_context(ctx: &AgentContext, waker: Waker) -> Self {
        Self::new(
            ScheduleResolver::new(ChronoDuration::seconds(ctx.settings.command_lookahead_secs)),
            InterruptPacer::load(ctx.paths.interrupt_state()),
            waker,
        )
    }

    /// Request an immediate tick
    pub fn wake(&self) {
        self.waker.wake();
    }

    pub fn set_manifest(&self, manifest: ScheduleManifest) {
        self.engine().resolver.set_manifest(manifest);
        self.wake();
    }

    pub fn add_layout_action(
        &self,
        layout_id: i64,
        mode: ChangeMode,
        duration: Option<ChronoDuration>,
        required_plays: u32,
        ctx: &AgentContext,
    ) -> String {
        let id = self.engine().resolver.add_layout_action(
            layout_id,
            mode,
            duration,
            required_plays,
            ctx.local_now(),
        );
        self.wake();
        id
    }

    pub fn add_overlay_action(
        &self,
        layout_id: i64,
        duration: Option<ChronoDuration>,
        ctx: &AgentContext,
    ) -> String {
        let id = self
            .engine()
            .resolver
            .add_overlay_action(layout_id, duration, ctx.local_now());
        self.wake();
        id
    }

    pub fn revert_to_schedule(&self) {
        if self.engine().resolver.revert_to_schedule() {
            info!("Reverted to scheduled playback");
        }
        self.wake();
    }

    /// Playback finished one run of a layout
    pub fn layout_played(&self, layout_id: i64, schedule_id: i64, action_id: Option<&str>) {
        let affects = self
            .engine()
            .resolver
            .layout_played(layout_id, schedule_id, action_id);
        if affects {
            self.wake();
        }
    }

    /// Playback spent `seconds` on an interrupt layout
    pub fn record_interrupt_seconds(&self, schedule_id: i64, seconds: u64) {
        self.engine()
            .pacer
            .record_seconds_played(schedule_id, seconds, Utc::now());
    }

    pub fn current_layouts(&self) -> Vec<ScheduleItem> {
        self.engine().resolver.current().to_vec()
    }

    /// Interrupt the playback layer should show next, if one is owed time
    pub fn next_interrupt(&self) -> Option<ScheduleItem> {
        let engine = self.engine();
        engine
            .pacer
            .next_interrupt(&engine.interrupts, Utc::now())
            .cloned()
    }

    pub fn save_interrupt_state(&self) -> Result<()> {
        self.engine().pacer.save()
    }

    /// One resolver tick, emitting events for whatever changed
    pub fn tick(&self, ctx: &AgentContext) -> Resolution {
        let (resolution, decision, emit_interrupt) = {
            let mut engine = self.engine();
            let resolve_ctx = ResolveContext {
                cache: &ctx.cache,
                location: ctx.location(),
                now: ctx.local_now(),
            };
            let resolution = engine.resolver.resolve(&resolve_ctx);
            let decision = engine.pacer.tick(&resolution.interrupts, Utc::now());
            engine.interrupts = resolution.interrupts.clone();

            let key = (decision.signal, decision.next.as_ref().map(|i| i.id));
            let emit = engine.last_signal != Some(key);
            engine.last_signal = Some(key);
            (resolution, decision, emit)
        };

        publish(&ctx.events, &resolution, &decision, emit_interrupt);
        if resolution.change == ScheduleChange::Changed {
            ctx.display
                .set_current_layout(resolution.layouts.first().map(|i| i.id));
        }
        resolution
    }
}

impl ScheduleHandle {
    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn publish(events: &EventBus, resolution: &Resolution, decision: &InterruptDecision, emit_interrupt: bool) {
    let now = Utc::now();
    let layouts = || resolution.layouts.iter().map(ScheduleItem::to_layout_ref).collect();

    match resolution.change {
        ScheduleChange::Changed => events.emit_lossy(AgentEvent::ScheduleChanged {
            layouts: layouts(),
            timestamp: now,
        }),
        ScheduleChange::RefreshOnly => events.emit_lossy(AgentEvent::ScheduleRefreshed {
            layouts: layouts(),
            timestamp: now,
        }),
        ScheduleChange::Unchanged => {}
    }

    if resolution.overlays_changed {
        events.emit_lossy(AgentEvent::OverlaysChanged {
            overlays: resolution
                .overlays
                .iter()
                .map(|o| o.item.to_overlay_ref(o.refresh))
                .collect(),
            timestamp: now,
        });
    }

    if emit_interrupt {
        let event = match (decision.signal, &decision.next) {
            (InterruptSignal::InterruptNow, Some(item)) => AgentEvent::InterruptNow {
                layout_id: item.id,
                schedule_id: item.schedule_id,
                timestamp: now,
            },
            (InterruptSignal::InterruptNow, None) | (InterruptSignal::PausePending, _) => {
                AgentEvent::InterruptPausePending { timestamp: now }
            }
            (InterruptSignal::End, _) => AgentEvent::InterruptEnd { timestamp: now },
        };
        events.emit_lossy(event);
    }

    for command in &resolution.commands {
        info!(code = %command.code, schedule_id = command.schedule_id, "Scheduled command due");
        events.emit_lossy(AgentEvent::CommandDue {
            code: command.code.clone(),
            schedule_id: command.schedule_id,
            timestamp: now,
        });
    }
}

/// Serialized resolver loop: ticks on the configured interval, on demand, and
/// whenever new content lands in the library
pub async fn run_resolver(handle: ScheduleHandle, ctx: AgentContext, mut wake: WakeReceiver) {
    let mut events = ctx.events.subscribe();
    let tick_every = ctx.settings.resolver_tick();
    info!(tick_secs = tick_every.as_secs(), "Schedule resolver started");

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        wake.reset();
        handle.tick(&ctx);

        if !wait_for_tick(&ctx, &mut wake, &mut events, tick_every).await {
            break;
        }
    }

    if let Err(e) = handle.save_interrupt_state() {
        warn!(error = %e, "Failed to persist interrupt state");
    }
    info!("Schedule resolver stopped");
}

/// Wait until the next tick is due. Returns false on stop.
async fn wait_for_tick(
    ctx: &AgentContext,
    wake: &mut WakeReceiver,
    events: &mut broadcast::Receiver<AgentEvent>,
    tick_every: Duration,
) -> bool {
    let sleep = tokio::time::sleep(tick_every);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return false,
            _ = wake.wait() => return true,
            _ = &mut sleep => return true,
            received = events.recv() => match received {
                Ok(AgentEvent::FileCompleted { id, .. }) => {
                    debug!(file_id = %id, "Re-resolving after file completed");
                    return true;
                }
                Ok(AgentEvent::FilesProvisioned { .. }) => return true,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Resolver lagged behind event bus");
                    return true;
                }
                Err(RecvError::Closed) => return false,
            },
        }
    }
}
