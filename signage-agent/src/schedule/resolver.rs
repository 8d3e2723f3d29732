//! Schedule resolution
//!
//! Turns the manifest plus injected actions into what should be on screen
//! right now. Each call to [`ScheduleResolver::resolve`] is one tick:
//! filter, collapse cycle groups, partition by precedence, then compare with
//! what was shown last tick.

use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

use super::actions::{ActionItems, ChangeMode};
use super::commands::CommandTracker;
use super::cycle::CyclePlaybackState;
use super::item::ScheduleItem;
use super::manifest::{ScheduleCommand, ScheduleManifest};
use crate::cache::{ContentCache, UnsafeKind};

/// Inputs that vary per tick
pub struct ResolveContext<'a> {
    pub cache: &'a ContentCache,
    /// (latitude, longitude)
    pub location: Option<(f64, f64)>,
    pub now: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleChange {
    /// Something on screen is no longer scheduled; playback must switch
    Changed,
    /// Set changed but current playback may continue
    RefreshOnly,
    /// Identical to the last tick
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOverlay {
    pub item: ScheduleItem,
    /// Content hash changed since last tick; tear down and recreate
    pub refresh: bool,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub layouts: Vec<ScheduleItem>,
    pub change: ScheduleChange,
    pub overlays: Vec<ResolvedOverlay>,
    pub overlays_changed: bool,
    /// Admissible interrupt items for the pacer
    pub interrupts: Vec<ScheduleItem>,
    pub commands: Vec<ScheduleCommand>,
}

pub struct ScheduleResolver {
    manifest: ScheduleManifest,
    actions: ActionItems,
    cycles: CyclePlaybackState,
    commands: CommandTracker,
    group_sizes: HashMap<String, usize>,
    shown: Vec<ScheduleItem>,
    shown_overlays: Vec<ScheduleItem>,
    overlay_hashes: HashMap<(i64, i64), Option<String>>,
}

impl ScheduleResolver {
    pub fn new(command_lookahead: Duration) -> Self {
        Self {
            manifest: ScheduleManifest::default(),
            actions: ActionItems::new(),
            cycles: CyclePlaybackState::new(),
            commands: CommandTracker::new(command_lookahead),
            group_sizes: HashMap::new(),
            shown: Vec::new(),
            shown_overlays: Vec::new(),
            overlay_hashes: HashMap::new(),
        }
    }

    pub fn set_manifest(&mut self, manifest: ScheduleManifest) {
        self.manifest = manifest;
        let keys: Vec<&str> = self
            .manifest
            .layouts
            .iter()
            .filter_map(|i| i.cycle_group_key.as_deref())
            .collect();
        self.cycles.retain_groups(keys);
    }

    pub fn manifest(&self) -> &ScheduleManifest {
        &self.manifest
    }

    /// Items resolved on the last tick
    pub fn current(&self) -> &[ScheduleItem] {
        &self.shown
    }

    pub fn add_layout_action(
        &mut self,
        layout_id: i64,
        mode: ChangeMode,
        duration: Option<Duration>,
        required_plays: u32,
        now: NaiveDateTime,
    ) -> String {
        self.actions
            .add_layout(layout_id, mode, duration, required_plays, now)
    }

    pub fn add_overlay_action(
        &mut self,
        layout_id: i64,
        duration: Option<Duration>,
        now: NaiveDateTime,
    ) -> String {
        self.actions.add_overlay(layout_id, duration, now)
    }

    /// Drop every injected action. Returns true if there were any.
    pub fn revert_to_schedule(&mut self) -> bool {
        let had_actions = !self.actions.is_empty();
        self.actions.clear();
        had_actions
    }

    /// Playback finished one run of a layout. Returns true when the result
    /// affects resolution (an action was serviced or a cycle rotated).
    pub fn layout_played(&mut self, layout_id: i64, schedule_id: i64, action_id: Option<&str>) -> bool {
        if let Some(action_id) = action_id {
            return self.actions.record_play(action_id);
        }

        let Some(item) = self
            .shown
            .iter()
            .find(|i| i.id == layout_id && i.schedule_id == schedule_id)
        else {
            return false;
        };
        let Some(key) = item.cycle_group_key.clone() else {
            return false;
        };
        let group_len = self.group_sizes.get(&key).copied().unwrap_or(1);
        let required = item.cycle_play_count;
        self.cycles.record_play(&key, required, group_len);
        group_len > 1
    }

    pub fn resolve(&mut self, ctx: &ResolveContext) -> Resolution {
        self.actions.expire(ctx.now);

        let global = &self.manifest.global_dependents;
        let normal: Vec<&ScheduleItem> = self
            .manifest
            .layouts
            .iter()
            .filter(|i| !i.is_interrupt())
            .chain(self.actions.layouts())
            .filter(|i| admissible(i, global, ctx))
            .collect();
        let normal = collapse_cycles(normal, &self.cycles, &mut self.group_sizes);

        let mut layouts = partition(normal);
        if layouts.is_empty() {
            layouts.push(self.fallback(ctx));
        }

        let change = if self.shown.is_empty() || self.shown.iter().any(|s| !layouts.contains(s)) {
            ScheduleChange::Changed
        } else if self.shown == layouts {
            ScheduleChange::Unchanged
        } else {
            ScheduleChange::RefreshOnly
        };
        if change == ScheduleChange::Changed {
            debug!(
                layouts = ?layouts.iter().map(|i| i.id).collect::<Vec<_>>(),
                "Resolved schedule changed"
            );
        }
        self.shown = layouts.clone();

        let interrupts: Vec<ScheduleItem> = self
            .manifest
            .layouts
            .iter()
            .filter(|i| i.is_interrupt())
            .filter(|i| admissible(i, global, ctx))
            .cloned()
            .collect();

        let (overlays, overlays_changed) = self.resolve_overlays(ctx);

        let commands = self.commands.due(&self.manifest.commands, ctx.now);

        Resolution {
            layouts,
            change,
            overlays,
            overlays_changed,
            interrupts,
            commands,
        }
    }

    fn resolve_overlays(&mut self, ctx: &ResolveContext) -> (Vec<ResolvedOverlay>, bool) {
        let global = &self.manifest.global_dependents;
        let candidates: Vec<ScheduleItem> = self
            .manifest
            .overlays
            .iter()
            .chain(self.actions.overlays())
            .filter(|i| admissible(i, global, ctx))
            .cloned()
            .collect();
        let items = partition(candidates);

        let mut hashes = HashMap::with_capacity(items.len());
        let mut any_refresh = false;
        let overlays: Vec<ResolvedOverlay> = items
            .into_iter()
            .map(|item| {
                let key = (item.id, item.schedule_id);
                let hash = ctx.cache.stored_hash(&item.layout_file());
                let refresh = matches!(self.overlay_hashes.get(&key), Some(previous) if *previous != hash);
                any_refresh |= refresh;
                hashes.insert(key, hash);
                ResolvedOverlay { item, refresh }
            })
            .collect();
        self.overlay_hashes = hashes;

        let new_items: Vec<ScheduleItem> = overlays.iter().map(|o| o.item.clone()).collect();
        let changed = any_refresh
            || new_items.len() != self.shown_overlays.len()
            || self.shown_overlays.iter().any(|s| !new_items.contains(s));
        self.shown_overlays = new_items;

        (overlays, changed)
    }

    /// Default layout if it can play, otherwise the splash screen
    fn fallback(&self, ctx: &ResolveContext) -> ScheduleItem {
        match self.manifest.default_layout {
            Some(id) => {
                let item = ScheduleItem::new(id, 0);
                if ctx.cache.is_valid(&item.layout_file()) {
                    item
                } else {
                    trace!(layout_id = id, "Default layout not available, using splash");
                    ScheduleItem::splash()
                }
            }
            None => ScheduleItem::splash(),
        }
    }
}

/// Time window, content validity, unsafe denylist and geo-fence
fn admissible(item: &ScheduleItem, global_dependents: &[String], ctx: &ResolveContext) -> bool {
    if !item.is_current(ctx.now) {
        return false;
    }

    let layout_file = item.layout_file();
    if !ctx.cache.is_valid(&layout_file) {
        trace!(layout_id = item.id, "Excluded: layout file not valid");
        return false;
    }
    if let Some(missing) = item
        .dependents
        .iter()
        .chain(global_dependents)
        .find(|d| !ctx.cache.is_valid(d))
    {
        trace!(layout_id = item.id, dependent = %missing, "Excluded: dependent not valid");
        return false;
    }

    if ctx
        .cache
        .is_unsafe(UnsafeKind::Layout, &item.id.to_string(), None)
    {
        debug!(layout_id = item.id, "Excluded: layout marked unsafe");
        return false;
    }

    if item.is_geo_aware {
        let inside = match (&item.geo_fence, ctx.location) {
            (Some(fence), Some((lat, lng))) => fence.contains(lat, lng),
            _ => false,
        };
        if !inside {
            trace!(layout_id = item.id, "Excluded: outside geo-fence");
            return false;
        }
    }

    true
}

/// Replace each cycle group by its current member, at the position of the
/// group's first member
fn collapse_cycles(
    items: Vec<&ScheduleItem>,
    cycles: &CyclePlaybackState,
    group_sizes: &mut HashMap<String, usize>,
) -> Vec<ScheduleItem> {
    group_sizes.clear();
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());

    for item in &items {
        let Some(key) = item.cycle_group_key.as_deref() else {
            out.push((*item).clone());
            continue;
        };
        if !seen.insert(key) {
            continue;
        }
        let members: Vec<&ScheduleItem> = items
            .iter()
            .copied()
            .filter(|i| i.cycle_group_key.as_deref() == Some(key))
            .collect();
        group_sizes.insert(key.to_string(), members.len());
        if let Some(selected) = cycles.select(key, &members) {
            out.push(selected.clone());
        }
    }

    out
}

/// Overrides win outright; otherwise the highest priority tier at or above 1;
/// otherwise everything left
fn partition(items: Vec<ScheduleItem>) -> Vec<ScheduleItem> {
    if items.iter().any(|i| i.is_override) {
        return items.into_iter().filter(|i| i.is_override).collect();
    }
    match items.iter().map(|i| i.priority).max() {
        Some(top) if top >= 1 => items.into_iter().filter(|i| i.priority == top).collect(),
        _ => items,
    }
}
