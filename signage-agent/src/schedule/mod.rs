//! Schedule resolution engine
//!
//! Manifest parsing, per-tick resolution, injected actions, cycle groups,
//! scheduled commands and the service loop that ties them to the event bus.

pub mod actions;
mod commands;
mod cycle;
pub mod geo;
mod item;
pub mod manifest;
mod resolver;
mod service;

pub use actions::ChangeMode;
pub use item::{ScheduleItem, SPLASH_LAYOUT_ID};
pub use manifest::{ScheduleCommand, ScheduleManifest};
pub use resolver::{Resolution, ResolveContext, ResolvedOverlay, ScheduleChange, ScheduleResolver};
pub use service::{run_resolver, ScheduleHandle};
