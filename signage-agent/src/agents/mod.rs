//! Periodic sync agents
//!
//! Every agent implements [`SyncAgent`] and is driven by its own
//! [`PollLoop`], which owns the wake receiver, the backoff state and the
//! stop check.

mod backoff;
mod poll_loop;
mod registration;
mod reporting;
mod required_files;
mod schedule;
mod widget_data;

pub use backoff::{Backoff, MAX_BACKOFF_MULTIPLIER};
pub use poll_loop::{PollLoop, SyncAgent};
pub use registration::RegistrationAgent;
pub use reporting::{FaultAgent, ReportAgent};
pub use required_files::{NeededFiles, RequiredFilesAgent};
pub use schedule::ScheduleAgent;
pub use widget_data::{WidgetDataAgent, WidgetRegistry};
