//! # Signage Agent
//!
//! On-device agent of a digital-signage player. Keeps the local content
//! library in step with the CMS and decides what should be on screen:
//!
//! - [`cache`]: hash-validated file registry and unsafe-content denylist
//! - [`files`]: required-files manifest diffing and the chunked downloader
//! - [`agents`]: poll loops for registration, schedule, files, widgets and reports
//! - [`schedule`]: time, priority and geo resolution with override actions
//! - [`interrupt`]: hourly share-of-voice pacing
//! - [`runtime`]: starts and stops all of the above

pub mod agents;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod interrupt;
pub mod push;
pub mod reporting;
pub mod runtime;
pub mod schedule;
pub mod status;
pub mod upstream;
pub mod wake;

pub use context::AgentContext;
pub use error::{Error, Result};
pub use runtime::AgentRuntime;
