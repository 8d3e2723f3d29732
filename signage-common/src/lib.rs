//! # Signage Common Library
//!
//! Shared code for the signage player agent including:
//! - Error and Result types
//! - Event types (AgentEvent enum) and the EventBus
//! - Bootstrap configuration loading and root folder resolution
//! - Hour-boundary time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
