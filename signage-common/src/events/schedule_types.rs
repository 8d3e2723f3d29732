//! Schedule and registration event payload types

use serde::{Deserialize, Serialize};

/// Display registration status returned by the CMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayStatus {
    /// Authorised; collection may proceed
    Ready,
    /// Registered but awaiting authorisation
    Waiting,
    /// Explicitly refused by the CMS
    Denied,
}

impl DisplayStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, DisplayStatus::Ready)
    }
}

/// Reference to a layout placed on screen by the resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRef {
    pub layout_id: i64,
    pub schedule_id: i64,
    /// Set when the layout was injected by a push action
    pub action_id: Option<String>,
}

/// Overlay placed on screen, with its teardown flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayRef {
    pub layout_id: i64,
    pub schedule_id: i64,
    /// Content hash changed since the last tick; playback must recreate it
    pub refresh: bool,
}
