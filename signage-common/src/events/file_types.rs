//! Required-file event payload types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a required file, as listed in the required-files manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Player bundle / font / script shared by all layouts
    Dependency,
    /// Image, video or other media item
    Media,
    /// Layout definition (`<id>.xlf`)
    Layout,
    /// Pre-rendered widget HTML fetched as one response
    Resource,
    /// Data widget refreshed on an interval rather than by hash
    Widget,
}

impl FileKind {
    /// Manifest `type` attribute value
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Dependency => "dependency",
            FileKind::Media => "media",
            FileKind::Layout => "layout",
            FileKind::Resource => "resource",
            FileKind::Widget => "widget",
        }
    }

    /// Parse a manifest `type` attribute value (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "dependency" => Some(FileKind::Dependency),
            "media" => Some(FileKind::Media),
            "layout" => Some(FileKind::Layout),
            "resource" => Some(FileKind::Resource),
            "widget" => Some(FileKind::Widget),
            _ => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file some other component discovered it needs (e.g. media referenced
/// by refreshed widget data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeededFile {
    pub kind: FileKind,
    pub id: String,
    /// Remote path or URL hint for the upstream
    pub path: String,
    /// Local file name under the library
    pub save_as: String,
    pub md5: String,
    pub size: u64,
}
