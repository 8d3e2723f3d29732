//! Required files: manifest parsing, diffing against the library, and
//! downloading what is missing

mod downloader;
pub mod manifest;
mod required_set;

pub use downloader::{DownloadOutcome, Downloader};
pub use manifest::{ManifestEntry, PurgeItem, RequiredFilesManifest, WidgetEntry};
pub use required_set::{DiffOptions, RequiredFile, RequiredFileSet};
