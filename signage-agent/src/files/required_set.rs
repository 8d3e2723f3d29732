//! Required-file set: the manifest diffed against the cache and the disk

use chrono::{DateTime, Duration, Utc};
use signage_common::events::{FileKind, NeededFile};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::manifest::{
    FileEntry, ManifestEntry, RequiredFilesManifest, ResourceEntry, WidgetEntry,
};
use crate::cache::{hashing, ContentCache};
use crate::upstream::{InventoryItem, ResourceRequest};

/// One file the display must hold
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredFile {
    pub kind: FileKind,
    pub id: String,
    pub path: String,
    pub save_as: String,
    pub md5: String,
    pub size: u64,
    pub chunk_offset: u64,
    pub chunk_size: u64,
    pub downloading: bool,
    pub complete: bool,
    pub retries: u32,
    pub http: bool,
    /// Only set for `resource` files
    pub resource: Option<ResourceRequest>,
}

impl RequiredFile {
    fn from_file_entry(entry: &FileEntry, chunk_size: u64) -> Self {
        Self {
            kind: entry.kind,
            id: entry.id.clone(),
            path: entry.path.clone(),
            save_as: entry.save_as.clone(),
            md5: entry.md5.clone(),
            size: entry.size,
            chunk_offset: 0,
            chunk_size,
            downloading: false,
            complete: false,
            retries: 0,
            http: entry.http,
            resource: None,
        }
    }

    fn from_resource_entry(entry: &ResourceEntry) -> Self {
        Self {
            kind: FileKind::Resource,
            id: entry.id.clone(),
            path: String::new(),
            save_as: entry.save_as.clone(),
            md5: String::new(),
            size: 0,
            chunk_offset: 0,
            chunk_size: 0,
            downloading: false,
            complete: false,
            retries: 0,
            http: false,
            resource: Some(ResourceRequest {
                layout_id: entry.layout_id.clone(),
                region_id: entry.region_id.clone(),
                media_id: entry.media_id.clone(),
            }),
        }
    }

    /// Chunk calls still needed to finish from the current offset
    pub fn remaining_chunks(&self) -> u64 {
        let remaining = self.size.saturating_sub(self.chunk_offset);
        if self.chunk_size == 0 {
            return 0;
        }
        remaining.div_ceil(self.chunk_size)
    }

    /// Waiting to be (re)downloaded
    pub fn is_pending(&self) -> bool {
        !self.complete && !self.downloading
    }
}

/// Tunables for [`RequiredFileSet::diff`]
#[derive(Debug, Clone, Copy)]
pub struct DiffOptions {
    pub chunk_size: u64,
    /// Partial files modified within this window are resumed
    pub resume_window: Duration,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            chunk_size: 512 * 1024,
            resume_window: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequiredFileSet {
    files: Vec<RequiredFile>,
    widgets: Vec<WidgetEntry>,
    provisioned_announced: bool,
}

impl RequiredFileSet {
    /// Build the set for `manifest`, queuing anything missing or stale
    ///
    /// Duplicate (kind, id) entries are dropped; the first occurrence wins.
    /// Purge entries are deleted from the library.
    pub fn diff(
        manifest: &RequiredFilesManifest,
        cache: &ContentCache,
        options: DiffOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let mut set = RequiredFileSet::default();
        let mut seen: HashSet<(FileKind, String)> = HashSet::new();

        for entry in &manifest.entries {
            if !seen.insert((entry.kind(), entry.id().to_string())) {
                debug!(kind = %entry.kind(), id = %entry.id(), "Duplicate manifest entry ignored");
                continue;
            }

            match entry {
                ManifestEntry::Widget(widget) => set.widgets.push(widget.clone()),
                ManifestEntry::Resource(resource) => {
                    set.files.push(diff_resource(resource, cache));
                }
                ManifestEntry::File(file) => {
                    set.files.push(diff_file(file, cache, options, now));
                }
            }
        }

        for item in &manifest.purge {
            let full = cache.full_path(&item.stored_as);
            match std::fs::remove_file(&full) {
                Ok(()) => info!(id = %item.id, file = %item.stored_as, "Purged library file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %item.stored_as, error = %e, "Unable to purge file"),
            }
            cache.remove(&item.stored_as);
        }

        info!(
            total = set.files.len(),
            queued = set.pending_count(),
            widgets = set.widgets.len(),
            "Required files diffed"
        );
        set
    }

    pub fn files(&self) -> &[RequiredFile] {
        &self.files
    }

    pub fn widgets(&self) -> &[WidgetEntry] {
        &self.widgets
    }

    pub fn get(&self, kind: FileKind, id: &str) -> Option<&RequiredFile> {
        self.files.iter().find(|f| f.kind == kind && f.id == id)
    }

    /// Files waiting to be downloaded
    pub fn pending(&self) -> Vec<RequiredFile> {
        self.files.iter().filter(|f| f.is_pending()).cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_pending()).count()
    }

    pub fn complete_count(&self) -> usize {
        self.files.iter().filter(|f| f.complete).count()
    }

    pub fn all_complete(&self) -> bool {
        self.files.iter().all(|f| f.complete)
    }

    /// Flag pending files as handed to a download worker
    pub fn mark_downloading(&mut self, kind: FileKind, id: &str) {
        if let Some(file) = self.find_mut(kind, id) {
            file.downloading = true;
        }
    }

    /// Store the state a download worker handed back
    pub fn update(&mut self, file: RequiredFile) {
        match self.find_mut(file.kind, &file.id) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    /// Release files whose worker vanished without reporting back
    pub fn clear_downloading(&mut self) {
        for file in self.files.iter_mut().filter(|f| f.downloading) {
            file.downloading = false;
        }
    }

    /// Returns true exactly once per set: the first time every file is complete
    pub fn check_provisioned(&mut self) -> bool {
        if self.provisioned_announced || !self.all_complete() {
            return false;
        }
        self.provisioned_announced = true;
        true
    }

    /// Queue a file discovered outside the manifest (e.g. widget media)
    ///
    /// Returns false when the file is already tracked or already valid.
    pub fn insert_needed(&mut self, needed: &NeededFile, cache: &ContentCache, chunk_size: u64) -> bool {
        if self.get(needed.kind, &needed.id).is_some() {
            return false;
        }

        let entry = FileEntry {
            kind: needed.kind,
            id: needed.id.clone(),
            path: needed.path.clone(),
            save_as: needed.save_as.clone(),
            md5: needed.md5.to_ascii_lowercase(),
            size: needed.size,
            http: false,
        };

        if cache.get_hash(&entry.save_as) == entry.md5 {
            return false;
        }
        self.provisioned_announced = false;
        self.files.push(RequiredFile::from_file_entry(&entry, chunk_size));
        true
    }

    /// Inventory report for the CMS
    pub fn inventory(&self, now: DateTime<Utc>) -> Vec<InventoryItem> {
        self.files
            .iter()
            .map(|f| InventoryItem {
                kind: f.kind,
                id: f.id.clone(),
                complete: f.complete,
                md5: f.md5.clone(),
                last_checked: now,
            })
            .collect()
    }

    fn find_mut(&mut self, kind: FileKind, id: &str) -> Option<&mut RequiredFile> {
        self.files.iter_mut().find(|f| f.kind == kind && f.id == id)
    }
}

fn diff_file(
    entry: &FileEntry,
    cache: &ContentCache,
    options: DiffOptions,
    now: DateTime<Utc>,
) -> RequiredFile {
    let mut file = RequiredFile::from_file_entry(entry, options.chunk_size);

    if cache.get_hash(&entry.save_as) == entry.md5 {
        file.complete = true;
        return file;
    }

    let full = cache.full_path(&entry.save_as);
    let metadata = match std::fs::metadata(&full) {
        Ok(metadata) => metadata,
        Err(_) => {
            debug!(id = %entry.id, file = %entry.save_as, "Required file absent, queued");
            return file;
        }
    };

    let current_size = metadata.len();
    let recently_modified = hashing::modified_at(&full)
        .map(|mtime| now - mtime < options.resume_window)
        .unwrap_or(false);

    if current_size < entry.size && recently_modified {
        file.chunk_offset = current_size;
        info!(
            id = %entry.id,
            file = %entry.save_as,
            offset = current_size,
            size = entry.size,
            "Resuming partial download"
        );
    } else {
        if let Err(e) = std::fs::remove_file(&full) {
            warn!(file = %entry.save_as, error = %e, "Unable to delete stale file");
        }
        cache.remove(&entry.save_as);
        info!(id = %entry.id, file = %entry.save_as, "Stale file deleted, restarting download");
    }

    file
}

fn diff_resource(entry: &ResourceEntry, cache: &ContentCache) -> RequiredFile {
    let mut file = RequiredFile::from_resource_entry(entry);
    let full = cache.full_path(&entry.save_as);

    let fresh = hashing::modified_at(&full)
        .map(|mtime| mtime.timestamp() >= entry.updated)
        .unwrap_or(false);

    if fresh {
        file.complete = true;
        if let Some(hash) = cache.stored_hash(&entry.save_as) {
            file.md5 = hash;
        }
    }
    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::hashing::md5_bytes;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn layout(id: &str, md5: &str, size: u64) -> ManifestEntry {
        ManifestEntry::File(FileEntry {
            kind: FileKind::Layout,
            id: id.to_string(),
            path: format!("{}.xlf", id),
            save_as: format!("{}.xlf", id),
            md5: md5.to_string(),
            size,
            http: false,
        })
    }

    fn manifest(entries: Vec<ManifestEntry>) -> RequiredFilesManifest {
        RequiredFilesManifest {
            entries,
            purge: Vec::new(),
        }
    }

    fn options() -> DiffOptions {
        DiffOptions {
            chunk_size: 100,
            resume_window: Duration::hours(24),
        }
    }

    #[test]
    fn test_absent_file_queued_from_zero() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path(), 60);
        let set = RequiredFileSet::diff(&manifest(vec![layout("10", "abc", 1000)]), &cache, options(), Utc::now());

        assert_eq!(set.files().len(), 1);
        let file = &set.files()[0];
        assert!(!file.complete);
        assert_eq!(file.chunk_offset, 0);
        assert_eq!(file.remaining_chunks(), 10);
        assert_eq!(set.pending_count(), 1);
    }

    #[test]
    fn test_matching_hash_is_complete_and_cached() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("10.xlf"), b"layout").unwrap();
        let cache = ContentCache::new(dir.path(), 60);
        let md5 = md5_bytes(b"layout");

        let set = RequiredFileSet::diff(&manifest(vec![layout("10", &md5, 6)]), &cache, options(), Utc::now());
        assert!(set.files()[0].complete);
        assert_eq!(cache.stored_hash("10.xlf"), Some(md5));
        assert!(set.all_complete());
    }

    #[test]
    fn test_recent_partial_file_resumes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("10.xlf"), vec![0u8; 250]).unwrap();
        let cache = ContentCache::new(dir.path(), 60);

        let set = RequiredFileSet::diff(&manifest(vec![layout("10", "abc", 1000)]), &cache, options(), Utc::now());
        let file = &set.files()[0];
        assert_eq!(file.chunk_offset, 250);
        assert_eq!(file.remaining_chunks(), 8);
        assert!(dir.path().join("10.xlf").exists());
    }

    #[test]
    fn test_old_partial_file_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("10.xlf");
        std::fs::write(&path, vec![0u8; 250]).unwrap();
        let old = SystemTime::now() - std::time::Duration::from_secs(48 * 3600);
        std::fs::File::options().write(true).open(&path).unwrap().set_modified(old).unwrap();
        let cache = ContentCache::new(dir.path(), 60);

        let set = RequiredFileSet::diff(&manifest(vec![layout("10", "abc", 1000)]), &cache, options(), Utc::now());
        assert_eq!(set.files()[0].chunk_offset, 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_full_size_wrong_hash_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("10.xlf");
        std::fs::write(&path, vec![1u8; 1000]).unwrap();
        let cache = ContentCache::new(dir.path(), 60);

        let set = RequiredFileSet::diff(&manifest(vec![layout("10", "abc", 1000)]), &cache, options(), Utc::now());
        assert_eq!(set.files()[0].chunk_offset, 0);
        assert!(!path.exists());
        assert!(cache.get("10.xlf").is_none());
    }

    #[test]
    fn test_duplicates_first_wins_and_widgets_split() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path(), 60);
        let entries = vec![
            layout("10", "first", 1000),
            layout("10", "second", 5),
            ManifestEntry::Widget(WidgetEntry {
                id: "99".to_string(),
                update_interval_secs: 60,
            }),
        ];

        let set = RequiredFileSet::diff(&manifest(entries), &cache, options(), Utc::now());
        assert_eq!(set.files().len(), 1);
        assert_eq!(set.files()[0].md5, "first");
        assert_eq!(set.widgets().len(), 1);
    }

    #[test]
    fn test_purge_deletes_file_and_cache_entry() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("3.jpg"), b"old").unwrap();
        let cache = ContentCache::new(dir.path(), 60);
        cache.add("3.jpg", "h");

        let mut m = manifest(Vec::new());
        m.purge.push(super::super::manifest::PurgeItem {
            id: "3".to_string(),
            stored_as: "3.jpg".to_string(),
        });
        RequiredFileSet::diff(&m, &cache, options(), Utc::now());

        assert!(!dir.path().join("3.jpg").exists());
        assert!(cache.get("3.jpg").is_none());
    }

    #[test]
    fn test_resource_freshness_by_updated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("14.htm"), b"<html/>").unwrap();
        let cache = ContentCache::new(dir.path(), 60);
        let resource = |updated| {
            ManifestEntry::Resource(ResourceEntry {
                id: "14".to_string(),
                layout_id: "10".to_string(),
                region_id: "3".to_string(),
                media_id: "14".to_string(),
                save_as: "14.htm".to_string(),
                updated,
            })
        };

        let fresh = RequiredFileSet::diff(&manifest(vec![resource(0)]), &cache, options(), Utc::now());
        assert!(fresh.files()[0].complete);

        let future = Utc::now().timestamp() + 3600;
        let stale = RequiredFileSet::diff(&manifest(vec![resource(future)]), &cache, options(), Utc::now());
        assert!(!stale.files()[0].complete);
        assert!(stale.files()[0].resource.is_some());
    }

    #[test]
    fn test_provisioned_reported_once() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(dir.path(), 60);
        let mut set = RequiredFileSet::diff(&manifest(vec![layout("10", "abc", 10)]), &cache, options(), Utc::now());
        assert!(!set.check_provisioned());

        let mut done = set.files()[0].clone();
        done.complete = true;
        set.update(done);
        assert!(set.check_provisioned());
        assert!(!set.check_provisioned());
    }
}
