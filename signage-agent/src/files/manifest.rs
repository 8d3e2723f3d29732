//! Required-files manifest parsing
//!
//! ```xml
//! <files>
//!   <file type="layout" id="10" path="10.xlf" saveAs="10.xlf" md5="..." size="1000" download="xmds"/>
//!   <file type="media" id="55" path="library/55.mp4" saveAs="55.mp4" md5="..." size="20480" download="http"/>
//!   <file type="resource" id="14" layoutid="10" regionid="3" mediaid="14" updated="1767225600"/>
//!   <file type="widget" id="99" updateInterval="60"/>
//!   <purge><item id="3" storedAs="3.jpg"/></purge>
//! </files>
//! ```

use roxmltree::{Document, Node};
use signage_common::events::FileKind;
use tracing::warn;

use crate::error::{Error, Result};

/// Hash-verified file (dependency, media or layout)
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub kind: FileKind,
    pub id: String,
    pub path: String,
    pub save_as: String,
    pub md5: String,
    pub size: u64,
    /// `download="http"`: fetch from the path directly instead of via the sync service
    pub http: bool,
}

/// Rendered widget HTML, valid while newer than `updated`
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
    pub id: String,
    pub layout_id: String,
    pub region_id: String,
    pub media_id: String,
    pub save_as: String,
    /// Unix timestamp of the last server-side change
    pub updated: i64,
}

/// Data widget refreshed on an interval
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetEntry {
    pub id: String,
    pub update_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEntry {
    File(FileEntry),
    Resource(ResourceEntry),
    Widget(WidgetEntry),
}

impl ManifestEntry {
    pub fn kind(&self) -> FileKind {
        match self {
            ManifestEntry::File(f) => f.kind,
            ManifestEntry::Resource(_) => FileKind::Resource,
            ManifestEntry::Widget(_) => FileKind::Widget,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ManifestEntry::File(f) => &f.id,
            ManifestEntry::Resource(r) => &r.id,
            ManifestEntry::Widget(w) => &w.id,
        }
    }
}

/// Library file the CMS wants removed
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeItem {
    pub id: String,
    pub stored_as: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequiredFilesManifest {
    pub entries: Vec<ManifestEntry>,
    pub purge: Vec<PurgeItem>,
}

impl RequiredFilesManifest {
    /// Parse the manifest document. A malformed document is an error; a
    /// malformed entry is logged and skipped.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml).map_err(|e| Error::InvalidManifest(e.to_string()))?;
        let root = doc.root_element();
        if root.tag_name().name() != "files" {
            return Err(Error::InvalidManifest(format!(
                "expected <files>, found <{}>",
                root.tag_name().name()
            )));
        }

        let mut manifest = RequiredFilesManifest::default();

        for node in root.children().filter(Node::is_element) {
            match node.tag_name().name() {
                "file" => match parse_entry(&node) {
                    Ok(entry) => manifest.entries.push(entry),
                    Err(e) => warn!(error = %e, "Skipping malformed required-file entry"),
                },
                "purge" => {
                    for item in node.children().filter(|n| n.has_tag_name("item")) {
                        match (item.attribute("id"), item.attribute("storedAs")) {
                            (Some(id), Some(stored_as)) if !stored_as.is_empty() => {
                                manifest.purge.push(PurgeItem {
                                    id: id.to_string(),
                                    stored_as: stored_as.to_string(),
                                })
                            }
                            _ => warn!("Skipping malformed purge item"),
                        }
                    }
                }
                other => warn!(element = %other, "Ignoring unknown required-files element"),
            }
        }

        Ok(manifest)
    }
}

fn parse_entry(node: &Node) -> Result<ManifestEntry> {
    let type_attr = required(node, "type")?;
    let kind = FileKind::parse(type_attr)
        .ok_or_else(|| Error::InvalidManifest(format!("unknown file type '{}'", type_attr)))?;
    let id = required(node, "id")?.to_string();

    match kind {
        FileKind::Widget => Ok(ManifestEntry::Widget(WidgetEntry {
            id,
            update_interval_secs: node
                .attribute("updateInterval")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0),
        })),
        FileKind::Resource => {
            let media_id = required(node, "mediaid")?.to_string();
            let save_as = node
                .attribute("saveAs")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}.htm", media_id));
            Ok(ManifestEntry::Resource(ResourceEntry {
                id,
                layout_id: required(node, "layoutid")?.to_string(),
                region_id: required(node, "regionid")?.to_string(),
                media_id,
                save_as,
                updated: node
                    .attribute("updated")
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0),
            }))
        }
        FileKind::Dependency | FileKind::Media | FileKind::Layout => {
            let size = required(node, "size")?
                .parse::<u64>()
                .map_err(|e| Error::InvalidManifest(format!("file {}: size: {}", id, e)))?;
            let path = node.attribute("path").unwrap_or_default().to_string();
            let save_as = node
                .attribute("saveAs")
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| path.clone());
            if save_as.is_empty() {
                return Err(Error::InvalidManifest(format!("file {} has no saveAs", id)));
            }
            Ok(ManifestEntry::File(FileEntry {
                kind,
                id,
                path,
                save_as,
                md5: required(node, "md5")?.to_ascii_lowercase(),
                size,
                http: node
                    .attribute("download")
                    .map_or(false, |d| d.eq_ignore_ascii_case("http")),
            }))
        }
    }
}

fn required<'a>(node: &Node<'a, '_>, name: &str) -> Result<&'a str> {
    node.attribute(name)
        .ok_or_else(|| Error::InvalidManifest(format!("missing attribute '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<files>
  <file type="layout" id="10" path="10.xlf" saveAs="10.xlf" md5="ABC" size="1000" download="xmds"/>
  <file type="media" id="55" path="library/55.mp4" saveAs="55.mp4" md5="def" size="20480" download="http"/>
  <file type="dependency" id="bundle.min.js" path="bundle.min.js" md5="012" size="12"/>
  <file type="resource" id="14" layoutid="10" regionid="3" mediaid="14" updated="1767225600"/>
  <file type="widget" id="99" updateInterval="60"/>
  <file type="media" id="broken"/>
  <purge><item id="3" storedAs="3.jpg"/></purge>
</files>"#;

    #[test]
    fn test_parse_all_kinds() {
        let manifest = RequiredFilesManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.entries.len(), 5);
        assert_eq!(manifest.purge, vec![PurgeItem { id: "3".into(), stored_as: "3.jpg".into() }]);

        match &manifest.entries[0] {
            ManifestEntry::File(f) => {
                assert_eq!(f.kind, FileKind::Layout);
                assert_eq!(f.md5, "abc");
                assert_eq!(f.size, 1000);
                assert!(!f.http);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &manifest.entries[1] {
            ManifestEntry::File(f) => assert!(f.http),
            other => panic!("unexpected {:?}", other),
        }
        match &manifest.entries[2] {
            ManifestEntry::File(f) => assert_eq!(f.save_as, "bundle.min.js"),
            other => panic!("unexpected {:?}", other),
        }
        match &manifest.entries[3] {
            ManifestEntry::Resource(r) => {
                assert_eq!(r.save_as, "14.htm");
                assert_eq!(r.updated, 1_767_225_600);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(manifest.entries[4].kind(), FileKind::Widget);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            RequiredFilesManifest::parse("<files><file"),
            Err(Error::InvalidManifest(_))
        ));
        assert!(matches!(
            RequiredFilesManifest::parse("<schedule/>"),
            Err(Error::InvalidManifest(_))
        ));
    }
}
