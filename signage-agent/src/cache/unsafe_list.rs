//! TTL-based denylist of content that faulted during playback
//!
//! Entries are evicted lazily: the first query after `created_at + ttl`
//! removes them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of item was reported unsafe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnsafeKind {
    Layout,
    Region,
    Widget,
    Media,
}

impl fmt::Display for UnsafeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnsafeKind::Layout => "layout",
            UnsafeKind::Region => "region",
            UnsafeKind::Widget => "widget",
            UnsafeKind::Media => "media",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsafeItem {
    pub kind: UnsafeKind,
    pub id: String,
    /// Owning layout, for regions and widgets that are only unsafe in context
    pub layout_id: Option<String>,
    pub code: i32,
    pub reason: String,
    pub ttl_seconds: i64,
    pub created_at: DateTime<Utc>,
}

impl UnsafeItem {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.ttl_seconds)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    fn same_key(&self, kind: UnsafeKind, id: &str, layout_id: Option<&str>) -> bool {
        self.kind == kind && self.id == id && self.layout_id.as_deref() == layout_id
    }

    fn matches(&self, kind: UnsafeKind, id: &str, layout_id: Option<&str>) -> bool {
        self.kind == kind
            && self.id == id
            && match layout_id {
                Some(layout) => self.layout_id.as_deref().map_or(true, |own| own == layout),
                None => true,
            }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnsafeList {
    items: Vec<UnsafeItem>,
}

impl UnsafeList {
    /// Insert or replace by (kind, id, layout_id)
    pub fn upsert(&mut self, item: UnsafeItem) {
        let layout = item.layout_id.clone();
        match self
            .items
            .iter_mut()
            .find(|existing| existing.same_key(item.kind, &item.id, layout.as_deref()))
        {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    /// Evict expired entries, then test for a remaining match
    ///
    /// An entry recorded without a layout matches any layout; an entry
    /// recorded for a layout only matches queries for that layout or queries
    /// that name no layout.
    pub fn is_unsafe(
        &mut self,
        kind: UnsafeKind,
        id: &str,
        layout_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        self.evict_expired(now);
        self.items.iter().any(|item| item.matches(kind, id, layout_id))
    }

    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.is_expired(now));
        before - self.items.len()
    }

    pub fn items(&self) -> &[UnsafeItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn item(kind: UnsafeKind, id: &str, layout: Option<&str>, ttl: i64) -> UnsafeItem {
        UnsafeItem {
            kind,
            id: id.to_string(),
            layout_id: layout.map(str::to_string),
            code: 5000,
            reason: "render failure".to_string(),
            ttl_seconds: ttl,
            created_at: t0(),
        }
    }

    #[test]
    fn test_ttl_expiry_evicts_on_query() {
        let mut list = UnsafeList::default();
        list.upsert(item(UnsafeKind::Media, "77", None, 5));

        assert!(list.is_unsafe(UnsafeKind::Media, "77", None, t0() + Duration::seconds(4)));
        assert_eq!(list.len(), 1);

        assert!(!list.is_unsafe(UnsafeKind::Media, "77", None, t0() + Duration::seconds(6)));
        assert!(list.is_empty());
    }

    #[test]
    fn test_upsert_replaces_same_key() {
        let mut list = UnsafeList::default();
        list.upsert(item(UnsafeKind::Widget, "3", Some("10"), 60));
        let mut again = item(UnsafeKind::Widget, "3", Some("10"), 600);
        again.reason = "timeout".to_string();
        list.upsert(again);
        list.upsert(item(UnsafeKind::Widget, "3", Some("11"), 60));

        assert_eq!(list.len(), 2);
        assert_eq!(list.items()[0].reason, "timeout");
    }

    #[test]
    fn test_layout_scoped_match() {
        let mut list = UnsafeList::default();
        list.upsert(item(UnsafeKind::Region, "r1", Some("10"), 60));

        assert!(list.is_unsafe(UnsafeKind::Region, "r1", Some("10"), t0()));
        assert!(!list.is_unsafe(UnsafeKind::Region, "r1", Some("11"), t0()));
        assert!(list.is_unsafe(UnsafeKind::Region, "r1", None, t0()));
        assert!(!list.is_unsafe(UnsafeKind::Media, "r1", None, t0()));
    }
}
