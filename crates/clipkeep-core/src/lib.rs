//! clipkeep-core: history record types, storage traits, and the clipboard capture pipeline

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

pub mod classify;
pub mod clipboard;
pub mod debounce;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod reader;
pub mod restore;
pub mod retention;
pub mod upsert;
pub mod vault;
pub mod view;

pub use error::{CaptureError, ReadError};
pub use pipeline::{CaptureOptions, CapturePipeline, Discard, PassOutcome};
pub use view::VisibleHistory;

pub type RecordId = String;

/// Content type of a history record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Text,
    Rtf,
    Html,
    Image,
    Files,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Text => "text",
            RecordKind::Rtf => "rtf",
            RecordKind::Html => "html",
            RecordKind::Image => "image",
            RecordKind::Files => "files",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(RecordKind::Text),
            "rtf" => Some(RecordKind::Rtf),
            "html" => Some(RecordKind::Html),
            "image" => Some(RecordKind::Image),
            "files" => Some(RecordKind::Files),
            _ => None,
        }
    }

    /// UI filter group; rich formats are shown alongside plain text.
    pub fn group(self) -> Group {
        match self {
            RecordKind::Text | RecordKind::Rtf | RecordKind::Html => Group::Text,
            RecordKind::Image => Group::Image,
            RecordKind::Files => Group::Files,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Subtype {
    Url,
    Email,
    Color,
    Path,
}

impl Subtype {
    pub fn as_str(self) -> &'static str {
        match self {
            Subtype::Url => "url",
            Subtype::Email => "email",
            Subtype::Color => "color",
            Subtype::Path => "path",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "url" => Some(Subtype::Url),
            "email" => Some(Subtype::Email),
            "color" => Some(Subtype::Color),
            "path" => Some(Subtype::Path),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    Text,
    Files,
    Image,
}

impl Group {
    pub fn as_str(self) -> &'static str {
        match self {
            Group::Text => "text",
            Group::Files => "files",
            Group::Image => "image",
        }
    }
}

/// Active group filter of the history list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupFilter {
    #[default]
    All,
    Text,
    Files,
    Image,
}

impl GroupFilter {
    pub fn admits(self, group: Group) -> bool {
        match self {
            GroupFilter::All => true,
            GroupFilter::Text => group == Group::Text,
            GroupFilter::Files => group == Group::Files,
            GroupFilter::Image => group == Group::Image,
        }
    }
}

/// Record payload: a string (text, rtf, html, image path) or a file list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ClipValue {
    Text(String),
    Files(Vec<String>),
}

impl ClipValue {
    /// Stable single-string form used for storage and equality.
    pub fn encode(&self) -> String {
        match self {
            ClipValue::Text(s) => s.clone(),
            // Vec<String> serialization cannot fail.
            ClipValue::Files(paths) => serde_json::to_string(paths).unwrap_or_default(),
        }
    }

    pub fn decode(kind: RecordKind, raw: String) -> Self {
        match kind {
            RecordKind::Files => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(paths) => ClipValue::Files(paths),
                Err(_) => ClipValue::Files(vec![raw]),
            },
            _ => ClipValue::Text(raw),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ClipValue::Text(s) => Some(s),
            ClipValue::Files(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub subtype: Option<Subtype>,
    pub group: Group,
    pub value: ClipValue,
    pub search: String,
    pub count: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub favorite: bool,
    pub note: Option<String>,
    #[serde(rename = "createTime")]
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn image_dims(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }
}

/// Type-specific equality rule used to find a previous capture of the same content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub kind: RecordKind,
    pub value: String,
    /// `(width, height, count)`; only set for images.
    pub image: Option<(u32, u32, u64)>,
}

impl DedupKey {
    pub fn for_record(record: &HistoryRecord) -> Self {
        let image = match (record.kind, record.image_dims()) {
            (RecordKind::Image, Some((w, h))) => Some((w, h, record.count)),
            _ => None,
        };
        Self {
            kind: record.kind,
            value: record.value.encode(),
            image,
        }
    }

    pub fn matches(&self, record: &HistoryRecord) -> bool {
        if record.kind != self.kind {
            return false;
        }
        if record.value.encode() == self.value {
            return true;
        }
        match (self.image, record.image_dims()) {
            (Some((w, h, count)), Some((rw, rh))) => w == rw && h == rh && count == record.count,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Query {
    pub filter: GroupFilter,
    pub contains: Option<String>,
    pub favorites_only: bool,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }
    /// Most recent record matching `key`, if any.
    async fn find_duplicate(&self, key: &DedupKey) -> anyhow::Result<Option<HistoryRecord>>;
    async fn insert(&self, record: &HistoryRecord) -> anyhow::Result<()>;
    /// Refresh `created_at` only.
    async fn touch(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<HistoryRecord>>;
    async fn list(&self, q: Query) -> anyhow::Result<Vec<HistoryRecord>>;
    async fn set_favorite(&self, id: &str, fav: bool) -> anyhow::Result<()>;
    async fn set_note(&self, id: &str, note: Option<&str>) -> anyhow::Result<()>;
    /// Returns the removed record.
    async fn delete(&self, id: &str) -> anyhow::Result<Option<HistoryRecord>>;
    async fn clear(&self) -> anyhow::Result<()>;
    // Retention: returns the removed records.
    async fn prune(
        &self,
        max_items: usize,
        keep_favorites: bool,
    ) -> anyhow::Result<Vec<HistoryRecord>>;
}

/// In-memory store, used by tests and `--memory` runs.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Vec<HistoryRecord>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<HistoryRecord>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<HistoryRecord>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn gen_id() -> RecordId {
    uuid::Uuid::new_v4().to_string()
}

#[async_trait]
impl HistoryStore for MemStore {
    async fn find_duplicate(&self, key: &DedupKey) -> anyhow::Result<Option<HistoryRecord>> {
        let v = self.read();
        Ok(v.iter()
            .filter(|r| key.matches(r))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn insert(&self, record: &HistoryRecord) -> anyhow::Result<()> {
        let mut v = self.write();
        if v.iter().any(|r| r.id == record.id) {
            anyhow::bail!("record {} already exists", record.id);
        }
        v.insert(0, record.clone());
        Ok(())
    }

    async fn touch(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        let mut v = self.write();
        if let Some(r) = v.iter_mut().find(|r| r.id == id) {
            r.created_at = at;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<HistoryRecord>> {
        Ok(self.read().iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, q: Query) -> anyhow::Result<Vec<HistoryRecord>> {
        let v = self.read();
        let needle = q.contains.as_ref().map(|s| s.to_lowercase());
        let mut items: Vec<HistoryRecord> = v
            .iter()
            .filter(|r| q.filter.admits(r.group))
            .filter(|r| !q.favorites_only || r.favorite)
            .filter(|r| match &needle {
                Some(s) => r.search.to_lowercase().contains(s),
                None => true,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = q.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn set_favorite(&self, id: &str, fav: bool) -> anyhow::Result<()> {
        if let Some(r) = self.write().iter_mut().find(|r| r.id == id) {
            r.favorite = fav;
        }
        Ok(())
    }

    async fn set_note(&self, id: &str, note: Option<&str>) -> anyhow::Result<()> {
        if let Some(r) = self.write().iter_mut().find(|r| r.id == id) {
            r.note = note.map(str::to_string);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<Option<HistoryRecord>> {
        let mut v = self.write();
        Ok(v.iter().position(|r| r.id == id).map(|pos| v.remove(pos)))
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.write().clear();
        Ok(())
    }

    async fn prune(
        &self,
        max_items: usize,
        keep_favorites: bool,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        let mut v = self.write();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut kept = 0usize;
        let (keep, removed): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *v).into_iter().partition(|r| {
                if keep_favorites && r.favorite {
                    return true;
                }
                kept += 1;
                kept <= max_items
            });
        *v = keep;
        Ok(removed)
    }
}

#[cfg(feature = "sqlite")]
mod sqlite_store;

#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteStore;

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: RecordKind, value: ClipValue) -> HistoryRecord {
        HistoryRecord {
            id: gen_id(),
            kind,
            subtype: None,
            group: kind.group(),
            value,
            search: String::new(),
            count: 0,
            width: None,
            height: None,
            favorite: false,
            note: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn group_follows_kind() {
        assert_eq!(RecordKind::Html.group(), Group::Text);
        assert_eq!(RecordKind::Rtf.group(), Group::Text);
        assert_eq!(RecordKind::Files.group(), Group::Files);
        assert_eq!(RecordKind::Image.group(), Group::Image);
    }

    #[test]
    fn files_value_encodes_as_json_array() {
        let v = ClipValue::Files(vec!["/a b".into(), "/c".into()]);
        let raw = v.encode();
        assert_eq!(raw, r#"["/a b","/c"]"#);
        assert_eq!(ClipValue::decode(RecordKind::Files, raw), v);
    }

    #[test]
    fn image_key_matches_on_dimensions() {
        let mut a = record(RecordKind::Image, ClipValue::Text("/tmp/a.png".into()));
        a.width = Some(100);
        a.height = Some(50);
        a.count = 2048;
        let mut b = a.clone();
        b.value = ClipValue::Text("/tmp/b.png".into());
        assert!(DedupKey::for_record(&b).matches(&a));
        b.width = Some(101);
        assert!(!DedupKey::for_record(&b).matches(&a));
    }

    #[test]
    fn text_key_is_scoped_by_kind() {
        let a = record(RecordKind::Text, ClipValue::Text("<b>x</b>".into()));
        let b = record(RecordKind::Html, ClipValue::Text("<b>x</b>".into()));
        assert!(!DedupKey::for_record(&b).matches(&a));
        assert!(DedupKey::for_record(&a).matches(&a));
    }

    #[test]
    fn record_serializes_with_external_field_names() {
        let r = record(RecordKind::Text, ClipValue::Text("hi".into()));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["type"], "text");
        assert_eq!(v["group"], "text");
        assert!(v.get("createTime").is_some());
    }
}
