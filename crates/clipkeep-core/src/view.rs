use crate::{Group, GroupFilter, HistoryRecord};
use std::sync::{Arc, RwLock};

pub type SharedView = Arc<RwLock<VisibleHistory>>;

/// Entries kept in memory unless a caller picks another cap.
pub const DEFAULT_LIMIT: usize = 500;

/// The history list as a UI shows it: most recent first, one group filter,
/// at most `limit` entries.
#[derive(Debug)]
pub struct VisibleHistory {
    items: Vec<HistoryRecord>,
    filter: GroupFilter,
    limit: usize,
}

impl Default for VisibleHistory {
    fn default() -> Self {
        Self::new(GroupFilter::All)
    }
}

impl VisibleHistory {
    pub fn new(filter: GroupFilter) -> Self {
        Self::with_limit(filter, DEFAULT_LIMIT)
    }

    pub fn with_limit(filter: GroupFilter, limit: usize) -> Self {
        Self {
            items: Vec::new(),
            filter,
            limit: limit.max(1),
        }
    }

    pub fn shared(filter: GroupFilter) -> SharedView {
        Arc::new(RwLock::new(Self::new(filter)))
    }

    pub fn shared_with_limit(filter: GroupFilter, limit: usize) -> SharedView {
        Arc::new(RwLock::new(Self::with_limit(filter, limit)))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn filter(&self) -> GroupFilter {
        self.filter
    }

    /// Changing the filter invalidates the items; callers reload them.
    pub fn set_filter(&mut self, filter: GroupFilter, items: Vec<HistoryRecord>) {
        self.filter = filter;
        self.replace(items);
    }

    pub fn is_visible(&self, group: Group) -> bool {
        self.filter.admits(group)
    }

    pub fn items(&self) -> &[HistoryRecord] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&HistoryRecord> {
        self.items.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut HistoryRecord> {
        self.items.iter_mut().find(|r| r.id == id)
    }

    /// Oldest entries fall off the end once the cap is reached.
    pub fn push_front(&mut self, record: HistoryRecord) {
        self.items.insert(0, record);
        self.items.truncate(self.limit);
    }

    pub fn remove(&mut self, id: &str) -> Option<HistoryRecord> {
        let pos = self.items.iter().position(|r| r.id == id)?;
        Some(self.items.remove(pos))
    }

    pub fn replace(&mut self, items: Vec<HistoryRecord>) {
        let filter = self.filter;
        self.items = items
            .into_iter()
            .filter(|r| filter.admits(r.group))
            .take(self.limit)
            .collect();
    }

    /// Fold a store listing into the current entries.
    ///
    /// Entries already present win over listed ones with the same id, so
    /// a capture that landed while the listing was in flight is kept.
    pub fn merge(&mut self, items: Vec<HistoryRecord>) {
        let filter = self.filter;
        for record in items {
            if filter.admits(record.group) && self.get(&record.id).is_none() {
                self.items.push(record);
            }
        }
        self.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.items.truncate(self.limit);
    }
}

/// Read access that survives a poisoned lock.
pub fn read(view: &RwLock<VisibleHistory>) -> std::sync::RwLockReadGuard<'_, VisibleHistory> {
    view.read().unwrap_or_else(|e| e.into_inner())
}

pub fn write(view: &RwLock<VisibleHistory>) -> std::sync::RwLockWriteGuard<'_, VisibleHistory> {
    view.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{gen_id, ClipValue, RecordKind};
    use chrono::{Duration, Utc};

    fn record(kind: RecordKind, age_secs: i64) -> HistoryRecord {
        HistoryRecord {
            id: gen_id(),
            kind,
            subtype: None,
            group: kind.group(),
            value: ClipValue::Text(format!("v{age_secs}")),
            search: String::new(),
            count: 1,
            width: None,
            height: None,
            favorite: false,
            note: None,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn push_front_drops_oldest_past_limit() {
        let mut v = VisibleHistory::with_limit(GroupFilter::All, 2);
        let (a, b, c) = (
            record(RecordKind::Text, 3),
            record(RecordKind::Text, 2),
            record(RecordKind::Text, 1),
        );
        v.push_front(a);
        v.push_front(b.clone());
        v.push_front(c.clone());
        let ids: Vec<_> = v.items().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![c.id, b.id]);
    }

    #[test]
    fn replace_filters_and_caps() {
        let mut v = VisibleHistory::with_limit(GroupFilter::Text, 1);
        let text = record(RecordKind::Text, 1);
        v.replace(vec![
            record(RecordKind::Image, 0),
            text.clone(),
            record(RecordKind::Html, 2),
        ]);
        assert_eq!(v.len(), 1);
        assert_eq!(v.items()[0].id, text.id);
    }

    #[test]
    fn merge_keeps_entries_added_during_a_listing() {
        let mut v = VisibleHistory::new(GroupFilter::All);
        let older = record(RecordKind::Text, 10);
        v.set_filter(GroupFilter::Text, Vec::new());
        let fresh = record(RecordKind::Text, 0);
        v.push_front(fresh.clone());

        let mut stale = fresh.clone();
        stale.created_at = older.created_at;
        v.merge(vec![stale, older.clone(), record(RecordKind::Files, 5)]);

        let ids: Vec<_> = v.items().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![fresh.id.clone(), older.id]);
        assert_eq!(v.get(&fresh.id).unwrap().created_at, fresh.created_at);
    }
}
