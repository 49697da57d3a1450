//! Line-delimited JSON control protocol on 127.0.0.1.

use crate::status::StatusNotifier;
use anyhow::Result;
use clipkeep_core::clipboard::{ClipboardWriter, Paster};
use clipkeep_core::restore::restore;
use clipkeep_core::retention::{clear_history, delete_record, prune_history};
use clipkeep_core::view::{self, SharedView};
use clipkeep_core::{CapturePipeline, GroupFilter, HistoryStore, Query};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    Health,
    List {
        limit: Option<usize>,
    },
    /// Store-wide lookup within the active filter.
    Search {
        query: Option<String>,
        #[serde(default)]
        favorites: bool,
        limit: Option<usize>,
    },
    Filter {
        group: GroupFilter,
    },
    Copy {
        id: String,
        /// Also paste into the focused application.
        #[serde(default)]
        paste: bool,
    },
    Favorite {
        id: String,
        favorite: bool,
    },
    Note {
        id: String,
        note: Option<String>,
    },
    Delete {
        id: String,
    },
    Clear,
    /// Toggle storing and restoring rich text as plain text.
    Plain {
        on: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl Response<serde_json::Value> {
    fn ok(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

pub struct Daemon {
    pub store: Arc<dyn HistoryStore>,
    pub view: SharedView,
    pub pipeline: Arc<CapturePipeline>,
    pub writer: Arc<dyn ClipboardWriter>,
    pub paster: Arc<dyn Paster>,
    pub status: Arc<StatusNotifier>,
}

impl Daemon {
    /// Fill the visible list with the store's newest records for the active filter.
    ///
    /// Entries a capture pass adds while the listing runs are kept.
    pub async fn reload_view(&self) -> Result<()> {
        let (filter, limit) = {
            let v = view::read(&self.view);
            (v.filter(), v.limit())
        };
        let items = self
            .store
            .list(Query {
                filter,
                limit: Some(limit),
                ..Default::default()
            })
            .await?;
        view::write(&self.view).merge(items);
        Ok(())
    }

    pub async fn prune(&self, max_items: usize) -> Result<usize> {
        let removed =
            prune_history(&*self.store, self.pipeline.vault(), max_items, true).await?;
        if !removed.is_empty() {
            info!(removed = removed.len(), max_items, "pruned history");
            let mut v = view::write(&self.view);
            for record in &removed {
                v.remove(&record.id);
            }
        }
        Ok(removed.len())
    }

    pub async fn handle(&self, req: Request) -> Response<serde_json::Value> {
        match self.dispatch(req).await {
            Ok(data) => Response::ok(data),
            Err(e) => Response::err(e.to_string()),
        }
    }

    async fn dispatch(&self, req: Request) -> Result<serde_json::Value> {
        match req {
            Request::Health => {
                let (filter, items) = {
                    let v = view::read(&self.view);
                    (v.filter(), v.len())
                };
                Ok(serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "now": chrono::Utc::now().timestamp(),
                    "filter": filter,
                    "items": items,
                    "changes": self.status.changes(),
                    "copy_plain": self.pipeline.copy_plain(),
                    "last_warning": self.status.last_warning(),
                }))
            }
            Request::List { limit } => {
                let v = view::read(&self.view);
                let n = limit.unwrap_or(v.len());
                let items: Vec<_> = v.items().iter().take(n).collect();
                Ok(serde_json::to_value(items)?)
            }
            Request::Search {
                query,
                favorites,
                limit,
            } => {
                let (filter, cap) = {
                    let v = view::read(&self.view);
                    (v.filter(), v.limit())
                };
                let items = self
                    .store
                    .list(Query {
                        filter,
                        contains: query.filter(|q| !q.trim().is_empty()),
                        favorites_only: favorites,
                        limit: Some(limit.unwrap_or(cap)),
                    })
                    .await?;
                Ok(serde_json::to_value(items)?)
            }
            Request::Filter { group } => {
                view::write(&self.view).set_filter(group, Vec::new());
                self.reload_view().await?;
                let items = view::read(&self.view).len();
                Ok(serde_json::json!({ "filter": group, "items": items }))
            }
            Request::Copy { id, paste } => {
                let record = self
                    .store
                    .get(&id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("no record {id}"))?;
                restore(&record, &*self.writer, self.pipeline.copy_plain()).await?;
                debug!(id = %id, kind = record.kind.as_str(), "restored record to clipboard");
                if paste {
                    self.paster.paste().await?;
                }
                Ok(serde_json::json!({ "id": id, "pasted": paste }))
            }
            Request::Favorite { id, favorite } => {
                self.store.set_favorite(&id, favorite).await?;
                if let Some(r) = view::write(&self.view).get_mut(&id) {
                    r.favorite = favorite;
                }
                Ok(serde_json::json!({ "id": id, "favorite": favorite }))
            }
            Request::Note { id, note } => {
                let note = note.filter(|n| !n.trim().is_empty());
                self.store.set_note(&id, note.as_deref()).await?;
                if let Some(r) = view::write(&self.view).get_mut(&id) {
                    r.note = note.clone();
                }
                Ok(serde_json::json!({ "id": id, "note": note }))
            }
            Request::Delete { id } => {
                let deleted = delete_record(&*self.store, self.pipeline.vault(), &id).await?;
                let removed = view::write(&self.view).remove(&id).is_some() || deleted.is_some();
                Ok(serde_json::json!({ "id": id, "removed": removed }))
            }
            Request::Clear => {
                clear_history(&*self.store, self.pipeline.vault()).await?;
                view::write(&self.view).replace(Vec::new());
                info!("history cleared");
                Ok(serde_json::json!({ "cleared": true }))
            }
            Request::Plain { on } => {
                self.pipeline.set_copy_plain(on);
                info!(copy_plain = on, "copy-plain toggled");
                Ok(serde_json::json!({ "copy_plain": on }))
            }
        }
    }
}

pub async fn serve(listener: TcpListener, daemon: Arc<Daemon>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let d = daemon.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(d, stream).await {
                        warn!(error = %e, "client error");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept error"),
        }
    }
}

async fn handle_client(daemon: Arc<Daemon>, stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let resp = match serde_json::from_str::<Request>(&line) {
            Ok(req) => daemon.handle(req).await,
            Err(e) => Response::err(format!("bad request: {e}")),
        };
        let mut s = serde_json::to_string(&resp)?;
        s.push('\n');
        writer.write_all(s.as_bytes()).await?;
        writer.flush().await?;
    }
    debug!(%peer, "client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use clipkeep_core::clipboard::NoopClipboard;
    use clipkeep_core::{
        gen_id, CaptureOptions, ClipValue, DedupKey, HistoryRecord, MemStore, RecordKind,
        VisibleHistory,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, Semaphore};

    fn daemon() -> Daemon {
        daemon_with(Arc::new(MemStore::new()), Arc::new(NoopClipboard))
    }

    fn daemon_with(store: Arc<dyn HistoryStore>, paster: Arc<dyn Paster>) -> Daemon {
        let view = VisibleHistory::shared(GroupFilter::All);
        let status = Arc::new(StatusNotifier::default());
        let pipeline = Arc::new(CapturePipeline::new(
            Arc::new(NoopClipboard),
            store.clone(),
            view.clone(),
            status.clone(),
            CaptureOptions::default(),
        ));
        Daemon {
            store,
            view,
            pipeline,
            writer: Arc::new(NoopClipboard),
            paster,
            status,
        }
    }

    #[derive(Default)]
    struct CountingPaster(AtomicUsize);

    #[async_trait]
    impl Paster for CountingPaster {
        async fn paste(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Holds every listing until the test opens the gate.
    struct GatedStore {
        inner: MemStore,
        listed: Notify,
        gate: Semaphore,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: MemStore::new(),
                listed: Notify::new(),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl HistoryStore for GatedStore {
        async fn find_duplicate(&self, key: &DedupKey) -> anyhow::Result<Option<HistoryRecord>> {
            self.inner.find_duplicate(key).await
        }
        async fn insert(&self, record: &HistoryRecord) -> anyhow::Result<()> {
            self.inner.insert(record).await
        }
        async fn touch(&self, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
            self.inner.touch(id, at).await
        }
        async fn get(&self, id: &str) -> anyhow::Result<Option<HistoryRecord>> {
            self.inner.get(id).await
        }
        async fn list(&self, q: Query) -> anyhow::Result<Vec<HistoryRecord>> {
            let items = self.inner.list(q).await?;
            self.listed.notify_one();
            self.gate.acquire().await?.forget();
            Ok(items)
        }
        async fn set_favorite(&self, id: &str, fav: bool) -> anyhow::Result<()> {
            self.inner.set_favorite(id, fav).await
        }
        async fn set_note(&self, id: &str, note: Option<&str>) -> anyhow::Result<()> {
            self.inner.set_note(id, note).await
        }
        async fn delete(&self, id: &str) -> anyhow::Result<Option<HistoryRecord>> {
            self.inner.delete(id).await
        }
        async fn clear(&self) -> anyhow::Result<()> {
            self.inner.clear().await
        }
        async fn prune(
            &self,
            max_items: usize,
            keep_favorites: bool,
        ) -> anyhow::Result<Vec<HistoryRecord>> {
            self.inner.prune(max_items, keep_favorites).await
        }
    }

    fn record(kind: RecordKind, value: &str) -> HistoryRecord {
        HistoryRecord {
            id: gen_id(),
            kind,
            subtype: None,
            group: kind.group(),
            value: ClipValue::Text(value.into()),
            search: value.into(),
            count: value.len() as u64,
            width: None,
            height: None,
            favorite: false,
            note: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn filter_reloads_and_edits_follow_the_list() {
        let d = daemon();
        let text = record(RecordKind::Text, "alpha");
        let mut img = record(RecordKind::Image, "/v/a.png");
        img.width = Some(2);
        img.height = Some(2);
        d.store.insert(&text).await.unwrap();
        d.store.insert(&img).await.unwrap();
        d.reload_view().await.unwrap();
        assert_eq!(view::read(&d.view).len(), 2);

        let resp = d.handle(Request::Filter { group: GroupFilter::Text }).await;
        assert!(resp.ok);
        assert_eq!(view::read(&d.view).len(), 1);

        let resp = d
            .handle(Request::Favorite {
                id: text.id.clone(),
                favorite: true,
            })
            .await;
        assert!(resp.ok);
        assert!(view::read(&d.view).get(&text.id).unwrap().favorite);
        assert!(d.store.get(&text.id).await.unwrap().unwrap().favorite);

        d.handle(Request::Note {
            id: text.id.clone(),
            note: Some("  ".into()),
        })
        .await;
        assert_eq!(d.store.get(&text.id).await.unwrap().unwrap().note, None);

        let resp = d.handle(Request::List { limit: Some(10) }).await;
        assert_eq!(resp.data.unwrap().as_array().unwrap().len(), 1);

        let resp = d.handle(Request::Delete { id: text.id.clone() }).await;
        assert_eq!(resp.data.unwrap()["removed"], true);
        assert!(view::read(&d.view).is_empty());
    }

    #[tokio::test]
    async fn copy_of_unknown_record_is_an_error() {
        let d = daemon();
        let resp = d
            .handle(Request::Copy {
                id: "missing".into(),
                paste: false,
            })
            .await;
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("missing"));

        let rec = record(RecordKind::Text, "x");
        d.store.insert(&rec).await.unwrap();
        assert!(
            d.handle(Request::Copy {
                id: rec.id,
                paste: false
            })
            .await
            .ok
        );
    }

    #[tokio::test]
    async fn prune_trims_store_and_list() {
        let d = daemon();
        for i in 0..4 {
            let mut r = record(RecordKind::Text, &format!("c{i}"));
            r.created_at = chrono::Utc::now() - chrono::Duration::seconds(10 - i);
            d.store.insert(&r).await.unwrap();
        }
        d.reload_view().await.unwrap();
        assert_eq!(d.prune(2).await.unwrap(), 2);
        assert_eq!(view::read(&d.view).len(), 2);

        let health = d.handle(Request::Health).await.data.unwrap();
        assert_eq!(health["items"], 2);
        assert_eq!(health["filter"], "all");
    }

    #[tokio::test]
    async fn capture_during_filter_reload_is_not_lost() {
        let store = Arc::new(GatedStore::new());
        let d = daemon_with(store.clone(), Arc::new(NoopClipboard));
        let older = record(RecordKind::Text, "older");
        store.inner.insert(&older).await.unwrap();

        let fresh = record(RecordKind::Text, "fresh");
        let capture = async {
            store.listed.notified().await;
            clipkeep_core::upsert::upsert(&*d.store, &d.view, None, fresh.clone())
                .await
                .unwrap();
            store.gate.add_permits(1);
        };
        let filter = d.handle(Request::Filter {
            group: GroupFilter::Text,
        });
        let (resp, ()) = tokio::join!(filter, capture);
        assert!(resp.ok);

        let ids: Vec<_> = view::read(&d.view).items().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![fresh.id, older.id]);
    }

    #[tokio::test]
    async fn copy_pastes_only_when_asked() {
        let paster = Arc::new(CountingPaster::default());
        let d = daemon_with(Arc::new(MemStore::new()), paster.clone());
        let rec = record(RecordKind::Text, "x");
        d.store.insert(&rec).await.unwrap();

        let resp = d
            .handle(Request::Copy {
                id: rec.id.clone(),
                paste: false,
            })
            .await;
        assert_eq!(resp.data.unwrap()["pasted"], false);
        assert_eq!(paster.0.load(Ordering::SeqCst), 0);

        let resp = d.handle(Request::Copy { id: rec.id, paste: true }).await;
        assert!(resp.ok);
        assert_eq!(paster.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn search_respects_text_and_favorites() {
        let d = daemon();
        let a = record(RecordKind::Text, "release notes");
        let b = record(RecordKind::Text, "grocery list");
        d.store.insert(&a).await.unwrap();
        d.store.insert(&b).await.unwrap();
        d.store.set_favorite(&b.id, true).await.unwrap();

        let hits = d
            .handle(Request::Search {
                query: Some("NOTES".into()),
                favorites: false,
                limit: None,
            })
            .await
            .data
            .unwrap();
        assert_eq!(hits.as_array().unwrap().len(), 1);
        assert_eq!(hits[0]["id"], a.id);

        let favs = d
            .handle(Request::Search {
                query: None,
                favorites: true,
                limit: None,
            })
            .await
            .data
            .unwrap();
        assert_eq!(favs.as_array().unwrap().len(), 1);
        assert_eq!(favs[0]["id"], b.id);
    }

    #[tokio::test]
    async fn clear_and_plain_ops() {
        let d = daemon();
        d.store.insert(&record(RecordKind::Text, "a")).await.unwrap();
        d.reload_view().await.unwrap();

        assert!(d.handle(Request::Clear).await.ok);
        assert!(view::read(&d.view).is_empty());
        assert!(d.store.list(Query::default()).await.unwrap().is_empty());

        assert!(!d.pipeline.copy_plain());
        d.handle(Request::Plain { on: true }).await;
        assert!(d.pipeline.copy_plain());
        let health = d.handle(Request::Health).await.data.unwrap();
        assert_eq!(health["copy_plain"], true);
    }

    #[test]
    fn parses_tagged_requests() {
        let r: Request = serde_json::from_str(r#"{"op":"filter","group":"image"}"#).unwrap();
        assert!(matches!(r, Request::Filter { group: GroupFilter::Image }));
        let r: Request = serde_json::from_str(r#"{"op":"list"}"#).unwrap();
        assert!(matches!(r, Request::List { limit: None }));
        let r: Request =
            serde_json::from_str(r#"{"op":"favorite","id":"a","favorite":true}"#).unwrap();
        assert!(matches!(r, Request::Favorite { favorite: true, .. }));
        let r: Request = serde_json::from_str(r#"{"op":"copy","id":"a"}"#).unwrap();
        assert!(matches!(r, Request::Copy { paste: false, .. }));
        let r: Request = serde_json::from_str(r#"{"op":"plain","on":true}"#).unwrap();
        assert!(matches!(r, Request::Plain { on: true }));
        assert!(matches!(
            serde_json::from_str::<Request>(r#"{"op":"clear"}"#).unwrap(),
            Request::Clear
        ));
        assert!(serde_json::from_str::<Request>(r#"{"op":"explode"}"#).is_err());
    }
}
