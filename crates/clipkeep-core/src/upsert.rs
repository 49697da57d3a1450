//! Dedup matching against stored history, and the matching list update.

use crate::retention::release_image;
use crate::vault::ImageVault;
use crate::view::{self, VisibleHistory};
use crate::{ClipValue, DedupKey, HistoryRecord, HistoryStore, RecordId, RecordKind};
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    Inserted(RecordId),
    /// An earlier record matched; only its timestamp moved.
    Refreshed(RecordId),
}

/// The record as it is written to the store: images point at their durable copy.
pub async fn storage_projection(
    record: &HistoryRecord,
    vault: Option<&ImageVault>,
) -> anyhow::Result<HistoryRecord> {
    let mut stored = record.clone();
    if record.kind == RecordKind::Image {
        if let ClipValue::Text(path) = &record.value {
            let path = Path::new(path);
            let durable = match vault {
                Some(vault) => vault.persist(path).await?,
                None => tokio::fs::canonicalize(path)
                    .await
                    .unwrap_or_else(|_| path.to_path_buf()),
            };
            stored.value = ClipValue::Text(durable.to_string_lossy().into_owned());
        }
    }
    Ok(stored)
}

pub async fn upsert(
    store: &dyn HistoryStore,
    view: &RwLock<VisibleHistory>,
    vault: Option<&ImageVault>,
    candidate: HistoryRecord,
) -> anyhow::Result<Upserted> {
    let stored = storage_projection(&candidate, vault).await?;
    let key = DedupKey::for_record(&stored);

    if let Some(existing) = store.find_duplicate(&key).await? {
        store.touch(&existing.id, candidate.created_at).await?;
        let mut entry = candidate;
        if existing.kind == RecordKind::Image && stored.value != existing.value {
            // The row keeps its own file; the copy just written has no owner.
            if let Some(vault) = vault {
                if let Err(e) = release_image(store, vault, &stored).await {
                    warn!(error = %e, "failed to drop duplicate image copy");
                }
            }
            entry.value = existing.value.clone();
        }
        let mut list = view::write(view);
        if list.is_visible(entry.group) {
            list.remove(&existing.id);
            entry.id = existing.id.clone();
            entry.favorite = existing.favorite;
            entry.note = existing.note;
            list.push_front(entry);
        }
        debug!(id = %existing.id, kind = existing.kind.as_str(), "refreshed existing record");
        return Ok(Upserted::Refreshed(existing.id));
    }

    let id = candidate.id.clone();
    let shown = {
        let mut list = view::write(view);
        if list.is_visible(candidate.group) {
            list.push_front(candidate);
            true
        } else {
            false
        }
    };
    if let Err(e) = store.insert(&stored).await {
        if shown {
            view::write(view).remove(&id);
        }
        return Err(e);
    }
    debug!(id = %id, kind = stored.kind.as_str(), shown, "inserted new record");
    Ok(Upserted::Inserted(id))
}
