//! Removing history rows together with the image files only they pointed at.

use crate::vault::ImageVault;
use crate::{DedupKey, GroupFilter, HistoryRecord, HistoryStore, Query, RecordKind};
use std::path::Path;
use tracing::{debug, warn};

/// Delete the vault copy behind `record` unless another row still uses it.
pub async fn release_image(
    store: &dyn HistoryStore,
    vault: &ImageVault,
    record: &HistoryRecord,
) -> anyhow::Result<bool> {
    if record.kind != RecordKind::Image {
        return Ok(false);
    }
    let Some(path) = record.value.as_text() else {
        return Ok(false);
    };
    let key = DedupKey {
        kind: RecordKind::Image,
        value: path.to_string(),
        image: None,
    };
    if store.find_duplicate(&key).await?.is_some() {
        return Ok(false);
    }
    let removed = vault.remove(Path::new(path)).await?;
    if removed {
        debug!(path, "released stored image");
    }
    Ok(removed)
}

async fn release_all(
    store: &dyn HistoryStore,
    vault: Option<&ImageVault>,
    records: &[HistoryRecord],
) {
    let Some(vault) = vault else { return };
    for record in records {
        if let Err(e) = release_image(store, vault, record).await {
            warn!(id = %record.id, error = %e, "failed to release stored image");
        }
    }
}

pub async fn delete_record(
    store: &dyn HistoryStore,
    vault: Option<&ImageVault>,
    id: &str,
) -> anyhow::Result<Option<HistoryRecord>> {
    let removed = store.delete(id).await?;
    if let Some(record) = &removed {
        release_all(store, vault, std::slice::from_ref(record)).await;
    }
    Ok(removed)
}

pub async fn prune_history(
    store: &dyn HistoryStore,
    vault: Option<&ImageVault>,
    max_items: usize,
    keep_favorites: bool,
) -> anyhow::Result<Vec<HistoryRecord>> {
    let removed = store.prune(max_items, keep_favorites).await?;
    release_all(store, vault, &removed).await;
    Ok(removed)
}

pub async fn clear_history(
    store: &dyn HistoryStore,
    vault: Option<&ImageVault>,
) -> anyhow::Result<()> {
    let images = match vault {
        Some(_) => {
            store
                .list(Query {
                    filter: GroupFilter::Image,
                    ..Default::default()
                })
                .await?
        }
        None => Vec::new(),
    };
    store.clear().await?;
    release_all(store, vault, &images).await;
    Ok(())
}
