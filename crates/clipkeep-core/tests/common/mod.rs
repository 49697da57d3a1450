#![allow(dead_code)]

use async_trait::async_trait;
use clipkeep_core::clipboard::{ClipboardSource, Format, ImageCapture, Payload};
use clipkeep_core::notify::RecordingNotifier;
use clipkeep_core::vault::ImageVault;
use clipkeep_core::view::SharedView;
use clipkeep_core::{
    CaptureOptions, CapturePipeline, GroupFilter, HistoryStore, MemStore, VisibleHistory,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Scriptable clipboard: set what is on it, optionally make the next reads fail.
#[derive(Default)]
pub struct FakeClipboard {
    formats: Mutex<HashMap<Format, Payload>>,
    failing_reads: AtomicU32,
}

impl FakeClipboard {
    pub fn set(&self, payloads: Vec<Payload>) {
        let mut f = self.formats.lock().unwrap();
        f.clear();
        for p in payloads {
            let format = match &p {
                Payload::Text(_) => Format::Text,
                Payload::Rtf(_) => Format::Rtf,
                Payload::Html(_) => Format::Html,
                Payload::Image(_) => Format::Image,
                Payload::Files { .. } => Format::Files,
            };
            f.insert(format, p);
        }
    }

    pub fn set_text(&self, s: &str) {
        self.set(vec![Payload::Text(s.to_string())]);
    }

    /// The next `n` read attempts fail on their first format check.
    pub fn fail_next(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClipboardSource for FakeClipboard {
    async fn has(&self, format: Format) -> anyhow::Result<bool> {
        if format == Format::Text {
            let left = self.failing_reads.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_reads.store(left - 1, Ordering::SeqCst);
                anyhow::bail!("clipboard is locked by another application");
            }
        }
        Ok(self.formats.lock().unwrap().contains_key(&format))
    }

    async fn read(&self, format: Format) -> anyhow::Result<Payload> {
        self.formats
            .lock()
            .unwrap()
            .get(&format)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{format} vanished"))
    }
}

pub fn image(path: PathBuf, width: u32, height: u32, size: u64) -> Payload {
    Payload::Image(ImageCapture {
        path,
        size,
        width,
        height,
    })
}

pub struct Harness {
    pub clipboard: Arc<FakeClipboard>,
    pub store: Arc<dyn HistoryStore>,
    pub view: SharedView,
    pub notifier: Arc<RecordingNotifier>,
    pub pipeline: CapturePipeline,
}

impl Harness {
    pub fn new(filter: GroupFilter, copy_plain: bool) -> Self {
        Self::with_store(Arc::new(MemStore::new()), filter, copy_plain)
    }

    pub fn with_store(store: Arc<dyn HistoryStore>, filter: GroupFilter, copy_plain: bool) -> Self {
        Self::from_parts(store, VisibleHistory::shared(filter), copy_plain, None)
    }

    pub fn with_vault(vault: ImageVault) -> Self {
        Self::from_parts(
            Arc::new(MemStore::new()),
            VisibleHistory::shared(GroupFilter::All),
            false,
            Some(vault),
        )
    }

    pub fn from_parts(
        store: Arc<dyn HistoryStore>,
        view: SharedView,
        copy_plain: bool,
        vault: Option<ImageVault>,
    ) -> Self {
        let clipboard = Arc::new(FakeClipboard::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let mut pipeline = CapturePipeline::new(
            clipboard.clone(),
            store.clone(),
            view.clone(),
            notifier.clone(),
            CaptureOptions {
                copy_plain,
                ..Default::default()
            },
        );
        if let Some(vault) = vault {
            pipeline = pipeline.with_vault(vault);
        }
        Self {
            clipboard,
            store,
            view,
            notifier,
            pipeline,
        }
    }

    pub fn view_ids(&self) -> Vec<String> {
        clipkeep_core::view::read(&self.view)
            .items()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    pub async fn stored(&self) -> Vec<clipkeep_core::HistoryRecord> {
        self.store.list(Default::default()).await.unwrap()
    }
}

/// Image files stored under a vault root.
pub fn vault_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(shards) = std::fs::read_dir(root) else {
        return out;
    };
    for shard in shards.flatten() {
        if let Ok(entries) = std::fs::read_dir(shard.path()) {
            out.extend(
                entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| p.extension().map(|e| e == "png").unwrap_or(false)),
            );
        }
    }
    out
}
