mod common;

use clipkeep_core::debounce::{Debouncer, DEFAULT_DELAY};
use clipkeep_core::notify::{Notifier, RecordingNotifier};
use clipkeep_core::{
    CaptureOptions, CapturePipeline, GroupFilter, HistoryStore, MemStore, VisibleHistory,
};
use common::FakeClipboard;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn burst_of_changes_records_final_content_once() {
    let clipboard = Arc::new(FakeClipboard::default());
    let store = Arc::new(MemStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let pipeline = Arc::new(CapturePipeline::new(
        clipboard.clone(),
        store.clone(),
        VisibleHistory::shared(GroupFilter::All),
        notifier.clone(),
        CaptureOptions::default(),
    ));
    let hook = notifier.clone();
    let debouncer = Debouncer::new(DEFAULT_DELAY, pipeline).with_feedback(Arc::new(move || {
        hook.feedback();
    }));

    for word in ["d", "dr", "dra", "draft"] {
        clipboard.set_text(word);
        debouncer.notify();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(notifier.feedback_count(), 4);
    let stored = store.list(Default::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].search, "draft");
    assert!(notifier.warnings().is_empty());
}
