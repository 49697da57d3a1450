//! Read → classify → match/upsert, with failures contained to one pass.

use crate::classify::classify;
use crate::clipboard::ClipboardSource;
use crate::debounce::Pass;
use crate::error::CaptureError;
use crate::notify::{Notifier, Warning};
use crate::reader::{read_with_retry, RetryPolicy};
use crate::upsert::{upsert, Upserted};
use crate::vault::ImageVault;
use crate::view::SharedView;
use crate::{HistoryStore, RecordId};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

pub use crate::classify::Discard;

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub retry: RetryPolicy,
    /// Store HTML/RTF content as plain text.
    pub copy_plain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Inserted(RecordId),
    Refreshed(RecordId),
    Discarded(Discard),
}

pub struct CapturePipeline {
    source: Arc<dyn ClipboardSource>,
    store: Arc<dyn HistoryStore>,
    view: SharedView,
    notifier: Arc<dyn Notifier>,
    vault: Option<ImageVault>,
    retry: RetryPolicy,
    copy_plain: AtomicBool,
}

impl CapturePipeline {
    pub fn new(
        source: Arc<dyn ClipboardSource>,
        store: Arc<dyn HistoryStore>,
        view: SharedView,
        notifier: Arc<dyn Notifier>,
        options: CaptureOptions,
    ) -> Self {
        Self {
            source,
            store,
            view,
            notifier,
            vault: None,
            retry: options.retry,
            copy_plain: AtomicBool::new(options.copy_plain),
        }
    }

    pub fn with_vault(mut self, vault: ImageVault) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn vault(&self) -> Option<&ImageVault> {
        self.vault.as_ref()
    }

    pub fn copy_plain(&self) -> bool {
        self.copy_plain.load(Ordering::Relaxed)
    }

    pub fn set_copy_plain(&self, on: bool) {
        self.copy_plain.store(on, Ordering::Relaxed);
    }

    pub fn view(&self) -> &SharedView {
        &self.view
    }

    /// One pass; errors are returned, not reported.
    pub async fn process(&self) -> Result<PassOutcome, CaptureError> {
        let snapshot = read_with_retry(&*self.source, self.retry).await?;
        let record = match classify(&snapshot, self.copy_plain()).await {
            Ok(record) => record,
            Err(Discard::Unclassified) => {
                debug!("clipboard holds nothing to record");
                return Ok(PassOutcome::Discarded(Discard::Unclassified));
            }
            Err(Discard::EmptyImage) => {
                info!("ignoring zero-byte image capture");
                return Ok(PassOutcome::Discarded(Discard::EmptyImage));
            }
        };
        let outcome = upsert(&*self.store, &self.view, self.vault.as_ref(), record)
            .await
            .map_err(CaptureError::Processing)?;
        Ok(match outcome {
            Upserted::Inserted(id) => PassOutcome::Inserted(id),
            Upserted::Refreshed(id) => PassOutcome::Refreshed(id),
        })
    }

    /// One pass with failures logged and surfaced as a single warning.
    pub async fn run_pass(&self) -> Option<PassOutcome> {
        match self.process().await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                let warning = match err {
                    CaptureError::ExhaustedRetries { .. } => Warning::ReadFailed,
                    CaptureError::Processing(_) => Warning::ProcessFailed,
                };
                error!(error = %err, "capture pass failed");
                self.notifier.warn(warning, &err.to_string());
                None
            }
        }
    }
}

#[async_trait]
impl Pass for CapturePipeline {
    async fn run(&self) {
        self.run_pass().await;
    }
}
