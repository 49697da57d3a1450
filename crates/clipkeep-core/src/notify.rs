//! User-facing side effects of the pipeline.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    /// Every read attempt failed.
    ReadFailed,
    /// Content was read but could not be classified, matched or stored.
    ProcessFailed,
}

impl Warning {
    pub fn message(self) -> &'static str {
        match self {
            Warning::ReadFailed => "could not read the clipboard",
            Warning::ProcessFailed => "could not process clipboard content",
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Fired once per raw change notification, before any debouncing.
    fn feedback(&self) {}
    fn warn(&self, warning: Warning, detail: &str);
}

/// Reports through `tracing` only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn warn(&self, warning: Warning, detail: &str) {
        tracing::warn!(warning = ?warning, detail, "{}", warning.message());
    }
}

/// Keeps everything it is told; handy for status reporting and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    feedback: AtomicUsize,
    warnings: Mutex<Vec<Warning>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feedback_count(&self) -> usize {
        self.feedback.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last_warning(&self) -> Option<Warning> {
        self.warnings().last().copied()
    }
}

impl Notifier for RecordingNotifier {
    fn feedback(&self) {
        self.feedback.fetch_add(1, Ordering::SeqCst);
    }

    fn warn(&self, warning: Warning, _detail: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(warning);
    }
}
