use chrono::{DateTime, Utc};
use clipkeep_core::notify::{LogNotifier, Notifier, Warning};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct LastWarning {
    pub warning: Warning,
    pub message: &'static str,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Logs like `LogNotifier` and remembers enough to answer `health`.
#[derive(Debug, Default)]
pub struct StatusNotifier {
    log: LogNotifier,
    changes: AtomicU64,
    last: Mutex<Option<LastWarning>>,
}

impl StatusNotifier {
    pub fn changes(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }

    pub fn last_warning(&self) -> Option<LastWarning> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for StatusNotifier {
    fn feedback(&self) {
        self.changes.fetch_add(1, Ordering::Relaxed);
    }

    fn warn(&self, warning: Warning, detail: &str) {
        self.log.warn(warning, detail);
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(LastWarning {
            warning,
            message: warning.message(),
            detail: detail.to_string(),
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_latest_warning_and_counts_changes() {
        let n = StatusNotifier::default();
        n.feedback();
        n.feedback();
        n.warn(Warning::ReadFailed, "busy");
        n.warn(Warning::ProcessFailed, "disk full");
        assert_eq!(n.changes(), 2);
        let last = n.last_warning().unwrap();
        assert_eq!(last.warning, Warning::ProcessFailed);
        assert_eq!(last.detail, "disk full");
    }
}
