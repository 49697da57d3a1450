//! Multi-format clipboard reader.
//!
//! Formats are read in a fixed order. Each format may fail on its own; whether
//! that failure sinks the whole attempt depends on what was already captured
//! earlier in the same attempt. A fatal attempt is retried as a whole.

use crate::clipboard::{ClipboardSource, Format, ImageCapture, Payload};
use crate::error::{CaptureError, ReadError};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured<T> {
    pub count: u64,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub count: u64,
    pub value: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl From<ImageCapture> for CapturedImage {
    fn from(img: ImageCapture) -> Self {
        Self {
            count: img.size,
            value: img.path,
            width: img.width,
            height: img.height,
        }
    }
}

/// Result of one read attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    pub text: Option<Captured<String>>,
    pub rtf: Option<Captured<String>>,
    pub html: Option<Captured<String>>,
    pub image: Option<CapturedImage>,
    pub files: Option<Captured<Vec<String>>>,
}

impl ClipboardSnapshot {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.rtf.is_none()
            && self.html.is_none()
            && self.image.is_none()
            && self.files.is_none()
    }

    fn has_textual(&self) -> bool {
        self.text.is_some() || self.html.is_some() || self.rtf.is_some()
    }

    /// Rich formats share the text's length when text came along.
    fn rich_count(&self, own: &str) -> u64 {
        match &self.text {
            Some(t) => t.count,
            None => own.chars().count() as u64,
        }
    }

    fn fold(&mut self, format: Format, payload: Payload) -> anyhow::Result<()> {
        match (format, payload) {
            (Format::Text, Payload::Text(value)) => {
                let count = value.chars().count() as u64;
                self.text = Some(Captured { count, value });
            }
            (Format::Rtf, Payload::Rtf(value)) => {
                let count = self.rich_count(&value);
                self.rtf = Some(Captured { count, value });
            }
            (Format::Html, Payload::Html(value)) => {
                let count = self.rich_count(&value);
                self.html = Some(Captured { count, value });
            }
            (Format::Image, Payload::Image(img)) => {
                self.image = Some(img.into());
            }
            (Format::Files, Payload::Files { paths, size }) => {
                self.files = Some(Captured {
                    count: size,
                    value: paths,
                });
            }
            (format, other) => {
                anyhow::bail!("reader returned {:?} for {format}", kind_of(&other));
            }
        }
        Ok(())
    }
}

fn kind_of(payload: &Payload) -> Format {
    match payload {
        Payload::Text(_) => Format::Text,
        Payload::Rtf(_) => Format::Rtf,
        Payload::Html(_) => Format::Html,
        Payload::Image(_) => Format::Image,
        Payload::Files { .. } => Format::Files,
    }
}

struct FormatRule {
    format: Format,
    /// Whether a failure of this format can be skipped given what was read so far.
    tolerated_if: fn(&ClipboardSnapshot) -> bool,
}

fn never(_: &ClipboardSnapshot) -> bool {
    false
}

fn text_captured(s: &ClipboardSnapshot) -> bool {
    s.text.is_some()
}

fn textual_captured(s: &ClipboardSnapshot) -> bool {
    s.has_textual()
}

fn anything_captured(s: &ClipboardSnapshot) -> bool {
    s.has_textual() || s.image.is_some()
}

const RULES: [FormatRule; 5] = [
    FormatRule {
        format: Format::Text,
        tolerated_if: never,
    },
    FormatRule {
        format: Format::Rtf,
        tolerated_if: text_captured,
    },
    FormatRule {
        format: Format::Html,
        tolerated_if: text_captured,
    },
    FormatRule {
        format: Format::Image,
        tolerated_if: textual_captured,
    },
    FormatRule {
        format: Format::Files,
        tolerated_if: anything_captured,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(200),
        }
    }
}

/// One read attempt over every supported format.
pub async fn read_snapshot(source: &dyn ClipboardSource) -> Result<ClipboardSnapshot, ReadError> {
    let mut snapshot = ClipboardSnapshot::default();
    for rule in RULES.iter() {
        match read_format(source, rule.format, &mut snapshot).await {
            Ok(()) => {}
            Err(err) if (rule.tolerated_if)(&snapshot) => {
                warn!(format = %rule.format, error = %err, "skipping unreadable clipboard format");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(snapshot)
}

async fn read_format(
    source: &dyn ClipboardSource,
    format: Format,
    snapshot: &mut ClipboardSnapshot,
) -> Result<(), ReadError> {
    let wrap = |source: anyhow::Error| ReadError::Format { format, source };
    if !source.has(format).await.map_err(wrap)? {
        if format == Format::Image {
            if let Some(img) = source.read_secondary_image().await.map_err(wrap)? {
                if img.size > 0 {
                    debug!(path = %img.path.display(), size = img.size, "image found by secondary reader");
                    snapshot.image = Some(img.into());
                }
            }
        }
        return Ok(());
    }
    let payload = source.read(format).await.map_err(wrap)?;
    snapshot.fold(format, payload).map_err(wrap)
}

/// Read with whole-attempt retries; no partial snapshot survives a total failure.
pub async fn read_with_retry(
    source: &dyn ClipboardSource,
    policy: RetryPolicy,
) -> Result<ClipboardSnapshot, CaptureError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match read_snapshot(source).await {
            Ok(snapshot) => {
                if attempt > 1 {
                    debug!(attempt, "clipboard read succeeded after retry");
                }
                return Ok(snapshot);
            }
            Err(err) if attempt < attempts => {
                debug!(attempt, error = %err, "clipboard read failed; retrying");
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => {
                return Err(CaptureError::ExhaustedRetries {
                    attempts,
                    source: err,
                })
            }
        }
    }
}
