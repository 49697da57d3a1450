//! Put a history record back on the clipboard.

use crate::clipboard::ClipboardWriter;
use crate::{ClipValue, HistoryRecord, RecordKind};
use std::path::Path;

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub async fn restore(
    record: &HistoryRecord,
    writer: &dyn ClipboardWriter,
    copy_plain: bool,
) -> anyhow::Result<()> {
    let text = match &record.value {
        ClipValue::Files(paths) => return writer.write_files(paths).await,
        ClipValue::Text(s) => s.as_str(),
    };
    match record.kind {
        RecordKind::Text => writer.write_text(text).await,
        RecordKind::Html | RecordKind::Rtf if copy_plain => {
            writer
                .write_text(non_empty(&record.search).unwrap_or(text))
                .await
        }
        RecordKind::Html => writer.write_html(text, non_empty(&record.search)).await,
        RecordKind::Rtf => writer.write_rtf(text, non_empty(&record.search)).await,
        RecordKind::Image => writer.write_image(Path::new(text)).await,
        RecordKind::Files => {
            // Older rows may hold a single bare path.
            writer.write_files(&[text.to_string()]).await
        }
    }
}
