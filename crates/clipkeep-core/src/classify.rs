//! Snapshot → history record.
//!
//! Format precedence is an ordered rule table over which formats are present
//! and the "copy as plain text" preference; the first rule that applies wins.

use crate::reader::ClipboardSnapshot;
use crate::{gen_id, ClipValue, HistoryRecord, RecordKind, Subtype};
use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Files,
    Html,
    Rtf,
    Text,
    Image,
    /// Plain text synthesized from HTML or RTF when copy-as-plain is on.
    PlainFromRich,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Presence {
    pub text: bool,
    pub rtf: bool,
    pub html: bool,
    pub image: bool,
    pub files: bool,
}

impl From<&ClipboardSnapshot> for Presence {
    fn from(s: &ClipboardSnapshot) -> Self {
        Self {
            text: s.text.is_some(),
            rtf: s.rtf.is_some(),
            html: s.html.is_some(),
            image: s.image.is_some(),
            files: s.files.is_some(),
        }
    }
}

type Rule = (Branch, fn(Presence, bool) -> bool);

const PRECEDENCE: [Rule; 6] = [
    (Branch::Files, |p, _| p.files),
    (Branch::Html, |p, plain| p.html && !plain),
    (Branch::Rtf, |p, plain| p.rtf && !plain),
    (Branch::Text, |p, _| p.text),
    (Branch::Image, |p, _| p.image),
    (Branch::PlainFromRich, |p, plain| plain && (p.html || p.rtf)),
];

pub fn decide(presence: Presence, copy_plain: bool) -> Option<Branch> {
    PRECEDENCE
        .iter()
        .find(|(_, applies)| applies(presence, copy_plain))
        .map(|(branch, _)| *branch)
}

/// Why a snapshot produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    Unclassified,
    /// Zero-byte image, usually read while the source app was still writing it.
    EmptyImage,
}

fn new_record(kind: RecordKind, value: ClipValue, search: String, count: u64) -> HistoryRecord {
    HistoryRecord {
        id: gen_id(),
        kind,
        subtype: None,
        group: kind.group(),
        value,
        search,
        count,
        width: None,
        height: None,
        favorite: false,
        note: None,
        created_at: Utc::now(),
    }
}

/// Build the record for `branch` without any I/O.
pub fn build(snapshot: &ClipboardSnapshot, branch: Branch) -> Option<HistoryRecord> {
    let plain = snapshot.text.as_ref().map(|t| t.value.clone());
    let record = match branch {
        Branch::Files => {
            let files = snapshot.files.as_ref()?;
            new_record(
                RecordKind::Files,
                ClipValue::Files(files.value.clone()),
                files.value.join(" "),
                files.count,
            )
        }
        Branch::Html => {
            let html = snapshot.html.as_ref()?;
            new_record(
                RecordKind::Html,
                ClipValue::Text(html.value.clone()),
                plain.unwrap_or_default(),
                html.count,
            )
        }
        Branch::Rtf => {
            let rtf = snapshot.rtf.as_ref()?;
            new_record(
                RecordKind::Rtf,
                ClipValue::Text(rtf.value.clone()),
                plain.unwrap_or_default(),
                rtf.count,
            )
        }
        Branch::Text => {
            let text = snapshot.text.as_ref()?;
            new_record(
                RecordKind::Text,
                ClipValue::Text(text.value.clone()),
                text.value.clone(),
                text.count,
            )
        }
        Branch::Image => {
            let image = snapshot.image.as_ref()?;
            let mut record = new_record(
                RecordKind::Image,
                ClipValue::Text(image.value.to_string_lossy().into_owned()),
                String::new(),
                image.count,
            );
            record.width = Some(image.width);
            record.height = Some(image.height);
            record
        }
        Branch::PlainFromRich => {
            let projection = plain
                .or_else(|| snapshot.html.as_ref().map(|h| h.value.clone()))
                .or_else(|| snapshot.rtf.as_ref().map(|r| r.value.clone()))?;
            let count = projection.chars().count() as u64;
            new_record(
                RecordKind::Text,
                ClipValue::Text(projection.clone()),
                projection,
                count,
            )
        }
    };
    Some(record)
}

/// Reduce a snapshot to exactly one record, or say why there is none.
pub async fn classify(
    snapshot: &ClipboardSnapshot,
    copy_plain: bool,
) -> Result<HistoryRecord, Discard> {
    let branch = decide(Presence::from(snapshot), copy_plain).ok_or(Discard::Unclassified)?;
    let mut record = build(snapshot, branch).ok_or(Discard::Unclassified)?;
    if record.kind == RecordKind::Image && record.count == 0 {
        return Err(Discard::EmptyImage);
    }
    if matches!(branch, Branch::Text | Branch::PlainFromRich) {
        if let Some(text) = record.value.as_text() {
            record.subtype = detect_subtype(text).await;
        }
    }
    debug!(?branch, kind = record.kind.as_str(), subtype = ?record.subtype, "classified clipboard content");
    Ok(record)
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:(?:https?|ftp|file)://|www\.)\S+$").expect("valid url regex")
    })
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
            .expect("valid email regex")
    })
}

fn color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)^(?:",
            r"#(?:[0-9a-f]{3,4}|[0-9a-f]{6}|[0-9a-f]{8})",
            r"|rgba?\(\s*\d{1,3}\s*,\s*\d{1,3}\s*,\s*\d{1,3}\s*(?:,\s*(?:0|1|0?\.\d+)\s*)?\)",
            r"|hsla?\(\s*\d{1,3}(?:deg)?\s*,\s*\d{1,3}%\s*,\s*\d{1,3}%\s*(?:,\s*(?:0|1|0?\.\d+)\s*)?\)",
            r")$"
        ))
        .expect("valid color regex")
    })
}

const MAX_PATH_LEN: usize = 4096;

async fn path_exists(candidate: &str) -> bool {
    if candidate.len() > MAX_PATH_LEN || candidate.contains('\n') {
        return false;
    }
    let path = Path::new(candidate);
    if !path.is_absolute() {
        return false;
    }
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// url → email → color → existing path; anything else has no subtype.
pub async fn detect_subtype(text: &str) -> Option<Subtype> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    if url_re().is_match(s) {
        Some(Subtype::Url)
    } else if email_re().is_match(s) {
        Some(Subtype::Email)
    } else if color_re().is_match(s) {
        Some(Subtype::Color)
    } else if path_exists(s).await {
        Some(Subtype::Path)
    } else {
        None
    }
}
