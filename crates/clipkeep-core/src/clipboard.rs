//! Capability traits for the native clipboard.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Text,
    Rtf,
    Html,
    Image,
    Files,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Format::Text => "text",
            Format::Rtf => "rtf",
            Format::Html => "html",
            Format::Image => "image",
            Format::Files => "files",
        };
        f.write_str(s)
    }
}

/// An image the platform layer has already written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCapture {
    pub path: PathBuf,
    /// Encoded size in bytes.
    pub size: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Rtf(String),
    Html(String),
    Image(ImageCapture),
    Files { paths: Vec<String>, size: u64 },
}

#[async_trait]
pub trait ClipboardSource: Send + Sync {
    async fn has(&self, format: Format) -> Result<bool>;
    /// Read `format`; the returned payload must match the requested format.
    async fn read(&self, format: Format) -> Result<Payload>;
    /// Platform fallback for image formats the primary check does not see.
    async fn read_secondary_image(&self) -> Result<Option<ImageCapture>> {
        Ok(None)
    }
}

#[async_trait]
pub trait ClipboardWriter: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<()>;
    async fn write_rtf(&self, rtf: &str, plain: Option<&str>) -> Result<()>;
    async fn write_html(&self, html: &str, plain: Option<&str>) -> Result<()>;
    async fn write_image(&self, path: &Path) -> Result<()>;
    async fn write_files(&self, paths: &[String]) -> Result<()>;
}

/// Pastes the clipboard into whichever application has keyboard focus.
#[async_trait]
pub trait Paster: Send + Sync {
    async fn paste(&self) -> Result<()>;
}

#[derive(Default)]
pub struct NoopClipboard;

#[async_trait]
impl ClipboardSource for NoopClipboard {
    async fn has(&self, _format: Format) -> Result<bool> {
        Ok(false)
    }
    async fn read(&self, format: Format) -> Result<Payload> {
        anyhow::bail!("{format} is not available")
    }
}

#[async_trait]
impl ClipboardWriter for NoopClipboard {
    async fn write_text(&self, _text: &str) -> Result<()> {
        Ok(())
    }
    async fn write_rtf(&self, _rtf: &str, _plain: Option<&str>) -> Result<()> {
        Ok(())
    }
    async fn write_html(&self, _html: &str, _plain: Option<&str>) -> Result<()> {
        Ok(())
    }
    async fn write_image(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
    async fn write_files(&self, _paths: &[String]) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Paster for NoopClipboard {
    async fn paste(&self) -> Result<()> {
        Ok(())
    }
}
