//! clipboard-rs adapter for the capture ports, plus the change watcher thread.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clipboard_rs::common::RustImage;
use clipboard_rs::{
    Clipboard, ClipboardContent, ClipboardContext, ClipboardHandler,
    ClipboardWatcher as _, ClipboardWatcherContext, ContentFormat, RustImageData, WatcherShutdown,
};
use clipkeep_core::clipboard::{
    ClipboardSource, ClipboardWriter, Format, ImageCapture, Paster, Payload,
};
use clipkeep_core::vault::ImageVault;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn map_clipboard_err<T>(
    result: std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>,
) -> Result<T> {
    result.map_err(|e| anyhow!(e))
}

fn content_format(format: Format) -> ContentFormat {
    match format {
        Format::Text => ContentFormat::Text,
        Format::Rtf => ContentFormat::Rtf,
        Format::Html => ContentFormat::Html,
        Format::Image => ContentFormat::Image,
        Format::Files => ContentFormat::Files,
    }
}

/// Linux reports `file://` URIs, other platforms plain paths.
fn local_path(entry: &str) -> &str {
    entry.strip_prefix("file://").unwrap_or(entry)
}

fn total_size(paths: &[String]) -> u64 {
    paths
        .iter()
        .filter_map(|p| std::fs::metadata(local_path(p)).ok())
        .map(|m| m.len())
        .sum()
}

pub struct NativeClipboard {
    inner: Arc<Mutex<ClipboardContext>>,
    vault: ImageVault,
}

impl NativeClipboard {
    pub fn new(vault: ImageVault) -> Result<Self> {
        let context = ClipboardContext::new()
            .map_err(|e| anyhow!("failed to create clipboard context: {e}"))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(context)),
            vault,
        })
    }

    /// Run `f` against the context on the blocking pool.
    async fn with_ctx<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ClipboardContext, &ImageVault) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        let vault = self.vault.clone();
        tokio::task::spawn_blocking(move || {
            let ctx = inner.lock().unwrap_or_else(|e| e.into_inner());
            f(&*ctx, &vault)
        })
        .await?
    }
}

fn read_image(ctx: &ClipboardContext, vault: &ImageVault) -> Result<ImageCapture> {
    let img = map_clipboard_err(ctx.get_image())?;
    let png = map_clipboard_err(img.to_png())?;
    match vault.put_png(png.get_bytes())? {
        Some(capture) => Ok(capture),
        // Report an empty capture; classification drops it.
        None => {
            let (width, height) = img.get_size();
            Ok(ImageCapture {
                path: vault.root().join("empty.png"),
                size: 0,
                width,
                height,
            })
        }
    }
}

#[async_trait]
impl ClipboardSource for NativeClipboard {
    async fn has(&self, format: Format) -> Result<bool> {
        self.with_ctx(move |ctx, _| Ok(ctx.has(content_format(format))))
            .await
    }

    async fn read(&self, format: Format) -> Result<Payload> {
        self.with_ctx(move |ctx, vault| {
            Ok(match format {
                Format::Text => Payload::Text(map_clipboard_err(ctx.get_text())?),
                Format::Rtf => Payload::Rtf(map_clipboard_err(ctx.get_rich_text())?),
                Format::Html => Payload::Html(map_clipboard_err(ctx.get_html())?),
                Format::Image => Payload::Image(read_image(ctx, vault)?),
                Format::Files => {
                    let paths: Vec<String> = map_clipboard_err(ctx.get_files())?
                        .iter()
                        .map(|p| local_path(p).to_string())
                        .collect();
                    let size = total_size(&paths);
                    Payload::Files { paths, size }
                }
            })
        })
        .await
    }

    async fn read_secondary_image(&self) -> Result<Option<ImageCapture>> {
        #[cfg(windows)]
        {
            self.with_ctx(|_, vault| windows::read_registered_image(vault))
                .await
        }
        #[cfg(not(windows))]
        {
            Ok(None)
        }
    }
}

#[async_trait]
impl ClipboardWriter for NativeClipboard {
    async fn write_text(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.with_ctx(move |ctx, _| map_clipboard_err(ctx.set_text(text)))
            .await
    }

    async fn write_rtf(&self, rtf: &str, plain: Option<&str>) -> Result<()> {
        let mut contents = vec![ClipboardContent::Rtf(rtf.to_string())];
        if let Some(p) = plain {
            contents.push(ClipboardContent::Text(p.to_string()));
        }
        self.with_ctx(move |ctx, _| map_clipboard_err(ctx.set(contents)))
            .await
    }

    async fn write_html(&self, html: &str, plain: Option<&str>) -> Result<()> {
        let mut contents = vec![ClipboardContent::Html(html.to_string())];
        if let Some(p) = plain {
            contents.push(ClipboardContent::Text(p.to_string()));
        }
        self.with_ctx(move |ctx, _| map_clipboard_err(ctx.set(contents)))
            .await
    }

    async fn write_image(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        self.with_ctx(move |ctx, _| {
            let img = map_clipboard_err(RustImageData::from_bytes(&bytes))?;
            map_clipboard_err(ctx.set_image(img))
        })
        .await
    }

    async fn write_files(&self, paths: &[String]) -> Result<()> {
        let paths = paths.to_vec();
        self.with_ctx(move |ctx, _| map_clipboard_err(ctx.set_files(paths)))
            .await
    }
}

/// Forwards every OS change notification to the async side.
struct ChangeForwarder {
    tx: UnboundedSender<()>,
}

impl ClipboardHandler for ChangeForwarder {
    fn on_clipboard_change(&mut self) {
        if self.tx.send(()).is_err() {
            debug!("clipboard change receiver dropped");
        }
    }
}

pub struct Watcher {
    shutdown: WatcherShutdown,
    join: JoinHandle<()>,
}

impl Watcher {
    pub async fn stop(self) {
        self.shutdown.stop();
        if let Err(e) = self.join.await {
            warn!(error = %e, "clipboard watcher thread ended abnormally");
        }
    }
}

pub fn spawn_watcher(tx: UnboundedSender<()>) -> Result<Watcher> {
    let mut watcher_ctx = ClipboardWatcherContext::new()
        .map_err(|e| anyhow!("failed to create watcher context: {e}"))?;
    let shutdown = watcher_ctx
        .add_handler(ChangeForwarder { tx })
        .get_shutdown_channel();
    let join = tokio::task::spawn_blocking(move || {
        info!("clipboard watch started");
        watcher_ctx.start_watch();
        info!("clipboard watch stopped");
    });
    Ok(Watcher { shutdown, join })
}

/// Focused-window paste via synthesized Shift+Insert.
pub struct KeyPaster;

#[async_trait]
impl Paster for KeyPaster {
    async fn paste(&self) -> Result<()> {
        send_paste().await
    }
}

/// Lets the target window settle after the clipboard write.
#[cfg(windows)]
const PASTE_SETTLE: std::time::Duration = std::time::Duration::from_millis(50);

#[cfg(windows)]
async fn send_paste() -> Result<()> {
    tokio::time::sleep(PASTE_SETTLE).await;
    tokio::task::spawn_blocking(windows::send_paste_keys).await?
}

#[cfg(not(windows))]
async fn send_paste() -> Result<()> {
    Err(anyhow!("pasting into the focused window is only supported on Windows"))
}

#[cfg(windows)]
mod windows {
    use anyhow::{anyhow, Result};
    use clipboard_win::{formats, get_clipboard, raw};
    use clipkeep_core::clipboard::ImageCapture;
    use clipkeep_core::vault::ImageVault;
    use winapi::um::winuser::{
        SendInput, INPUT, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_KEYUP, VK_CONTROL, VK_INSERT,
        VK_LWIN, VK_MENU, VK_RWIN, VK_SHIFT,
    };

    const CF_DIB: u32 = 8;
    const CF_DIBV5: u32 = 17;

    fn read_raw(format: u32) -> Result<Option<Vec<u8>>> {
        if !raw::is_format_avail(format) {
            return Ok(None);
        }
        let data = get_clipboard(formats::RawData(format))
            .map_err(|e| anyhow!("reading clipboard format {format}: {e}"))?;
        Ok(Some(data))
    }

    /// Images published only as registered "PNG" or as device-independent bitmaps.
    pub fn read_registered_image(vault: &ImageVault) -> Result<Option<ImageCapture>> {
        if let Some(png_format) = raw::register_format("PNG") {
            if let Some(png) = read_raw(png_format.get())? {
                if let Some(capture) = vault.put_png(&png)? {
                    return Ok(Some(capture));
                }
            }
        }
        for format in [CF_DIBV5, CF_DIB] {
            if let Some(dib) = read_raw(format)? {
                if let Some(capture) = vault.put_dib(&dib)? {
                    return Ok(Some(capture));
                }
            }
        }
        Ok(None)
    }

    fn key(vk: i32, flags: u32) -> INPUT {
        // SAFETY: INPUT is plain data; all-zero is a valid value.
        let mut input: INPUT = unsafe { std::mem::zeroed() };
        input.type_ = INPUT_KEYBOARD;
        // SAFETY: the union is used as KEYBDINPUT, matching `type_`.
        unsafe {
            *input.u.ki_mut() = KEYBDINPUT {
                wVk: vk as u16,
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            };
        }
        input
    }

    /// Release held modifiers, then Shift+Insert, in one `SendInput` batch.
    pub fn send_paste_keys() -> Result<()> {
        let mut inputs = [
            key(VK_CONTROL, KEYEVENTF_KEYUP),
            key(VK_MENU, KEYEVENTF_KEYUP),
            key(VK_LWIN, KEYEVENTF_KEYUP),
            key(VK_RWIN, KEYEVENTF_KEYUP),
            key(VK_SHIFT, 0),
            key(VK_INSERT, 0),
            key(VK_INSERT, KEYEVENTF_KEYUP),
            key(VK_SHIFT, KEYEVENTF_KEYUP),
        ];
        // SAFETY: `inputs` is a live, correctly sized INPUT array.
        let sent = unsafe {
            SendInput(
                inputs.len() as u32,
                inputs.as_mut_ptr(),
                std::mem::size_of::<INPUT>() as i32,
            )
        };
        if sent as usize != inputs.len() {
            return Err(anyhow!(
                "SendInput accepted {sent} of {} key events: {}",
                inputs.len(),
                std::io::Error::last_os_error()
            ));
        }
        Ok(())
    }
}
