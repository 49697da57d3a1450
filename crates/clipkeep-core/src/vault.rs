//! Content-addressed image storage.
//!
//! Captured images are copied under `root` and named by the SHA-256 of their
//! bytes, so the stored path of an image does not depend on where the
//! platform layer happened to write it.

use crate::clipboard::ImageCapture;
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

const PNG_MAGIC: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];
const BMP_FILE_HEADER_LEN: u32 = 14;
const BITMAPINFOHEADER_LEN: usize = 40;
const BI_BITFIELDS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ImageVault {
    root: PathBuf,
}

impl ImageVault {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` once; returns the path of the stored copy.
    pub fn put(&self, bytes: &[u8], ext: &str) -> std::io::Result<PathBuf> {
        let digest = Sha256::digest(bytes);
        let hex = hex::encode(digest);
        let dir = self.root.join(&hex[0..2]);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{hex}.{ext}"));
        if !path.exists() {
            let tmp = dir.join(format!(".{hex}.tmp"));
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            fs::rename(&tmp, &path)?;
        }
        Ok(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        match (fs::canonicalize(&self.root), fs::canonicalize(path)) {
            (Ok(root), Ok(p)) => p.starts_with(root),
            _ => false,
        }
    }

    /// Durable path for an image captured at `path`.
    pub async fn persist(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let vault = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || vault.persist_blocking(&path)).await?
    }

    /// Delete a stored copy. Paths outside the vault are never touched.
    pub async fn remove(&self, path: &Path) -> anyhow::Result<bool> {
        let vault = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            if !vault.contains(&path) {
                return Ok(false);
            }
            match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => {
                    Err(e).with_context(|| format!("removing stored image {}", path.display()))
                }
            }
        })
        .await?
    }

    fn persist_blocking(&self, path: &Path) -> anyhow::Result<PathBuf> {
        if self.contains(path) {
            return Ok(fs::canonicalize(path)?);
        }
        let bytes =
            fs::read(path).with_context(|| format!("reading captured image {}", path.display()))?;
        anyhow::ensure!(!bytes.is_empty(), "captured image {} is empty", path.display());
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let stored = self.put(&bytes, &ext)?;
        Ok(fs::canonicalize(&stored).unwrap_or(stored))
    }

    /// Store PNG bytes; `None` when they do not describe a non-empty image.
    pub fn put_png(&self, png: &[u8]) -> anyhow::Result<Option<ImageCapture>> {
        let (width, height) = match png_dimensions(png) {
            Some((w, h)) if w > 0 && h > 0 => (w, h),
            _ => return Ok(None),
        };
        let path = self.put(png, "png")?;
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok(Some(ImageCapture {
            path,
            size,
            width,
            height,
        }))
    }

    /// Store a packed DIB (header, color table, pixels) as PNG.
    pub fn put_dib(&self, dib: &[u8]) -> anyhow::Result<Option<ImageCapture>> {
        let bmp = match dib_to_bmp(dib) {
            Some(b) => b,
            None => return Ok(None),
        };
        let img = image::load_from_memory_with_format(&bmp, image::ImageFormat::Bmp)
            .context("decoding clipboard bitmap")?;
        if img.width() == 0 || img.height() == 0 {
            return Ok(None);
        }
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .context("encoding clipboard bitmap as png")?;
        self.put_png(&png)
    }
}

pub fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 24 || data[0..8] != PNG_MAGIC {
        return None;
    }
    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    Some((width, height))
}

fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Prefix a packed DIB with a BMP file header.
pub fn dib_to_bmp(dib: &[u8]) -> Option<Vec<u8>> {
    if dib.len() < BITMAPINFOHEADER_LEN {
        return None;
    }
    let header_len = le_u32(dib, 0);
    let bit_count = u16::from_le_bytes([dib[14], dib[15]]) as u32;
    let compression = le_u32(dib, 16);
    let clr_used = le_u32(dib, 32);

    let colors = if clr_used > 0 {
        clr_used
    } else if bit_count <= 8 {
        1u32 << bit_count
    } else {
        0
    };
    let masks = if compression == BI_BITFIELDS && header_len as usize == BITMAPINFOHEADER_LEN {
        12
    } else {
        0
    };
    let pixel_offset = header_len.checked_add(colors.checked_mul(4)?)?.checked_add(masks)?;
    if dib.len() as u64 <= pixel_offset as u64 {
        return None;
    }

    let file_len = BMP_FILE_HEADER_LEN.checked_add(u32::try_from(dib.len()).ok()?)?;
    let mut bmp = Vec::with_capacity(file_len as usize);
    bmp.extend_from_slice(b"BM");
    bmp.extend_from_slice(&file_len.to_le_bytes());
    bmp.extend_from_slice(&[0, 0, 0, 0]);
    bmp.extend_from_slice(&(BMP_FILE_HEADER_LEN + pixel_offset).to_le_bytes());
    bmp.extend_from_slice(dib);
    Some(bmp)
}
