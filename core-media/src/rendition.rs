//! # Renditions
//!
//! Decoding a downloaded source and encoding the fixed-width WebP renditions.
//! Everything here is synchronous CPU work; callers run it on the blocking
//! pool through [`render_file`].

use crate::error::{MediaError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Limits};
use std::path::{Path, PathBuf};

/// Widths every published token gets, in pixels
pub const RENDITION_WIDTHS: [u32; 2] = [280, 1440];

/// Largest source dimension the decoder accepts
pub const MAX_SOURCE_DIMENSION: u32 = 16_384;

/// Largest rendition side the WebP encoder accepts
pub const MAX_RENDITION_DIMENSION: u32 = 16_383;

/// Decoder allocation cap
pub const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// One encoded rendition
#[derive(Debug, Clone)]
pub struct Rendition {
    pub width: u32,
    pub data: Vec<u8>,
}

impl Rendition {
    /// File name inside the published directory
    pub fn file_name(&self) -> String {
        file_name(self.width)
    }
}

pub fn file_name(width: u32) -> String {
    format!("{}.webp", width)
}

/// Decode the first frame of an image file under bounded limits
pub fn decode(path: &Path) -> Result<DynamicImage> {
    let mut reader = ImageReader::open(path)?
        .with_guessed_format()
        .map_err(MediaError::Io)?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_DIMENSION);
    limits.max_image_height = Some(MAX_SOURCE_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    reader.limits(limits);

    reader
        .decode()
        .map_err(|e| MediaError::Decode(e.to_string()))
}

/// Height that keeps the source aspect ratio at `width`
pub fn scaled_height(source_width: u32, source_height: u32, width: u32) -> u32 {
    if source_width == 0 {
        return 1;
    }
    let height = (u64::from(source_height) * u64::from(width) + u64::from(source_width) / 2)
        / u64::from(source_width);
    height.clamp(1, u64::from(u32::MAX)) as u32
}

/// Resize to `width` and encode as lossy WebP
pub fn encode_webp(image: &DynamicImage, width: u32, quality: f32) -> Result<Rendition> {
    let height = scaled_height(image.width(), image.height(), width);
    // Checked before resizing: a thin source scales to an enormous buffer
    if height > MAX_RENDITION_DIMENSION {
        return Err(MediaError::Encode(format!(
            "{}x{} source scales to {}x{}, over the {} pixel limit",
            image.width(),
            image.height(),
            width,
            height,
            MAX_RENDITION_DIMENSION
        )));
    }
    let resized = image.resize_exact(width, height, FilterType::Lanczos3);

    // The encoder only takes 8-bit RGB(A)
    let rgba = DynamicImage::ImageRgba8(resized.to_rgba8());
    let encoder = webp::Encoder::from_image(&rgba).map_err(|e| MediaError::Encode(e.to_string()))?;
    let data = encoder.encode(quality).to_vec();

    if data.is_empty() {
        return Err(MediaError::Encode(format!("empty output at width {}", width)));
    }

    Ok(Rendition { width, data })
}

/// Decode `path` once and produce one rendition per width
pub fn render(path: &Path, widths: &[u32], quality: f32) -> Result<Vec<Rendition>> {
    let image = decode(path)?;
    widths
        .iter()
        .map(|&width| encode_webp(&image, width, quality))
        .collect()
}

/// [`render`] on the blocking pool
pub async fn render_file(path: PathBuf, widths: Vec<u32>, quality: f32) -> Result<Vec<Rendition>> {
    tokio::task::spawn_blocking(move || render(&path, &widths, quality))
        .await
        .map_err(|e| MediaError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join("source");
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        image.save_with_format(&path, ImageFormat::Png).unwrap();
        path
    }

    #[test]
    fn test_scaled_height_keeps_aspect() {
        assert_eq!(scaled_height(1000, 500, 280), 140);
        assert_eq!(scaled_height(100, 300, 1440), 4320);
        assert_eq!(scaled_height(3, 1, 280), 93);
        assert_eq!(scaled_height(10_000, 1, 280), 1);
    }

    #[test]
    fn test_render_produces_both_widths() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, 400, 200);

        let renditions = render(&path, &RENDITION_WIDTHS, 80.0).unwrap();

        assert_eq!(renditions.len(), 2);
        for (rendition, width) in renditions.iter().zip(RENDITION_WIDTHS) {
            assert_eq!(rendition.width, width);
            assert_eq!(&rendition.data[0..4], b"RIFF");
            assert_eq!(&rendition.data[8..12], b"WEBP");

            let decoded = image::load_from_memory(&rendition.data).unwrap();
            assert_eq!(decoded.width(), width);
            assert_eq!(decoded.height(), width / 2);
        }
    }

    #[test]
    fn test_extension_is_not_trusted() {
        // Format is sniffed from content, not the name
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, 64, 64);
        let renamed = dir.path().join("image.jpg");
        std::fs::rename(&path, &renamed).unwrap();

        assert!(decode(&renamed).is_ok());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("source");
        std::fs::write(&path, b"<html>not an image</html>").unwrap();

        let result = render(&path, &RENDITION_WIDTHS, 80.0);
        assert!(matches!(result, Err(MediaError::Decode(_))));
    }

    #[test]
    fn test_thin_source_is_rejected_before_resizing() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, 1, MAX_SOURCE_DIMENSION);
        assert!(decode(&path).is_ok());

        let result = render(&path, &RENDITION_WIDTHS, 80.0);
        assert!(matches!(result, Err(MediaError::Encode(_))));
    }

    #[test]
    fn test_tall_source_within_limit_renders() {
        let dir = TempDir::new().unwrap();
        // 280 wide keeps 280 x 11_200; 1440 wide would not fit
        let path = write_png(&dir, 10, 400);

        let renditions = render(&path, &[280], 50.0).unwrap();
        let decoded = image::load_from_memory(&renditions[0].data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (280, 11_200));
        assert!(render(&path, &[1440], 50.0).is_err());
    }

    #[tokio::test]
    async fn test_render_file_runs_off_thread() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, 32, 32);

        let renditions = render_file(path, vec![280], 50.0).await.unwrap();
        assert_eq!(renditions[0].file_name(), "280.webp");
    }
}
