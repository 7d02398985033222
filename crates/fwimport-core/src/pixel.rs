//! Avatar pixel assembly.
//!
//! A decoded avatar archive is a raw 256×256 image, one big-endian RGBA word
//! per pixel. [`assemble`] repacks it as ARGB and [`PixelGrid::write_png`]
//! serializes it.

use std::fs;
use std::io;
use std::path::Path;

use image::{ImageFormat, Rgba, RgbaImage};
use thiserror::Error;
use tracing::debug;

use crate::codec::DecodedPayload;

/// Avatar edge length in pixels.
pub const GRID_SIZE: usize = 256;
/// Pixels per avatar.
pub const PIXEL_COUNT: usize = GRID_SIZE * GRID_SIZE;
/// Exact decoded payload length of one avatar (262144 bytes).
pub const PAYLOAD_SIZE: usize = PIXEL_COUNT * 4;

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("Payload size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// 256×256 grid of ARGB pixels in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    pixels: Vec<u32>,
}

impl PixelGrid {
    /// ARGB value at (`x`, `y`), or `None` outside the grid.
    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        if x >= GRID_SIZE || y >= GRID_SIZE {
            return None;
        }
        Some(self.pixels[y * GRID_SIZE + x])
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(GRID_SIZE as u32, GRID_SIZE as u32, |x, y| {
            let [a, r, g, b] = self.pixels[y as usize * GRID_SIZE + x as usize].to_be_bytes();
            Rgba([r, g, b, a])
        })
    }

    /// Encode as PNG at `path`, replacing whatever is there.
    pub fn write_png(&self, path: &Path) -> Result<(), AssembleError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Replaced existing image"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.to_rgba_image().save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

/// Reinterpret a decoded payload as a pixel grid.
pub fn assemble(payload: DecodedPayload) -> Result<PixelGrid, AssembleError> {
    if payload.len() != PAYLOAD_SIZE {
        return Err(AssembleError::SizeMismatch {
            expected: PAYLOAD_SIZE,
            actual: payload.len(),
        });
    }

    let pixels = payload
        .as_bytes()
        .chunks_exact(4)
        .map(|word| {
            let rgba = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
            let rgb = rgba >> 8;
            let alpha = rgba & 0xFF;
            (alpha << 24) | rgb
        })
        .collect();

    Ok(PixelGrid { pixels })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    fn payload(bytes: Vec<u8>) -> DecodedPayload {
        // Wrap raw bytes through the decoder so the payload type stays opaque.
        let mut data = b"Yaz0".to_vec();
        data.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);
        for chunk in bytes.chunks(8) {
            data.push(0xFF);
            data.extend_from_slice(chunk);
        }
        decode(&data).unwrap()
    }

    fn gradient() -> Vec<u8> {
        let mut raw = vec![0u8; PAYLOAD_SIZE];
        for (i, px) in raw.chunks_exact_mut(4).enumerate() {
            px.copy_from_slice(&[(i % 256) as u8, (i / 256) as u8, 0x40, 0x80]);
        }
        raw
    }

    #[test]
    fn test_assemble_reorders_alpha() {
        let mut raw = vec![0u8; PAYLOAD_SIZE];
        raw[..4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        let grid = assemble(payload(raw)).unwrap();

        assert_eq!(grid.pixel(0, 0), Some(0x4411_2233));
        assert_eq!(grid.pixel(1, 0), Some(0));
        assert_eq!(grid.pixels().len(), PIXEL_COUNT);
    }

    #[test]
    fn test_row_major_layout() {
        let grid = assemble(payload(gradient())).unwrap();
        assert_eq!(grid.pixel(5, 7), Some(0x8005_0740));
        assert_eq!(grid.pixel(256, 0), None);
    }

    #[test]
    fn test_size_mismatch() {
        let err = assemble(payload(vec![0u8; 16])).unwrap_err();
        assert!(matches!(
            err,
            AssembleError::SizeMismatch {
                expected: PAYLOAD_SIZE,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_rgba_image_restores_channel_order() {
        let grid = assemble(payload(gradient())).unwrap();
        let img = grid.to_rgba_image();
        assert_eq!(img.get_pixel(5, 7).0, [5, 7, 0x40, 0x80]);
    }

    #[test]
    fn test_write_png_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("avatar.png");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale").unwrap();

        let grid = assemble(payload(gradient())).unwrap();
        grid.write_png(&path).unwrap();

        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (256, 256));
        assert_eq!(img.get_pixel(5, 7).0, [5, 7, 0x40, 0x80]);
    }
}
