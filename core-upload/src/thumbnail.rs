//! Square JPEG thumbnails for prepared items.
//!
//! Decoding honours the EXIF orientation, then the image is center-cropped
//! to a square and resized to the configured pixel edge. Rendering runs on
//! the blocking pool.

use crate::{Result, UploadError};
use bytes::Bytes;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;

/// Thumbnail attached to a source item
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Thumbnail {
    /// Shown until preparation renders one, or when rendering fails
    #[default]
    Placeholder,
    Rendered {
        /// Edge length in pixels
        edge: u32,
        jpeg: Bytes,
    },
}

impl Thumbnail {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Thumbnail::Placeholder)
    }
}

/// Renders thumbnails at a fixed pixel edge
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailRenderer {
    edge: u32,
}

impl ThumbnailRenderer {
    pub fn new(edge: u32) -> Self {
        Self { edge: edge.max(1) }
    }

    pub fn edge(&self) -> u32 {
        self.edge
    }

    /// Render a thumbnail from encoded still-image bytes.
    pub async fn render(&self, data: Bytes) -> Result<Thumbnail> {
        let edge = self.edge;
        let jpeg = tokio::task::spawn_blocking(move || render_square_jpeg(&data, edge))
            .await
            .map_err(|e| UploadError::Thumbnail(format!("render task failed: {}", e)))??;
        Ok(Thumbnail::Rendered { edge, jpeg })
    }
}

fn render_square_jpeg(data: &[u8], edge: u32) -> Result<Bytes> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| UploadError::Thumbnail(format!("unreadable image: {}", e)))?
        .into_decoder()
        .map_err(|e| UploadError::Thumbnail(format!("unsupported image: {}", e)))?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)
        .map_err(|e| UploadError::Thumbnail(format!("failed to decode image: {}", e)))?;
    img.apply_orientation(orientation);

    let side = img.width().min(img.height());
    if side == 0 {
        return Err(UploadError::Thumbnail("image has no pixels".to_string()));
    }
    let x = (img.width() - side) / 2;
    let y = (img.height() - side) / 2;
    let square = img
        .crop_imm(x, y, side, side)
        .resize_exact(edge, edge, FilterType::Lanczos3);

    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(square.to_rgb8())
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Jpeg)
        .map_err(|e| UploadError::Thumbnail(format!("failed to encode thumbnail: {}", e)))?;
    Ok(Bytes::from(buffer))
}
