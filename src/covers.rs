//! Cover generation.
//!
//! EPUB books get a placeholder keyed by title. PDF books get a thumbnail of
//! the first image drawn on page one; any failure falls back to the
//! placeholder, so cover generation never fails an add.

use crate::config::BookFormat;
use crate::error::{AppError, Result};
use crate::reader::pdf;
use base64::{Engine, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

/// Placeholder cover width in pixels.
pub const PLACEHOLDER_WIDTH: u32 = 400;

/// Placeholder cover height in pixels.
pub const PLACEHOLDER_HEIGHT: u32 = 600;

/// Derive a cover data URL for a new book.
pub fn cover_for(format: BookFormat, data: &[u8], title: &str, thumbnail_width: u32) -> String {
    let thumbnail = match format {
        BookFormat::Pdf => match pdf_thumbnail(data, thumbnail_width) {
            Ok(Some(png)) => Some(png),
            Ok(None) => {
                tracing::debug!(title, "No image on first PDF page, using placeholder");
                None
            }
            Err(e) => {
                tracing::warn!(title, error = %e, "PDF thumbnail failed, using placeholder");
                None
            }
        },
        BookFormat::Epub => None,
    };

    let png = thumbnail.unwrap_or_else(|| placeholder_png(title));
    png_data_url(&png)
}

/// Render the first-page image of a PDF as a PNG thumbnail.
pub fn pdf_thumbnail(data: &[u8], width: u32) -> Result<Option<Vec<u8>>> {
    let Some(raw) = pdf::first_page_image(data)? else {
        return Ok(None);
    };

    let img = decode_any(raw)?;
    let height = (img.height() as f32 * width as f32 / img.width().max(1) as f32) as u32;
    let thumb = img.thumbnail(width, height.max(1));

    encode_png(&thumb).map(Some)
}

fn decode_any(raw: pdf::RawImage) -> Result<DynamicImage> {
    match raw {
        pdf::RawImage::Encoded(bytes) => Ok(image::load_from_memory(&bytes)?),
        pdf::RawImage::Rgb {
            width,
            height,
            pixels,
        } => image::RgbImage::from_raw(width, height, pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| AppError::Internal("Raw image size mismatch".to_string())),
    }
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// Wrap PNG bytes in a data URL.
pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Deterministic gradient placeholder whose hue comes from the title.
pub fn placeholder_png(title: &str) -> Vec<u8> {
    let hash = title
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let hue = (hash % 360) as f32;
    let (r, g, b) = hsv_to_rgb(hue, 0.4, 0.5);

    let mut img = RgbaImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
    for y in 0..PLACEHOLDER_HEIGHT {
        let shade = 1.0 - (y as f32 / PLACEHOLDER_HEIGHT as f32) * 0.3;
        let pixel = Rgba([
            (r as f32 * shade) as u8,
            (g as f32 * shade) as u8,
            (b as f32 * shade) as u8,
            255,
        ]);
        for x in 0..PLACEHOLDER_WIDTH {
            img.put_pixel(x, y, pixel);
        }
    }

    // Encoding an in-memory RGBA buffer as PNG does not fail in practice.
    encode_png(&DynamicImage::ImageRgba8(img)).unwrap_or_default()
}

/// Convert HSV to RGB.
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}
