//! QR code export of rendered configs

use image::{DynamicImage, ImageFormat, Luma};
use netmesh_common::{Error, Result};
use qrcode::{EcLevel, QrCode};
use std::io::Cursor;

/// Minimum edge length of the generated image, in pixels
pub const QR_MIN_DIMENSION: u32 = 220;

/// Encode `text` as a PNG QR code at error-correction level M
pub fn render_png(text: &str) -> Result<Vec<u8>> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::M)
        .map_err(|e| Error::internal(format!("QR encoding failed: {}", e)))?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .build();

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::internal(format!("PNG encoding failed: {}", e)))?;
    Ok(out.into_inner())
}
