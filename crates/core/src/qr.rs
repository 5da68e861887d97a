//! QR rendering for login URLs

use crate::errors::{MeshError, Result};
use base64::Engine;
use image::{ImageFormat, Luma};
use qrcode::render::unicode;
use qrcode::QrCode;
use std::io::Cursor;

/// Prefix of every rendered data URL
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

const MIN_DIMENSION: u32 = 256;

/// Encode `data` as a QR code PNG wrapped in a `data:` URL
pub fn png_data_url(data: &str) -> Result<String> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| MeshError::QrCode {
        message: e.to_string(),
    })?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| MeshError::QrCode {
            message: e.to_string(),
        })?;

    Ok(format!(
        "{}{}",
        PNG_DATA_URL_PREFIX,
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

/// Render `data` as a QR code for terminal display
pub fn terminal(data: &str) -> Result<String> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| MeshError::QrCode {
        message: e.to_string(),
    })?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
