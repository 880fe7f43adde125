//! Turn a local image file into the base64 payload of a generation request.

use std::path::Path;

use base64::Engine;

use crate::{error::VeoError, models::ImageInput};

pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

pub fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn invalid_file() -> VeoError {
    VeoError::Validation(vec![format!(
        "Invalid file. Please upload a JPEG, PNG, or WebP image under {}.",
        format_file_size(MAX_IMAGE_BYTES)
    )])
}

pub fn encode_image(bytes: &[u8], mime_type: &str) -> ImageInput {
    ImageInput {
        image_bytes: base64::engine::general_purpose::STANDARD.encode(bytes),
        mime_type: mime_type.to_string(),
    }
}

pub async fn load_image(path: &Path) -> Result<ImageInput, VeoError> {
    let mime = mime_for(path).ok_or_else(invalid_file)?;
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| VeoError::Validation(vec![format!("Cannot read {}: {}", path.display(), e)]))?;
    if meta.len() > MAX_IMAGE_BYTES {
        return Err(invalid_file());
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| VeoError::Validation(vec![format!("Cannot read {}: {}", path.display(), e)]))?;
    tracing::info!("Processing file: {} ({}, {})", path.display(), format_file_size(bytes.len() as u64), mime);
    Ok(encode_image(&bytes, mime))
}

pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    let i = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let i = i.min(UNITS.len() - 1);
    let value = bytes as f64 / 1024f64.powi(i as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[i])
}
