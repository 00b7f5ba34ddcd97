//! Base64 encoding and decoding utilities

use base64::{engine::general_purpose::STANDARD, Engine};

use super::ImageError;

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a provider payload. Accepts bare base64 or a `data:` URL.
pub fn decode(encoded: &str) -> Result<Vec<u8>, ImageError> {
    let data = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, payload)| payload).unwrap_or(rest),
        None => encoded,
    };

    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| ImageError::InvalidData(format!("Invalid base64 data: {}", e)))?;

    if bytes.is_empty() {
        return Err(ImageError::InvalidData("image payload is empty".to_string()));
    }
    Ok(bytes)
}

/// Detect image format from binary data using magic bytes
pub fn detect_image_format(data: &[u8]) -> Option<&'static str> {
    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpg");
    }

    // WebP: RIFF....WEBP
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        return Some("webp");
    }

    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("gif");
    }

    None
}

/// MIME type for a stored key's extension
pub fn content_type(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
