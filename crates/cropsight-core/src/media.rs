//! Accepted image media types.

pub const JPEG: &str = "image/jpeg";
pub const PNG: &str = "image/png";
pub const WEBP: &str = "image/webp";

/// File extension for an accepted media type. `None` means unsupported.
pub fn extension_for(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or("").trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Guess the media type from magic bytes.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(JPEG)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(PNG)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(WEBP)
    } else {
        None
    }
}

/// Pick the media type for an upload: the declared one if it is accepted,
/// otherwise whatever the bytes look like.
pub fn resolve(declared: Option<&str>, bytes: &[u8]) -> Option<&'static str> {
    if let Some(ext) = declared.and_then(extension_for) {
        return Some(match ext {
            "jpg" => JPEG,
            "png" => PNG,
            _ => WEBP,
        });
    }
    sniff(bytes)
}
