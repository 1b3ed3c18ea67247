// Image format detection from magic bytes

pub const DEFAULT_MIME: &str = "image/jpeg";

/// Classify `bytes` by signature, returning `fallback` when nothing matches.
///
/// Only the first 12 bytes are ever inspected. Buffers shorter than 4 bytes
/// always get the fallback.
pub fn sniff_mime<'a>(bytes: &[u8], fallback: &'a str) -> &'a str {
    if bytes.len() < 4 {
        return fallback;
    }

    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg";
    }
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return "image/png";
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return "image/webp";
    }
    if bytes.starts_with(&[0x42, 0x4D]) {
        return "image/bmp";
    }

    fallback
}
