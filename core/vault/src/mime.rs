//! Magic-byte MIME sniffing.
//!
//! No crate in the dependency corpus performs signature-based sniffing —
//! only extension-based guessing exists elsewhere — so the handful of
//! signatures the engine actually needs are authored here rather than
//! fabricating a dependency.

const FALLBACK: &str = "application/octet-stream";

/// Inspect the leading bytes of `content` and return a best-guess MIME
/// type, falling back to `application/octet-stream`.
pub fn sniff(content: &[u8]) -> &'static str {
    let sigs: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
        (b"RIFF", "audio/wav"),
        (b"ID3", "audio/mpeg"),
        (b"BM", "image/bmp"),
    ];

    for (sig, mime) in sigs {
        if content.starts_with(sig) {
            return mime;
        }
    }

    if content.starts_with(b"\x00\x00\x00") && content.len() > 8 && &content[4..8] == b"ftyp" {
        return "video/mp4";
    }

    if looks_like_utf8_text(content) {
        return "text/plain";
    }

    FALLBACK
}

fn looks_like_utf8_text(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(512)];
    if sample.is_empty() {
        return true;
    }
    std::str::from_utf8(sample).is_ok() && !sample.contains(&0)
}
