//! Guess the media type of upload content from its first bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Number of bytes looked at by [`detect_media_type`].
pub const SNIFF_LEN: usize = 512;

const OCTET_STREAM: &str = "application/octet-stream";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Signatures that are recognized at the start of the content.
const MAGIC: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/x-gzip"),
    (b"OggS\x00", "application/ogg"),
    (b"\x1aE\xdf\xa3", "video/webm"),
];

/// Markup prefixes, compared case-insensitively after leading whitespace.
const MARKUP: &[(&[u8], &str)] = &[
    (b"<!doctype html", "text/html; charset=utf-8"),
    (b"<html", "text/html; charset=utf-8"),
    (b"<head", "text/html; charset=utf-8"),
    (b"<body", "text/html; charset=utf-8"),
    (b"<?xml", "text/xml; charset=utf-8"),
];

/// Bytes that don't occur in text files.
fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Valid UTF-8, allowing for a multi-byte character cut off at the end of `data`.
fn is_utf8_prefix(data: &[u8]) -> bool {
    match std::str::from_utf8(data) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}

/// Determine the media type of content starting with `data`. At most [`SNIFF_LEN`] bytes are
/// considered. Returns `application/octet-stream` if nothing more specific matches.
pub fn detect_media_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    for &(magic, mt) in MAGIC {
        if data.starts_with(magic) {
            return mt;
        }
    }
    // RIFF containers carry their format at offset 8.
    if data.len() >= 12 && &data[..4] == b"RIFF" {
        match &data[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wave",
            b"AVI " => return "video/avi",
            _ => {}
        }
    }
    // ISO base media files: a box size followed by the `ftyp` box type.
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return "video/mp4";
    }

    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    for &(prefix, mt) in MARKUP {
        if starts_with_ignore_case(&data[start..], prefix) {
            return mt;
        }
    }

    if !data.iter().any(|b| is_binary_byte(*b)) && is_utf8_prefix(data) {
        return TEXT_PLAIN;
    }
    OCTET_STREAM
}

/// Read up to [`SNIFF_LEN`] bytes (but never more than `size`) from the start of `src`, detect
/// the media type, and rewind `src` to its start.
pub async fn sniff_media_type<R: AsyncRead + AsyncSeek + std::marker::Unpin>(
    src: &mut R,
    size: u64,
) -> std::io::Result<&'static str> {
    let n = size.min(SNIFF_LEN as u64);
    let mut buf = Vec::with_capacity(n as usize);
    src.seek(std::io::SeekFrom::Start(0)).await?;
    (&mut *src).take(n).read_to_end(&mut buf).await?;
    src.seek(std::io::SeekFrom::Start(0)).await?;
    Ok(detect_media_type(&buf))
}
